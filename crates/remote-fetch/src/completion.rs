// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-file completion tracking
//!
//! A destination file counts as fully hydrated once it has as many allocated
//! blocks as its source. This is an approximation: a sparse destination can
//! reach block parity with holes in different places than the source, and will
//! then stop being intercepted with some ranges never copied. Copying zeros
//! instead of punching holes only pushes the destination above parity, which
//! is treated the same way.

use std::collections::HashMap;
use std::fs::{File, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::{debug, info};

use crate::error::EventError;
use crate::fanotify::MarkControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Active,
    Inactive,
}

/// Watch state of every file marked at startup, keyed by relative path
#[derive(Debug, Default)]
pub struct CompletionTracker {
    watches: HashMap<PathBuf, WatchState>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly installed mark
    pub fn watch(&mut self, rel: impl Into<PathBuf>) {
        self.watches.entry(rel.into()).or_insert(WatchState::Active);
    }

    pub fn state(&self, rel: &Path) -> Option<WatchState> {
        self.watches.get(rel).copied()
    }

    /// Whether the mark for `rel` has already been removed
    ///
    /// Paths never recorded (hard links reached under another name, say)
    /// are treated as still in need of hydration.
    pub fn is_inactive(&self, rel: &Path) -> bool {
        self.state(rel) == Some(WatchState::Inactive)
    }

    pub fn active_count(&self) -> usize {
        self.watches.values().filter(|state| **state == WatchState::Active).count()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Compare allocations and unwatch `rel` if the destination caught up
    ///
    /// Returns whether the file is complete.
    pub fn check<M: MarkControl>(
        &mut self,
        rel: &Path,
        dst_path: &Path,
        src: &File,
        dst: &File,
        marks: &mut M,
    ) -> Result<bool, EventError> {
        let src_meta = metadata(src, "source")?;
        let dst_meta = metadata(dst, "destination")?;

        if !is_complete(&src_meta, &dst_meta) {
            return Ok(false);
        }

        debug!(
            operation = "completion_check",
            relpath = %rel.display(),
            src_blocks = src_meta.blocks(),
            dst_blocks = dst_meta.blocks(),
            "destination reached source allocation"
        );
        self.unwatch(rel, dst_path, marks)?;
        Ok(true)
    }

    /// Remove the mark for `rel` and flag it inactive
    ///
    /// A mark that is already gone counts as removed.
    pub fn unwatch<M: MarkControl>(
        &mut self,
        rel: &Path,
        dst_path: &Path,
        marks: &mut M,
    ) -> Result<(), EventError> {
        match marks.remove_mark(dst_path) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(Errno::ENOENT as i32) => {
                debug!(relpath = %rel.display(), "mark already removed");
            }
            Err(source) => {
                return Err(EventError::Unmark {
                    path: dst_path.to_path_buf(),
                    source,
                });
            }
        }

        let previous = self.watches.insert(rel.to_path_buf(), WatchState::Inactive);
        if previous != Some(WatchState::Inactive) {
            info!(operation = "unwatch", relpath = %rel.display(), "file fully hydrated");
        }
        Ok(())
    }
}

/// Destination allocation has reached the source's
///
/// This compares allocated blocks, not contents. A sparse destination can reach
/// parity through blocks that do not match the source and still count as done.
pub fn is_complete(src: &Metadata, dst: &Metadata) -> bool {
    dst.blocks() >= src.blocks()
}

fn metadata(file: &File, what: &'static str) -> Result<Metadata, EventError> {
    file.metadata().map_err(|source| EventError::Stat { what, source })
}
