// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mapping between event descriptors, relative paths and the two trees
//!
//! A relative path names the same file pair for the lifetime of the daemon:
//! `source_root/rel` is copied into `destination_root/rel`.

use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use crate::error::EventError;

/// Canonical absolute form of a root directory
///
/// Descriptor paths resolved through `/proc/self/fd` are canonical, so the
/// destination root has to be as well for the prefix match to work. A source
/// root that cannot be resolved yet (an unmounted remote share, say) is made
/// absolute against the working directory instead.
pub fn normalize_root(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(canonical) => Ok(canonical),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: PathBuf,
    destination_root: PathBuf,
}

impl PathMapper {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Relative path of the destination file behind `fd`
    pub fn relative_path(&self, fd: RawFd) -> Result<PathBuf, EventError> {
        let link = format!("/proc/self/fd/{}", fd);
        let resolved = std::fs::read_link(&link).map_err(EventError::Resolve)?;
        self.relative_from_resolved(&resolved)
    }

    /// Strip the destination root from an absolute path
    ///
    /// The root itself and anything outside it are rejected.
    pub fn relative_from_resolved(&self, resolved: &Path) -> Result<PathBuf, EventError> {
        match resolved.strip_prefix(&self.destination_root) {
            Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
            _ => Err(EventError::OutsideTree {
                path: resolved.to_path_buf(),
                root: self.destination_root.clone(),
            }),
        }
    }

    pub fn source_path(&self, rel: &Path) -> PathBuf {
        self.source_root.join(rel)
    }

    pub fn destination_path(&self, rel: &Path) -> PathBuf {
        self.destination_root.join(rel)
    }
}
