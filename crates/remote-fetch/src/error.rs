// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the hydration daemon
//!
//! Errors fall into three tiers. [`SetupError`] stops the daemon before it
//! starts answering events. [`EventError`] only affects the access that
//! triggered it: that access is denied with [`EventError::errno`] and the loop
//! moves on. [`ProtocolError`] means the kernel contradicted an assumption we
//! answer events with, so the loop stops.

use std::io;
use std::path::PathBuf;

/// Failures while preparing the watched tree
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("failed to query the system page size: {0}")]
    PageSize(#[source] io::Error),
    #[error("invalid page size {0}: must be a non-zero power of two")]
    InvalidPageSize(u64),
    #[error("failed to open directory {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to create the fanotify group: {0}")]
    NotificationGroup(#[source] io::Error),
    #[error("failed to walk the destination tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to install mark on {path}: {source}")]
    Mark {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while hydrating a single file
#[derive(thiserror::Error, Debug)]
pub enum EventError {
    #[error("failed to resolve the event descriptor path: {0}")]
    Resolve(#[source] io::Error),
    #[error("{path} is not inside the watched tree {root}")]
    OutsideTree { path: PathBuf, root: PathBuf },
    #[error("failed to open source file {path}: {source}")]
    OpenSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to stat {what}: {source}")]
    Stat {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{primitive} failed at offset {offset}: {source}")]
    Copy {
        primitive: &'static str,
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove mark on {path}: {source}")]
    Unmark {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EventError {
    /// The OS error number reported back to the blocked caller
    pub fn errno(&self) -> i32 {
        match self {
            EventError::OutsideTree { .. } => libc::EXDEV,
            EventError::Resolve(source)
            | EventError::OpenSource { source, .. }
            | EventError::Stat { source, .. }
            | EventError::Copy { source, .. }
            | EventError::Unmark { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Violations of the fanotify contract and notification group I/O failures
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("failed to read fanotify events: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write fanotify response: {0}")]
    Respond(#[source] io::Error),
    #[error("invalid metadata version, have {found}, expect {expected}")]
    Version { found: u8, expected: u8 },
    #[error("metadata mask incorrect {0:#x}")]
    Mask(u64),
    #[error("event carries no file descriptor")]
    NoFd,
    #[error("truncated event record: {0}")]
    Truncated(&'static str),
}

/// Everything that can stop the daemon
#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
