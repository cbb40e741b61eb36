// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! remote-fetch - on-demand hydration of placeholder trees
//!
//! The daemon watches every regular file of a destination tree with fanotify
//! pre-content marks. When a process reads or writes a placeholder, the kernel
//! blocks the access and hands us the file; we copy the touched pages from the
//! mirrored source tree into it and only then allow the access to continue.
//!
//! Once a destination file holds as many allocated blocks as its source, its
//! mark is removed and further accesses go straight to the filesystem.

pub mod completion;
pub mod config;
pub mod copy;
pub mod daemon;
pub mod error;
pub mod fanotify;
pub mod marks;
pub mod paths;
pub mod proto;
pub mod range;

pub use completion::CompletionTracker;
pub use config::{Cli, DaemonConfig};
pub use copy::{CopyEngine, CopyPrimitives, KernelPrimitives, Primitive};
pub use daemon::{EventLoop, Hydrator};
pub use error::{DaemonError, EventError, ProtocolError, SetupError};
pub use fanotify::{Fanotify, MarkControl, NotificationSource};
pub use paths::PathMapper;
pub use proto::{RangeInfo, RawEvent, Response};
pub use range::CopyWindow;
