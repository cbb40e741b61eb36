// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Copy engine
//!
//! Windows are copied with `copy_file_range`, which keeps the data inside the
//! kernel. The first `EXDEV` from it (source and destination on filesystems
//! that cannot copy between each other) switches the engine to the relay path
//! for good: the destination is positioned at the window offset and
//! `sendfile` streams the source into it.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::fd::{AsFd, BorrowedFd};

use nix::errno::Errno;
use nix::fcntl;
use nix::sys::sendfile;
use tracing::{info, trace};

use crate::error::EventError;
use crate::range::CopyWindow;

/// Which primitive moved the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    CopyFileRange,
    Sendfile,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::CopyFileRange => "copy_file_range",
            Primitive::Sendfile => "sendfile",
        }
    }
}

/// The two kernel transfer calls the engine is built on
///
/// Both return the number of bytes moved, `0` at end of file, and advance the
/// offsets they are given.
pub trait CopyPrimitives {
    fn copy_file_range(
        &mut self,
        src: BorrowedFd<'_>,
        src_offset: &mut i64,
        dst: BorrowedFd<'_>,
        dst_offset: &mut i64,
        len: usize,
    ) -> io::Result<usize>;

    /// Copy from `src` at `src_offset` to the current position of `dst`
    fn sendfile(
        &mut self,
        dst: BorrowedFd<'_>,
        src: BorrowedFd<'_>,
        src_offset: &mut i64,
        len: usize,
    ) -> io::Result<usize>;
}

/// Direct system calls
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelPrimitives;

impl CopyPrimitives for KernelPrimitives {
    fn copy_file_range(
        &mut self,
        src: BorrowedFd<'_>,
        src_offset: &mut i64,
        dst: BorrowedFd<'_>,
        dst_offset: &mut i64,
        len: usize,
    ) -> io::Result<usize> {
        Ok(fcntl::copy_file_range(src, Some(src_offset), dst, Some(dst_offset), len)?)
    }

    fn sendfile(
        &mut self,
        dst: BorrowedFd<'_>,
        src: BorrowedFd<'_>,
        src_offset: &mut i64,
        len: usize,
    ) -> io::Result<usize> {
        Ok(sendfile::sendfile(dst, src, Some(src_offset), len)?)
    }
}

/// Outcome of one window copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: u64,
    /// Primitive that finished the copy
    pub primitive: Primitive,
}

#[derive(Debug)]
pub struct CopyEngine<P> {
    primitives: P,
    use_relay: bool,
}

impl<P: CopyPrimitives> CopyEngine<P> {
    pub fn new(primitives: P) -> Self {
        Self {
            primitives,
            use_relay: false,
        }
    }

    /// Whether a cross-device failure has moved every copy to `sendfile`
    pub fn uses_relay(&self) -> bool {
        self.use_relay
    }

    pub fn primitives(&self) -> &P {
        &self.primitives
    }

    /// Copy `window` from `src` into the same offsets of `dst`
    ///
    /// Stops early when the source reaches end of file.
    pub fn copy_range(
        &mut self,
        src: &File,
        dst: &File,
        window: CopyWindow,
    ) -> Result<CopyReport, EventError> {
        let mut src_offset = window.offset as i64;
        let mut dst_offset = window.offset as i64;
        let mut remaining = window.len;
        let mut copied = 0u64;

        if !self.use_relay {
            loop {
                if remaining == 0 {
                    return Ok(self.report(copied, Primitive::CopyFileRange));
                }
                let chunk = chunk_len(remaining);
                match self.primitives.copy_file_range(
                    src.as_fd(),
                    &mut src_offset,
                    dst.as_fd(),
                    &mut dst_offset,
                    chunk,
                ) {
                    Ok(0) => return Ok(self.report(copied, Primitive::CopyFileRange)),
                    Ok(n) => {
                        trace!(primitive = "copy_file_range", copied = n, remaining, "partial copy");
                        remaining -= n as u64;
                        copied += n as u64;
                    }
                    Err(err) if err.raw_os_error() == Some(Errno::EXDEV as i32) => {
                        info!(
                            operation = "copy_fallback",
                            offset = dst_offset,
                            "copy_file_range crossed filesystems; relaying with sendfile from now on"
                        );
                        self.use_relay = true;
                        break;
                    }
                    Err(source) => {
                        return Err(EventError::Copy {
                            primitive: Primitive::CopyFileRange.name(),
                            offset: dst_offset as u64,
                            source,
                        });
                    }
                }
            }
        }

        self.relay(src, dst, &mut src_offset, dst_offset, remaining, copied)
    }

    fn relay(
        &mut self,
        src: &File,
        mut dst: &File,
        src_offset: &mut i64,
        dst_offset: i64,
        mut remaining: u64,
        mut copied: u64,
    ) -> Result<CopyReport, EventError> {
        dst.seek(SeekFrom::Start(dst_offset as u64))
            .map_err(|source| EventError::Copy {
                primitive: "lseek",
                offset: dst_offset as u64,
                source,
            })?;

        while remaining > 0 {
            let chunk = chunk_len(remaining);
            let n = self
                .primitives
                .sendfile(dst.as_fd(), src.as_fd(), src_offset, chunk)
                .map_err(|source| EventError::Copy {
                    primitive: Primitive::Sendfile.name(),
                    offset: *src_offset as u64,
                    source,
                })?;
            if n == 0 {
                break;
            }
            trace!(primitive = "sendfile", copied = n, remaining, "partial copy");
            remaining -= n as u64;
            copied += n as u64;
        }

        Ok(self.report(copied, Primitive::Sendfile))
    }

    fn report(&self, copied: u64, primitive: Primitive) -> CopyReport {
        CopyReport { copied, primitive }
    }
}

/// Largest single request handed to the kernel
const MAX_CHUNK: u64 = 1 << 30;

fn chunk_len(remaining: u64) -> usize {
    remaining.min(MAX_CHUNK) as usize
}
