// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fanotify notification group
//!
//! The group is created in the pre-content class so that marked files raise
//! blocking events before their content is read or written. Event descriptors
//! are opened write-only so the daemon can fill them in place.

use std::ffi::CString;
use std::io::{self, Error, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use tracing::trace;

use crate::proto::{
    FAN_CLASS_PRE_CONTENT, FAN_EVENTS, FAN_MARK_ADD, FAN_MARK_REMOVE, FAN_UNLIMITED_MARKS,
    Response,
};

/// Where event records come from and where decisions go
pub trait NotificationSource {
    /// Read the next batch of records into `buf`, returning the byte count
    ///
    /// An interrupted wait returns an empty batch.
    fn read_batch(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Deliver the decision for one event
    fn respond(&mut self, response: Response) -> io::Result<()>;
}

/// Installs and removes per-file pre-content marks
pub trait MarkControl {
    fn add_mark(&mut self, path: &Path) -> io::Result<()>;

    /// Stop watching `path`; fails with `ENOENT` when no mark is present
    fn remove_mark(&mut self, path: &Path) -> io::Result<()>;
}

/// Kernel-backed notification group
#[derive(Debug)]
pub struct Fanotify {
    fd: OwnedFd,
}

impl Fanotify {
    pub fn init() -> io::Result<Self> {
        // SAFETY: plain syscall with integer arguments
        let fd = unsafe {
            libc::fanotify_init(
                FAN_CLASS_PRE_CONTENT | FAN_UNLIMITED_MARKS,
                (libc::O_WRONLY | libc::O_LARGEFILE) as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        // SAFETY: fanotify_init returned a fresh descriptor that nothing else owns
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    fn mark(&self, flags: u32, path: &Path) -> io::Result<()> {
        let path_cstr = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "path contains null byte"))?;

        // SAFETY: the group descriptor is owned by `self` and `path_cstr` outlives the call
        let result = unsafe {
            libc::fanotify_mark(
                self.fd.as_raw_fd(),
                flags,
                FAN_EVENTS,
                libc::AT_FDCWD,
                path_cstr.as_ptr(),
            )
        };
        if result < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Fanotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl NotificationSource for Fanotify {
    fn read_batch(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: the kernel writes at most `buf.len()` bytes into `buf`
        let result = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if result < 0 {
            let err = Error::last_os_error();
            if err.raw_os_error() == Some(Errno::EINTR as i32) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(result as usize)
    }

    fn respond(&mut self, response: Response) -> io::Result<()> {
        let bytes = response.to_bytes();
        // SAFETY: `bytes` is a live buffer of the length passed
        let result = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };
        if result < 0 {
            return Err(Error::last_os_error());
        }
        if result as usize != bytes.len() {
            return Err(Error::new(ErrorKind::WriteZero, "short fanotify response write"));
        }
        trace!(fd = response.fd, response = response.response, "response written");
        Ok(())
    }
}

impl MarkControl for Fanotify {
    fn add_mark(&mut self, path: &Path) -> io::Result<()> {
        self.mark(FAN_MARK_ADD, path)
    }

    fn remove_mark(&mut self, path: &Path) -> io::Result<()> {
        self.mark(FAN_MARK_REMOVE, path)
    }
}
