// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mirror a source tree as sparse placeholders
//!
//! Directories are recreated with the source's permission bits. Regular files
//! become empty files of the source's logical size, flushed to disk with their
//! page cache dropped, so the first access has to go through the hydration
//! daemon. Symlinks and special files are skipped.

use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

const PERMISSION_BITS: u32 = 0o7777;

#[derive(Error, Debug)]
pub enum PopulateError {
    #[error("walking source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PopulateError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopulateStats {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Recreate `src` below `dst` as placeholders
///
/// `dst` itself must already exist. Existing entries below it are an error.
pub fn populate_tree(src: &Path, dst: &Path) -> Result<PopulateStats, PopulateError> {
    let mut stats = PopulateStats::default();

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mode = entry.metadata()?.permissions().mode() & PERMISSION_BITS;
            DirBuilder::new()
                .mode(mode)
                .create(&target)
                .map_err(PopulateError::io("mkdir", &target))?;
            // The creation mode went through the umask
            fs::set_permissions(&target, Permissions::from_mode(mode))
                .map_err(PopulateError::io("chmod", &target))?;
            debug!(path = %target.display(), mode = format!("{mode:o}"), "directory created");
            stats.directories += 1;
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            let mode = metadata.permissions().mode() & PERMISSION_BITS;
            create_placeholder(&target, mode, metadata.len())?;
            debug!(path = %target.display(), size = metadata.len(), "placeholder created");
            stats.files += 1;
            stats.bytes += metadata.len();
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular entry");
            stats.skipped += 1;
        }
    }

    info!(
        operation = "populate",
        src = %src.display(),
        dst = %dst.display(),
        directories = stats.directories,
        files = stats.files,
        "tree populated"
    );
    Ok(stats)
}

fn create_placeholder(path: &Path, mode: u32, size: u64) -> Result<(), PopulateError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(mode)
        .open(path)
        .map_err(PopulateError::io("create", path))?;
    file.set_permissions(Permissions::from_mode(mode))
        .map_err(PopulateError::io("chmod", path))?;

    file.set_len(size).map_err(PopulateError::io("truncate", path))?;
    file.sync_all().map_err(PopulateError::io("fsync", path))?;
    drop_cache(&file).map_err(PopulateError::io("fadvise", path))?;
    Ok(())
}

fn drop_cache(file: &File) -> io::Result<()> {
    // posix_fadvise returns the error number instead of setting errno
    // SAFETY: `file` keeps the descriptor open for the duration of the call
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
