// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Startup mark installation over the destination tree

use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::completion::CompletionTracker;
use crate::error::SetupError;
use crate::fanotify::MarkControl;

/// Mark every regular file below `root`, depth first
///
/// Symlinks are not followed and, like other non-regular entries, are not
/// marked. Any unreadable directory or refused mark aborts the walk.
/// Returns the number of marks installed.
pub fn install_marks<M: MarkControl>(
    root: &Path,
    marks: &mut M,
    tracker: &mut CompletionTracker,
) -> Result<usize, SetupError> {
    let mut installed = 0;

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        marks.add_mark(path).map_err(|source| SetupError::Mark {
            path: path.to_path_buf(),
            source,
        })?;

        if let Ok(rel) = path.strip_prefix(root) {
            tracker.watch(rel);
        }
        debug!(path = %path.display(), "mark installed");
        installed += 1;
    }

    info!(operation = "install_marks", root = %root.display(), installed, "destination tree marked");
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingMarks {
        added: Vec<PathBuf>,
        refuse: Option<PathBuf>,
    }

    impl MarkControl for RecordingMarks {
        fn add_mark(&mut self, path: &Path) -> io::Result<()> {
            if self.refuse.as_deref() == Some(path) {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            self.added.push(path.to_path_buf());
            Ok(())
        }

        fn remove_mark(&mut self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_marks_only_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("top"), b"").unwrap();
        std::fs::write(root.join("a/mid"), b"").unwrap();
        std::fs::write(root.join("a/b/deep"), b"").unwrap();
        std::os::unix::fs::symlink(root.join("top"), root.join("link")).unwrap();

        let mut marks = RecordingMarks::default();
        let mut tracker = CompletionTracker::new();
        let installed = install_marks(root, &mut marks, &mut tracker).unwrap();

        assert_eq!(installed, 3);
        let mut added: Vec<_> =
            marks.added.iter().map(|p| p.strip_prefix(root).unwrap().to_path_buf()).collect();
        added.sort();
        assert_eq!(
            added,
            vec![PathBuf::from("a/b/deep"), PathBuf::from("a/mid"), PathBuf::from("top")]
        );
        assert_eq!(tracker.active_count(), 3);
        assert!(tracker.state(Path::new("a/b/deep")).is_some());
        assert!(tracker.state(Path::new("link")).is_none());
    }

    #[test]
    fn test_refused_mark_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("file"), b"").unwrap();

        let mut marks = RecordingMarks {
            refuse: Some(root.join("file")),
            ..Default::default()
        };
        let mut tracker = CompletionTracker::new();
        let err = install_marks(root, &mut marks, &mut tracker).unwrap_err();
        assert!(matches!(err, SetupError::Mark { .. }));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let mut marks = RecordingMarks::default();
        let mut tracker = CompletionTracker::new();
        let err =
            install_marks(Path::new("/nonexistent/remote-fetch"), &mut marks, &mut tracker)
                .unwrap_err();
        assert!(matches!(err, SetupError::Walk(_)));
    }
}
