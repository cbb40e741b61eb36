// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pattern file creation and validation
//!
//! Validation first reads random ranges with `pread`, then maps the whole
//! file and compares random ranges followed by every page in order. Reading
//! through a placeholder that the daemon hydrates only partially exercises
//! both the ranged and the whole-file hydration paths.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::pattern::{FILE_SIZE, PAGE_SIZE, generate_pattern};

const RANDOM_CHECKS: usize = 5;
const DUMP_COLUMNS: usize = 32;

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("opening {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading {len} bytes at {offset}: {source}")]
    Read {
        offset: u64,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("file is {len} bytes, expected at least {}", FILE_SIZE)]
    ShortFile { len: u64 },

    #[error("mapping file: {0}")]
    Map(#[source] io::Error),
}

/// First range whose contents differ from the pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// `read` or `mmap`
    pub check: &'static str,
    pub offset: usize,
    pub len: usize,
    pub read_dump: String,
    pub valid_dump: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Buffers do not match at off {} size {} after {}",
            self.offset, self.len, self.check
        )?;
        writeln!(f, "read buffer")?;
        write!(f, "{}", self.read_dump)?;
        writeln!(f, "valid buffer")?;
        write!(f, "{}", self.valid_dump)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub file: PathBuf,
    pub seed: Option<u64>,
    pub read_checks: usize,
    pub mmap_checks: usize,
    pub pages_checked: usize,
    pub mismatch: Option<Mismatch>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.mismatch.is_none()
    }
}

/// Write the pattern to `path`, creating it with mode 0644 when absent
pub fn create_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)?;
    file.write_all(&generate_pattern())?;
    info!(operation = "create", file = %path.display(), size = FILE_SIZE, "pattern written");
    Ok(())
}

/// Lines of `offset:` followed by 32 bytes in groups of eight
fn dump(buf: &[u8], offset: usize) -> String {
    let mut out = String::new();
    for (line, chunk) in buf.chunks(DUMP_COLUMNS).enumerate() {
        let _ = write!(out, "{}:", offset + line * DUMP_COLUMNS);
        for (col, &byte) in chunk.iter().enumerate() {
            if col % 8 == 0 {
                out.push(' ');
            }
            out.push(if byte.is_ascii_graphic() { byte as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

fn compare(check: &'static str, actual: &[u8], expected: &[u8], offset: usize) -> Option<Mismatch> {
    if actual == expected {
        return None;
    }
    Some(Mismatch {
        check,
        offset,
        len: expected.len(),
        read_dump: dump(actual, offset),
        valid_dump: dump(expected, offset),
    })
}

pub struct Validator {
    rng: SmallRng,
    seed: Option<u64>,
    pattern: Vec<u8>,
}

impl Validator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            rng,
            seed,
            pattern: generate_pattern(),
        }
    }

    /// Random offset in the file and a length below one page, clamped to the end
    fn random_range(&mut self) -> (usize, usize) {
        let offset = self.rng.gen_range(0..FILE_SIZE);
        let len = self.rng.gen_range(0..PAGE_SIZE).min(FILE_SIZE - offset);
        (offset, len)
    }

    pub fn validate_file(&mut self, path: &Path) -> Result<ValidationReport, ValidateError> {
        let file = File::open(path).map_err(|source| ValidateError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut report = ValidationReport {
            file: path.to_path_buf(),
            seed: self.seed,
            read_checks: 0,
            mmap_checks: 0,
            pages_checked: 0,
            mismatch: None,
        };

        for _ in 0..RANDOM_CHECKS {
            let (offset, len) = self.random_range();
            let buf = read_range(&file, offset, len)?;
            report.read_checks += 1;
            debug!(check = "read", offset, len, "validating range");
            if let Some(mismatch) = compare("read", &buf, &self.pattern[offset..offset + len], offset) {
                report.mismatch = Some(mismatch);
                return Ok(report);
            }
        }

        // Mapping past the end of the file would fault instead of failing
        let file_len = file
            .metadata()
            .map_err(|source| ValidateError::Read {
                offset: 0,
                len: 0,
                source,
            })?
            .len();
        if file_len < FILE_SIZE as u64 {
            return Err(ValidateError::ShortFile { len: file_len });
        }
        // SAFETY: the mapping is read-only and the file is not truncated while we hold it
        let map = unsafe { MmapOptions::new().len(FILE_SIZE).map(&file) }.map_err(ValidateError::Map)?;

        for _ in 0..RANDOM_CHECKS {
            let (offset, len) = self.random_range();
            report.mmap_checks += 1;
            debug!(check = "mmap", offset, len, "validating range");
            let end = offset + len;
            if let Some(mismatch) = compare("mmap", &map[offset..end], &self.pattern[offset..end], offset) {
                report.mismatch = Some(mismatch);
                return Ok(report);
            }
        }

        for offset in (0..FILE_SIZE).step_by(PAGE_SIZE) {
            let end = offset + PAGE_SIZE;
            report.pages_checked += 1;
            if let Some(mismatch) = compare("mmap", &map[offset..end], &self.pattern[offset..end], offset) {
                report.mismatch = Some(mismatch);
                return Ok(report);
            }
        }

        info!(operation = "validate", file = %path.display(), "file matches pattern");
        Ok(report)
    }
}

/// Positional read of `len` bytes; bytes past end of file stay zero
fn read_range(file: &File, offset: usize, len: usize) -> Result<Vec<u8>, ValidateError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], (offset + filled) as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ValidateError::Read {
                    offset: offset as u64,
                    len,
                    source,
                });
            }
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pattern");
        create_file(&path).unwrap();

        let report = Validator::new(Some(7)).validate_file(&path).unwrap();
        assert!(report.passed());
        assert_eq!(report.read_checks, RANDOM_CHECKS);
        assert_eq!(report.mmap_checks, RANDOM_CHECKS);
        assert_eq!(report.pages_checked, FILE_SIZE / PAGE_SIZE);
        assert_eq!(report.seed, Some(7));
    }

    #[test]
    fn test_corrupted_page_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pattern");
        create_file(&path).unwrap();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all_at(&[b'#'; 16], (200 * PAGE_SIZE + 100) as u64).unwrap();

        let report = Validator::new(Some(1)).validate_file(&path).unwrap();
        let mismatch = report.mismatch.expect("corruption must be detected");
        assert!(mismatch.offset < 200 * PAGE_SIZE + 116);
        assert!(mismatch.read_dump.contains('#'));
        assert!(!mismatch.valid_dump.contains('#'));
    }

    #[test]
    fn test_short_file_is_rejected_before_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, b"").unwrap();

        let result = Validator::new(Some(3)).validate_file(&path);
        match result {
            Err(ValidateError::ShortFile { len: 0 }) => {}
            // An empty file differs from the pattern on the first non-empty read
            Ok(report) => assert!(!report.passed()),
            Err(err) => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn test_same_seed_gives_same_ranges() {
        let mut a = Validator::new(Some(42));
        let mut b = Validator::new(Some(42));
        for _ in 0..10 {
            let (offset, len) = a.random_range();
            assert_eq!((offset, len), b.random_range());
            assert!(offset + len <= FILE_SIZE);
            assert!(len < PAGE_SIZE);
        }
    }

    #[test]
    fn test_dump_layout() {
        let text = dump(&[b'a'; 40], 4096);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "4096: aaaaaaaa aaaaaaaa aaaaaaaa aaaaaaaa");
        assert_eq!(lines[1], "4128: aaaaaaaa");
    }
}
