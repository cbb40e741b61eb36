// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Page alignment of requested byte windows

use std::io;

/// Byte range copied from the source file into the destination file
///
/// Both trees mirror each other, so the source and destination offsets are
/// the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyWindow {
    pub offset: u64,
    pub len: u64,
}

impl CopyWindow {
    /// Widen `[offset, offset + len)` outward to page boundaries
    ///
    /// `page_size` must be a power of two.
    pub fn aligned(offset: u64, len: u64, page_size: u64) -> Self {
        debug_assert!(page_size.is_power_of_two());
        let mask = page_size - 1;

        let start = offset & !mask;
        let end = offset.saturating_add(len);
        let end = match end.checked_add(mask) {
            Some(end) => end & !mask,
            None => u64::MAX & !mask,
        };

        Self {
            offset: start,
            len: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// System page size in bytes
pub fn page_size() -> io::Result<u64> {
    // SAFETY: sysconf has no memory-safety preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 4096;

    #[test]
    fn test_sub_page_hint_covers_its_page() {
        let window = CopyWindow::aligned(5000, 100, PAGE);
        assert_eq!(window, CopyWindow { offset: 4096, len: 4096 });
        assert_eq!(window.end(), 8192);
    }

    #[test]
    fn test_aligned_request_is_unchanged() {
        assert_eq!(
            CopyWindow::aligned(8192, 8192, PAGE),
            CopyWindow { offset: 8192, len: 8192 }
        );
    }

    #[test]
    fn test_window_straddling_pages() {
        let window = CopyWindow::aligned(4095, 2, PAGE);
        assert_eq!(window, CopyWindow { offset: 0, len: 8192 });
    }

    #[test]
    fn test_window_is_floor_and_ceil_of_request() {
        for (offset, len) in [(0, 1), (1, 4095), (4097, 8191), (123_456, 7_890), (1 << 20, 3)] {
            let window = CopyWindow::aligned(offset, len, PAGE);
            assert_eq!(window.offset, offset / PAGE * PAGE);
            assert_eq!(window.end(), (offset + len).div_ceil(PAGE) * PAGE);
            assert!(window.offset <= offset && window.end() >= offset + len);
        }
    }

    #[test]
    fn test_empty_request_on_boundary_is_empty() {
        assert!(CopyWindow::aligned(4096, 0, PAGE).is_empty());
    }

    #[test]
    fn test_end_saturates_near_u64_max() {
        let window = CopyWindow::aligned(u64::MAX - 10, 100, PAGE);
        assert_eq!(window.offset, (u64::MAX - 10) & !(PAGE - 1));
        assert_eq!(window.end(), u64::MAX & !(PAGE - 1));
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size().unwrap();
        assert!(size.is_power_of_two());
    }
}
