// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fanotify wire format: event records read from the group, responses written to it
//!
//! Records are parsed straight from the read buffer in native byte order.
//!
//! ```text
//! fanotify_event_metadata (24 bytes)
//!   0  u32 event_len      total length including info records
//!   4  u8  vers           FANOTIFY_METADATA_VERSION
//!   5  u8  reserved
//!   6  u16 metadata_len   offset of the first info record
//!   8  u64 mask
//!  16  i32 fd
//!  20  i32 pid
//!
//! fanotify_event_info_range (16 bytes)
//!   0  u8  info_type      FAN_EVENT_INFO_TYPE_RANGE
//!   1  u8  pad
//!   2  u16 len
//!   4  u32 count
//!   8  u64 offset
//!
//! fanotify_response (8 bytes)
//!   0  i32 fd
//!   4  u32 response       FAN_ALLOW, or FAN_DENY | errno << FAN_ERRNO_SHIFT
//! ```

use std::os::fd::RawFd;

use crate::error::ProtocolError;

pub const FANOTIFY_METADATA_VERSION: u8 = 3;

pub const FAN_CLASS_PRE_CONTENT: u32 = 0x0000_0008;
pub const FAN_UNLIMITED_MARKS: u32 = 0x0000_0020;

pub const FAN_MARK_ADD: u32 = 0x0000_0001;
pub const FAN_MARK_REMOVE: u32 = 0x0000_0002;

/// Pre-content event raised before a read
pub const FAN_PRE_ACCESS: u64 = 0x0008_0000;
/// Pre-content event raised before a write
pub const FAN_PRE_MODIFY: u64 = 0x0010_0000;
/// Every event the daemon marks files for and knows how to answer
pub const FAN_EVENTS: u64 = FAN_PRE_ACCESS | FAN_PRE_MODIFY;

pub const FAN_EVENT_INFO_TYPE_RANGE: u8 = 6;

pub const FAN_ALLOW: u32 = 0x01;
pub const FAN_DENY: u32 = 0x02;
pub const FAN_NOFD: RawFd = -1;

pub const FAN_ERRNO_BITS: u32 = 8;
pub const FAN_ERRNO_SHIFT: u32 = 32 - FAN_ERRNO_BITS;
pub const FAN_ERRNO_MASK: u32 = (1 << FAN_ERRNO_BITS) - 1;

pub const FAN_EVENT_METADATA_LEN: usize = 24;
pub const FAN_EVENT_INFO_HEADER_LEN: usize = 4;
pub const FAN_EVENT_INFO_RANGE_LEN: usize = 16;
pub const FAN_RESPONSE_LEN: usize = 8;

/// Byte window carried by a range info record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeInfo {
    pub offset: u64,
    pub count: u32,
}

/// A validated event record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Descriptor the kernel opened for us; the reader must close it
    pub fd: RawFd,
    pub mask: u64,
    pub pid: i32,
    pub range: Option<RangeInfo>,
}

/// Iterator over the records of one read batch
///
/// Stops at the first record that does not fit in the buffer. A record that
/// fits but fails validation yields an error and ends the iteration.
pub struct EventRecords<'a> {
    buf: &'a [u8],
}

impl<'a> EventRecords<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl Iterator for EventRecords<'_> {
    type Item = Result<RawEvent, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < FAN_EVENT_METADATA_LEN {
            return None;
        }
        let event_len = read_u32(self.buf, 0) as usize;
        if event_len < FAN_EVENT_METADATA_LEN || event_len > self.buf.len() {
            return None;
        }

        let (record, rest) = self.buf.split_at(event_len);
        let parsed = parse_record(record);
        self.buf = if parsed.is_ok() { rest } else { &[] };
        Some(parsed)
    }
}

fn parse_record(record: &[u8]) -> Result<RawEvent, ProtocolError> {
    let vers = record[4];
    if vers != FANOTIFY_METADATA_VERSION {
        return Err(ProtocolError::Version {
            found: vers,
            expected: FANOTIFY_METADATA_VERSION,
        });
    }

    let metadata_len = read_u16(record, 6) as usize;
    if metadata_len < FAN_EVENT_METADATA_LEN || metadata_len > record.len() {
        return Err(ProtocolError::Truncated("metadata length out of bounds"));
    }

    let mask = read_u64(record, 8);
    let fd = read_i32(record, 16);
    let pid = read_i32(record, 20);

    if fd < 0 {
        return Err(ProtocolError::NoFd);
    }
    if mask & FAN_EVENTS == 0 {
        return Err(ProtocolError::Mask(mask));
    }

    let range = parse_info_records(&record[metadata_len..])?;

    Ok(RawEvent {
        fd,
        mask,
        pid,
        range,
    })
}

fn parse_info_records(mut info: &[u8]) -> Result<Option<RangeInfo>, ProtocolError> {
    let mut range = None;

    while !info.is_empty() {
        if info.len() < FAN_EVENT_INFO_HEADER_LEN {
            return Err(ProtocolError::Truncated("info header"));
        }
        let info_type = info[0];
        let len = read_u16(info, 2) as usize;
        if len < FAN_EVENT_INFO_HEADER_LEN || len > info.len() {
            return Err(ProtocolError::Truncated("info record length"));
        }

        if info_type == FAN_EVENT_INFO_TYPE_RANGE {
            if len < FAN_EVENT_INFO_RANGE_LEN {
                return Err(ProtocolError::Truncated("range info record"));
            }
            range = Some(RangeInfo {
                count: read_u32(info, 4),
                offset: read_u64(info, 8),
            });
        }

        info = &info[len..];
    }

    Ok(range)
}

/// Decision written back for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub fd: RawFd,
    pub response: u32,
}

impl Response {
    pub fn allow(fd: RawFd) -> Self {
        Self {
            fd,
            response: FAN_ALLOW,
        }
    }

    /// Deny the access, surfacing `errno` to the blocked caller
    pub fn deny(fd: RawFd, errno: i32) -> Self {
        Self {
            fd,
            response: FAN_DENY | (((errno as u32) & FAN_ERRNO_MASK) << FAN_ERRNO_SHIFT),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.response == FAN_ALLOW
    }

    /// The errno packed into a deny response, if any
    pub fn errno(&self) -> Option<i32> {
        if self.response & FAN_DENY == 0 {
            return None;
        }
        Some(((self.response >> FAN_ERRNO_SHIFT) & FAN_ERRNO_MASK) as i32)
    }

    pub fn to_bytes(&self) -> [u8; FAN_RESPONSE_LEN] {
        let mut bytes = [0u8; FAN_RESPONSE_LEN];
        bytes[..4].copy_from_slice(&self.fd.to_ne_bytes());
        bytes[4..].copy_from_slice(&self.response.to_ne_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; FAN_RESPONSE_LEN]) -> Self {
        Self {
            fd: read_i32(&bytes, 0),
            response: read_u32(&bytes, 4),
        }
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    read_u32(buf, at) as i32
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(bytes)
}

/// Serializes records the way the kernel lays them out
///
/// Used by tests and by fake notification sources.
pub mod encode {
    use super::*;

    pub fn event(fd: RawFd, mask: u64, range: Option<RangeInfo>) -> Vec<u8> {
        event_with_version(FANOTIFY_METADATA_VERSION, fd, mask, range)
    }

    pub fn event_with_version(
        vers: u8,
        fd: RawFd,
        mask: u64,
        range: Option<RangeInfo>,
    ) -> Vec<u8> {
        let info_len = if range.is_some() {
            FAN_EVENT_INFO_RANGE_LEN
        } else {
            0
        };
        let event_len = (FAN_EVENT_METADATA_LEN + info_len) as u32;

        let mut out = Vec::with_capacity(event_len as usize);
        out.extend_from_slice(&event_len.to_ne_bytes());
        out.push(vers);
        out.push(0);
        out.extend_from_slice(&(FAN_EVENT_METADATA_LEN as u16).to_ne_bytes());
        out.extend_from_slice(&mask.to_ne_bytes());
        out.extend_from_slice(&fd.to_ne_bytes());
        out.extend_from_slice(&(std::process::id() as i32).to_ne_bytes());

        if let Some(range) = range {
            out.extend_from_slice(&range_info(range));
        }
        out
    }

    pub fn range_info(range: RangeInfo) -> [u8; FAN_EVENT_INFO_RANGE_LEN] {
        let mut out = [0u8; FAN_EVENT_INFO_RANGE_LEN];
        out[0] = FAN_EVENT_INFO_TYPE_RANGE;
        out[2..4].copy_from_slice(&(FAN_EVENT_INFO_RANGE_LEN as u16).to_ne_bytes());
        out[4..8].copy_from_slice(&range.count.to_ne_bytes());
        out[8..16].copy_from_slice(&range.offset.to_ne_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(buf: &[u8]) -> Vec<Result<RawEvent, ProtocolError>> {
        EventRecords::new(buf).collect()
    }

    #[test]
    fn test_parses_event_without_range() {
        let buf = encode::event(7, FAN_PRE_ACCESS, None);
        let events = parse_all(&buf);
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.fd, 7);
        assert_eq!(event.mask, FAN_PRE_ACCESS);
        assert_eq!(event.range, None);
    }

    #[test]
    fn test_parses_range_hint() {
        let range = RangeInfo {
            offset: 5000,
            count: 100,
        };
        let buf = encode::event(9, FAN_PRE_MODIFY, Some(range));
        let event = EventRecords::new(&buf).next().unwrap().unwrap();
        assert_eq!(event.range, Some(range));
    }

    #[test]
    fn test_skips_unknown_info_records() {
        let mut buf = encode::event(3, FAN_PRE_ACCESS, None);
        // An 8-byte info record of an unrelated type
        buf.extend_from_slice(&[1, 0, 8, 0, 0xaa, 0xbb, 0xcc, 0xdd]);
        let event_len = buf.len() as u32;
        buf[..4].copy_from_slice(&event_len.to_ne_bytes());

        let event = EventRecords::new(&buf).next().unwrap().unwrap();
        assert_eq!(event.range, None);
    }

    #[test]
    fn test_parses_multiple_records_in_a_batch() {
        let mut buf = encode::event(3, FAN_PRE_ACCESS, None);
        buf.extend(encode::event(
            4,
            FAN_PRE_ACCESS,
            Some(RangeInfo {
                offset: 0,
                count: 4096,
            }),
        ));
        buf.extend(encode::event(5, FAN_PRE_MODIFY, None));

        let fds: Vec<RawFd> = parse_all(&buf).into_iter().map(|e| e.unwrap().fd).collect();
        assert_eq!(fds, vec![3, 4, 5]);
    }

    #[test]
    fn test_rejects_version_mismatch() {
        let buf = encode::event_with_version(2, 3, FAN_PRE_ACCESS, None);
        let events = parse_all(&buf);
        assert!(matches!(
            events[0],
            Err(ProtocolError::Version {
                found: 2,
                expected: FANOTIFY_METADATA_VERSION
            })
        ));
    }

    #[test]
    fn test_error_ends_iteration() {
        let mut buf = encode::event(3, FAN_PRE_ACCESS, None);
        buf.extend(encode::event(4, 0x1, None));
        buf.extend(encode::event(5, FAN_PRE_ACCESS, None));

        let events = parse_all(&buf);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ProtocolError::Mask(0x1))));
    }

    #[test]
    fn test_rejects_missing_descriptor() {
        let buf = encode::event(FAN_NOFD, FAN_PRE_ACCESS, None);
        assert!(matches!(parse_all(&buf)[0], Err(ProtocolError::NoFd)));
    }

    #[test]
    fn test_rejects_truncated_info_record() {
        let mut buf = encode::event(3, FAN_PRE_ACCESS, None);
        buf.extend_from_slice(&[FAN_EVENT_INFO_TYPE_RANGE, 0, 8, 0, 0, 0, 0, 0]);
        let event_len = buf.len() as u32;
        buf[..4].copy_from_slice(&event_len.to_ne_bytes());

        assert!(matches!(
            parse_all(&buf)[0],
            Err(ProtocolError::Truncated("range info record"))
        ));
    }

    #[test]
    fn test_partial_trailing_record_is_ignored() {
        let mut buf = encode::event(3, FAN_PRE_ACCESS, None);
        buf.extend_from_slice(&[0u8; 10]);
        assert_eq!(parse_all(&buf).len(), 1);
    }

    #[test]
    fn test_deny_packs_errno_into_high_bits() {
        let response = Response::deny(11, libc::EIO);
        assert_eq!(response.response, FAN_DENY | ((libc::EIO as u32) << 24));
        assert_eq!(response.errno(), Some(libc::EIO));
        assert!(!response.is_allow());

        let allow = Response::allow(11);
        assert!(allow.is_allow());
        assert_eq!(allow.errno(), None);
    }

    #[test]
    fn test_response_layout() {
        let response = Response::deny(42, libc::ENOENT);
        let bytes = response.to_bytes();
        assert_eq!(&bytes[..4], &42i32.to_ne_bytes());
        assert_eq!(Response::from_bytes(bytes), response);
    }
}
