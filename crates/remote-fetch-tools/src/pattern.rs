// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The page pattern shared by `create` and `validate`

pub const FILE_SIZE: usize = 1024 * 1024;
pub const PAGE_SIZE: usize = 4096;

/// Byte expected at `offset`: page `i` is filled with `'a' + i % 26`
pub fn byte_at(offset: usize) -> u8 {
    b'a' + ((offset / PAGE_SIZE) % 26) as u8
}

pub fn generate_pattern() -> Vec<u8> {
    (0..FILE_SIZE).map(byte_at).collect()
}
