// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Companion tools for exercising remote-fetch
//!
//! `populate` turns a source tree into a tree of sparse placeholders with the
//! same names, modes and sizes. `mmap-validate` writes a known page pattern
//! into a file and later checks that reads through a hydrated placeholder see
//! exactly that pattern, both through `pread` and through a shared mapping.

pub mod pattern;
pub mod populate;
pub mod validate;

pub use pattern::{FILE_SIZE, PAGE_SIZE, generate_pattern};
pub use populate::{PopulateError, PopulateStats, populate_tree};
pub use validate::{Mismatch, ValidateError, ValidationReport, Validator, create_file};
