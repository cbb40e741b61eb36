// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command line and validated daemon configuration

use std::path::PathBuf;

use clap::Parser;
use rf_logging::CliLoggingArgs;

use crate::error::SetupError;
use crate::paths::normalize_root;
use crate::proto::FAN_EVENT_METADATA_LEN;
use crate::range;

pub const DEFAULT_BATCH_RECORDS: u32 = 200;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "remote-fetch",
    author,
    version,
    about = "Hydrate placeholder files on first access from a mirrored source tree"
)]
pub struct Cli {
    /// Directory holding the real content
    #[arg(env = "REMOTE_FETCH_SOURCE")]
    pub source: PathBuf,

    /// Directory of placeholder files to watch
    #[arg(env = "REMOTE_FETCH_DESTINATION")]
    pub destination: PathBuf,

    /// Number of event records read from the kernel at once
    #[arg(
        long,
        env = "REMOTE_FETCH_BATCH_RECORDS",
        default_value_t = DEFAULT_BATCH_RECORDS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub batch_records: u32,

    /// Override the system page size used for range alignment
    #[arg(long, hide = true)]
    pub page_size: Option<u64>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,
}

/// Validated configuration the daemon runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub page_size: u64,
    pub batch_records: usize,
}

impl DaemonConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, SetupError> {
        Self::new(
            cli.source.clone(),
            cli.destination.clone(),
            cli.page_size,
            cli.batch_records as usize,
        )
    }

    pub fn new(
        source: PathBuf,
        destination: PathBuf,
        page_size: Option<u64>,
        batch_records: usize,
    ) -> Result<Self, SetupError> {
        let page_size = match page_size {
            Some(size) => size,
            None => range::page_size().map_err(SetupError::PageSize)?,
        };
        if !page_size.is_power_of_two() {
            return Err(SetupError::InvalidPageSize(page_size));
        }

        let destination_root = destination.canonicalize().map_err(|source| SetupError::Root {
            path: destination.clone(),
            source,
        })?;
        if !destination_root.is_dir() {
            return Err(SetupError::NotADirectory(destination_root));
        }

        let source_root = normalize_root(&source).map_err(|source_err| SetupError::Root {
            path: source.clone(),
            source: source_err,
        })?;

        Ok(Self {
            source_root,
            destination_root,
            page_size,
            batch_records: batch_records.max(1),
        })
    }

    /// Size of the buffer each read from the notification group fills
    pub fn batch_bytes(&self) -> usize {
        self.batch_records * FAN_EVENT_METADATA_LEN
    }
}
