// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use remote_fetch_tools::{Validator, create_file};
use rf_logging::{CliLogLevel, CliLoggingArgs};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Write the page pattern into the file
    Create,
    /// Check the file against the page pattern
    Validate,
}

#[derive(Parser, Debug)]
#[command(
    name = "mmap-validate",
    author,
    version,
    about = "Write or verify a 1 MiB page pattern through pread and mmap"
)]
struct Cli {
    #[arg(value_enum)]
    mode: Mode,

    file: PathBuf,

    /// Seed for the random ranges
    #[arg(long)]
    seed: Option<u64>,

    /// Print the validation report as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };
    cli.logging.clone().init_with_default_level("mmap-validate", CliLogLevel::Warn)?;

    match cli.mode {
        Mode::Create => {
            create_file(&cli.file).with_context(|| format!("writing {}", cli.file.display()))?;
        }
        Mode::Validate => {
            let report = Validator::new(cli.seed)
                .validate_file(&cli.file)
                .with_context(|| format!("validating {}", cli.file.display()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if let Some(mismatch) = &report.mismatch {
                print!("{mismatch}");
            }
            if !report.passed() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
