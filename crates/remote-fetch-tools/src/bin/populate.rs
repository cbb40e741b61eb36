// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use remote_fetch_tools::populate_tree;
use rf_logging::{CliLogLevel, CliLoggingArgs};

#[derive(Parser, Debug)]
#[command(
    name = "populate",
    author,
    version,
    about = "Recreate a source tree as empty placeholders of the same size"
)]
struct Cli {
    /// Tree to mirror
    src: PathBuf,

    /// Existing directory that receives the placeholders
    dst: PathBuf,

    /// Print a JSON summary on stdout
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
    cli.logging.clone().init_with_default_level("populate", CliLogLevel::Warn)?;

    let stats = populate_tree(&cli.src, &cli.dst)
        .with_context(|| format!("populating {} from {}", cli.dst.display(), cli.src.display()))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
