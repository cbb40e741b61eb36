// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use clap::Parser;
use remote_fetch::{Cli, DaemonConfig, daemon};
use tracing::error;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            // Usage errors exit with 1 like every other setup failure
            let _ = err.print();
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };

    cli.logging.clone().init("remote-fetch")?;

    let span = tracing::info_span!("daemon", component = "remote-fetch");
    let _enter = span.enter();

    let config = DaemonConfig::from_cli(&cli).context("invalid configuration")?;

    if let Err(err) = daemon::run(&config) {
        error!(error = %err, "daemon stopped");
        return Err(err.into());
    }
    Ok(())
}
