// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging utilities for the remote-fetch tools
//!
//! Every binary in the workspace (the hydration daemon, the populator and the
//! verifier) initializes `tracing` through this crate so that levels, formats
//! and log file placement behave the same way everywhere.

use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export Level for convenience
pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

/// CLI log level enum for clap integration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings, and informational messages
    #[default]
    Info,
    /// All above plus per-event activity
    Debug,
    /// All above plus individual copy calls
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Standardized CLI logging arguments
///
/// Use this with `#[command(flatten)]` in a clap struct. Binaries log to
/// stderr by default and to a file when `--log-file` or `--log-dir` is given.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, env = "REMOTE_FETCH_LOG_LEVEL")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, env = "REMOTE_FETCH_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Log filename
    #[arg(long)]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Initialize logging based on the parsed CLI arguments
    ///
    /// # Examples
    /// ```rust,no_run
    /// use rf_logging::CliLoggingArgs;
    /// use clap::Parser;
    ///
    /// #[derive(Parser)]
    /// struct Args {
    ///     #[command(flatten)]
    ///     logging: CliLoggingArgs,
    /// }
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let args = Args::parse();
    ///     args.logging.init("my-tool")?;
    ///     Ok(())
    /// }
    /// ```
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        self.init_with_default_level(component, CliLogLevel::Info)
    }

    pub fn init_with_default_level(
        self,
        component: &str,
        default_level: CliLogLevel,
    ) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or(default_level).into();
        let format = self.log_format.unwrap_or_default();

        if self.logs_to_file() {
            let log_path = self.resolve_log_path(component);
            init_to_file(component, level, format, &log_path)
        } else {
            init(component, level, format)
        }
    }

    /// Whether the arguments ask for file output instead of stderr
    pub fn logs_to_file(&self) -> bool {
        self.log_file.is_some() || self.log_dir.is_some()
    }

    /// Resolve the complete log file path
    ///
    /// 1. An absolute `log_file` is used directly
    /// 2. A relative `log_file` is placed under `log_dir` when one is given
    /// 3. Without `log_file`, `<log_dir>/<component>.log` is used
    /// 4. Otherwise the platform standard location is used
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => PathBuf::from(file),
            (Some(file), Some(dir)) => Path::new(dir).join(file),
            (Some(file), None) => PathBuf::from(file),
            (None, Some(dir)) => Path::new(dir).join(format!("{}.log", component)),
            (None, None) => get_standard_log_path_for_component(component),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log_level.is_none()
            && self.log_format.is_none()
            && self.log_dir.is_none()
            && self.log_file.is_none()
    }
}

/// Get the standard log file path for a specific component
///
/// Linux: `~/.local/share/remote-fetch/<component>.log`, falling back to
/// `/tmp` when no home directory is known.
pub fn get_standard_log_path_for_component(component: &str) -> PathBuf {
    let mut path = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")));
    path.push("remote-fetch");
    path.push(format!("{}.log", component));
    path
}

/// Initialize logging to stderr with the specified component name, default level, and format
///
/// # Example
/// ```rust,no_run
/// use rf_logging::{init, Level, LogFormat};
///
/// fn main() -> anyhow::Result<()> {
///     init("populate", Level::INFO, LogFormat::Plaintext)?;
///     tracing::info!("Application started");
///     Ok(())
/// }
/// ```
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging to a file, creating its parent directory if needed
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    init_with_writer(component, default_level, format, log_file)
}

/// Build the filter used when `RUST_LOG` is not set
///
/// Crate targets use underscores, so a component such as `remote-fetch` also
/// enables the `remote_fetch` target.
pub fn default_filter_directive(component: &str, default_level: Level) -> String {
    let target = component.replace('-', "_");
    format!("{},{}={}", default_level, target, default_level)
}

/// Initialize logging with a custom writer
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_directive(component, default_level)));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_log_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Info), Level::INFO);
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_cli_log_level_default() {
        let default: CliLogLevel = Default::default();
        assert_eq!(default, CliLogLevel::Info);
    }

    #[derive(clap::Parser)]
    struct TestCli {
        #[command(flatten)]
        logging: CliLoggingArgs,
    }

    #[test]
    fn test_logging_flags_parse() {
        use clap::Parser;

        let cli =
            TestCli::try_parse_from(["tool", "--log-format", "json", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.logging.log_format, Some(LogFormat::Json));
        assert_eq!(cli.logging.log_level, Some(CliLogLevel::Debug));
        assert!(TestCli::try_parse_from(["tool", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_console_is_default_destination() {
        let args = CliLoggingArgs::default();
        assert!(args.is_empty());
        assert!(!args.logs_to_file());

        let args = CliLoggingArgs {
            log_dir: Some("/var/log".to_string()),
            ..Default::default()
        };
        assert!(args.logs_to_file());
    }

    #[test]
    fn test_resolve_log_path() {
        let args = CliLoggingArgs {
            log_file: Some("/abs/daemon.log".to_string()),
            log_dir: Some("/ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(args.resolve_log_path("remote-fetch"), PathBuf::from("/abs/daemon.log"));

        let args = CliLoggingArgs {
            log_file: Some("daemon.log".to_string()),
            log_dir: Some("/var/log/rf".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("remote-fetch"),
            PathBuf::from("/var/log/rf/daemon.log")
        );

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/rf".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("remote-fetch"),
            PathBuf::from("/var/log/rf/remote-fetch.log")
        );
    }

    #[test]
    fn test_standard_log_path_for_component() {
        let path = get_standard_log_path_for_component("populate");
        assert!(path.ends_with("remote-fetch/populate.log"));
    }

    #[test]
    fn test_default_filter_directive_uses_crate_target() {
        assert_eq!(
            default_filter_directive("remote-fetch", Level::DEBUG),
            "DEBUG,remote_fetch=DEBUG"
        );
    }

    #[test]
    fn test_init_to_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("nested").join("rf.log");
        // A global subscriber may already be installed by another test; the
        // file must still be created before the subscriber is registered.
        let _ = init_to_file("rf-logging", Level::INFO, LogFormat::Plaintext, &log_path);
        assert!(log_path.exists());
    }
}
