//! Logging for the exporter binary and its tests.
//!
//! Unless a filter is given, the exporter's own crates log at `info` and everything else (the
//! database drivers, hyper) at `warn`, since driver logs repeat on every scrape.

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Filter used when `--log-level` isn't set
pub const DEFAULT_FILTER: &str = "warn,db_exporter=info,query_catalog=info,database_utils=info";

/// Environment variable read for the filter of [`init_test_logging`]
const TEST_FILTER_ENV: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// One line per event, without span fields
    Compact,
    /// One line per event, with the fields of every enclosing span
    #[default]
    Full,
    /// Multi-line, for reading on a terminal
    Pretty,
    /// One JSON object per event, for log collectors
    Json,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("Could not install the global subscriber: {0}")]
    Init(#[from] SetGlobalDefaultError),
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[group(id = "LoggingOptions")]
pub struct Options {
    /// Format of emitted log events
    #[clap(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Log filter, as a comma separated list of `EnvFilter` directives, eg
    /// `warn,db_exporter=debug`. Defaults to `info` for the exporter and `warn` for its
    /// dependencies.
    #[clap(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Options {
    /// The filter these options select
    pub fn filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_new(self.log_level.as_deref().unwrap_or(DEFAULT_FILTER))
    }

    /// Installs the global subscriber. Fails if one is already installed.
    pub fn init(&self) -> Result<(), LoggingError> {
        let s = tracing_subscriber::fmt().with_env_filter(self.filter()?);
        match self.log_format {
            LogFormat::Compact => set_global_default(s.compact().finish())?,
            LogFormat::Full => set_global_default(s.finish())?,
            LogFormat::Pretty => set_global_default(s.pretty().finish())?,
            LogFormat::Json => set_global_default(
                s.json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .finish(),
            )?,
        }
        Ok(())
    }
}

/// Routes logs through the test harness's captured output. Quiet (`warn`) unless `LOG_LEVEL` is
/// set. Safe to call from every test.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_env(TEST_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scope_the_filter_to_the_exporter() {
        let filter = Options::default().filter().unwrap().to_string();
        assert!(filter.contains("db_exporter=info"), "{filter}");
        assert!(filter.contains("query_catalog=info"), "{filter}");
    }

    #[test]
    fn explicit_options() {
        let opts = Options::parse_from([
            "db-exporter",
            "--log-format",
            "json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(opts.log_format, LogFormat::Json);
        assert_eq!(opts.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn invalid_options() {
        assert!(Options::try_parse_from(["db-exporter", "--log-format", "xml"]).is_err());
        let opts = Options {
            log_level: Some("db_exporter=loud".to_owned()),
            ..Default::default()
        };
        assert!(matches!(opts.init(), Err(LoggingError::Filter(_))));
    }
}
