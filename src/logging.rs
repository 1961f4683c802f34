//! Structured logging setup using tracing

use crate::error::{Result, StagehandError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output (default for a terminal build tool)
    Pretty,
    /// One JSON object per line, for log collectors
    Json,
}

impl FromStr for LogFormat {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(StagehandError::Validation(format!(
                "Unknown log format '{other}' (expected 'pretty' or 'json')"
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
        }
    }
}

/// Parse a log level name; unknown names are rejected rather than silently
/// downgraded
pub fn parse_level(s: &str) -> Result<Level> {
    Level::from_str(s).map_err(|_| {
        StagehandError::Validation(format!(
            "Unknown log level '{s}' (expected error, warn, info, debug, or trace)"
        ))
    })
}

/// Initialize the global subscriber.
///
/// Logs go to stderr so task status lines on stdout stay machine-readable.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    match config.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .json()
                .with_max_level(config.level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(config.level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error").unwrap(), Level::ERROR);
        assert_eq!(parse_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert!(parse_level("shouting").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
