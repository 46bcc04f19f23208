//! Structured logging for the command line
//!
//! Logs go to stderr so stdout only carries the progress lines printed by
//! the commands. `RUST_LOG` overrides the level given on the command line.

use serde_json::json;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the migration crates (e.g. "info", "debug", "warn")
    pub level: String,
    /// Emit one JSON object per event instead of text
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, json_format: bool) -> Self {
        let level = level.into();
        Self {
            include_location: level.eq_ignore_ascii_case("debug") || level.eq_ignore_ascii_case("trace"),
            level,
            json_format,
        }
    }

    /// Filter applied when `RUST_LOG` is not set. sqlx logs every statement
    /// at info, so it stays at warn.
    pub fn default_filter(&self) -> String {
        format!(
            "dbmigrate={level},dbmigrate_engine={level},sqlx=warn",
            level = self.level
        )
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.default_filter()))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
        tracing::debug!(
            target: "dbmigrate::logging",
            "{}",
            json!({ "message": "Structured logging initialized", "level": config.level })
        );
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        tracing::debug!(target: "dbmigrate::logging", level = %config.level, "Logging initialized");
    }

    Ok(())
}
