//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT - "json" or "text" (default: "text")
//!   LOG_ANSI   - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG   - standard env filter (default: "strata=info")
//!
//! Logs go to stderr so stdout stays free for command output.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strata_core::{Error, Result};

/// Filter applied when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "strata=info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or(LogFormat::Text)
    }
}

/// Install the global subscriber.
///
/// Fails with [`Error::Config`] when a subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    let format = LogFormat::from_env();
    let ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).try_init()
        }
    };
    installed.map_err(|e| Error::Config(format!("tracing already initialized: {}", e)))?;

    info!(log_format = ?format, "Logging initialized");
    Ok(())
}
