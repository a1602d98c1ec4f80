//! flowd configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `FLOWD_*` environment variables (e.g. `FLOWD_LISTEN_ADDR`). Command line
//! flags are applied on top by the binary.

use crate::store::history::HistoryKind;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// 4 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowdConfig {
    /// Listen address for the HTTP server
    pub listen_addr: String,

    /// History strategy for new flow keys
    pub history: HistoryKind,

    /// Max accepted size of a write request body in bytes
    pub max_body_bytes: usize,

    /// Log output format
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format: {}", s),
        }
    }
}

impl Default for FlowdConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            history: HistoryKind::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            log_format: LogFormat::default(),
        }
    }
}

impl FlowdConfig {
    /// Load configuration from defaults, `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("listen_addr", DEFAULT_LISTEN_ADDR)?
            .set_default("history", HistoryKind::default().as_str())?
            .set_default("max_body_bytes", DEFAULT_MAX_BODY_BYTES as i64)?
            .set_default("log_format", "text")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("FLOWD").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("Invalid listen address: {}", self.listen_addr);
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be greater than 0");
        }
        Ok(())
    }
}
