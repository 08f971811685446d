//! Runtime configuration loaded from `config.toml`.
//!
//! Everything the crawler needs is resolved here once at startup;
//! nothing reads ambient environment state mid-run. A missing file
//! falls back to usable defaults so the binary works out of the box
//! against a public RPC endpoint.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// HTTP JSON-RPC endpoint of the chain node.
    pub(crate) rpc_url: String,
    /// Directory holding the Parquet block table.
    pub(crate) data_dir: PathBuf,
    /// Default worker pool size (overridable per command with
    /// `--jobs`).
    pub(crate) workers: usize,
    /// Blocks per dispatched chunk.
    pub(crate) chunk_size: u64,
    /// Seconds the sync loop sleeps when caught up with the tip.
    pub(crate) poll_interval_secs: u64,
    /// Optional journal to publish listing reports to.
    pub(crate) telemetry: Option<TelemetryConfig>,
}

/// Telemetry journal endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TelemetryConfig {
    /// Report ingestion URL.
    pub(crate) url: String,
    /// Bearer token.
    pub(crate) token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://ethereum-rpc.publicnode.com".to_owned(),
            data_dir: PathBuf::from("data"),
            workers: 4,
            chunk_size: 1000,
            poll_interval_secs: 5,
            telemetry: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    ///
    /// Returns the defaults if the file does not exist, allowing the
    /// binary to work without any config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or
    /// parsed, or if a value fails validation.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.rpc_url.is_empty() {
            bail!("rpc_url must not be empty");
        }
        if let Some(telemetry) = &self.telemetry {
            if telemetry.url.is_empty() || telemetry.token.is_empty() {
                bail!("telemetry requires both url and token");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.chunk_size, 1000);
    }

    #[test]
    fn zero_workers_are_rejected() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("workers = 12").unwrap();
        assert_eq!(config.workers, 12);
        assert_eq!(config.chunk_size, 1000);
        assert!(config.telemetry.is_none());
    }
}
