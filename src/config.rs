use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SHEET_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { name: &'static str, value: String },
}

/// Runtime settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where attempt records are POSTed. Logging is disabled when unset.
    pub webhook_url: Option<String>,
    /// The published results sheet: an http(s) URL or a local file path.
    pub sheet_source: Option<String>,
    /// Directory holding the five stage datasets.
    pub data_dir: PathBuf,
    /// Address players should open, encoded in the admin QR code.
    pub public_url: Option<String>,
    pub sheet_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let sheet_cache_ttl = match get("SHEET_CACHE_TTL_SECS") {
            Some(value) => {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidSeconds {
                        name: "SHEET_CACHE_TTL_SECS",
                        value,
                    })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_SHEET_CACHE_TTL_SECS),
        };

        Ok(Config {
            webhook_url: get("WEBHOOK_URL"),
            sheet_source: get("SHEET_CSV_URL"),
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            public_url: get("PUBLIC_URL"),
            sheet_cache_ttl,
        })
    }
}
