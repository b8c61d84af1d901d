// src/config.rs

use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Environment variables consulted when the config file carries no
/// credentials, so secrets can stay out of on-disk config.
const ENV_API_KEY_ID: &str = "CENSYS_API_ID";
const ENV_API_KEY_SECRET: &str = "CENSYS_API_SECRET";

fn default_request_delay_seconds() -> u64 {
    3
}

fn default_age_limit_days() -> i64 {
    90
}

/// Run configuration, loaded from a JSON file with per-field defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct EnricherConfig {
    /// API key id of the attribution API account.
    #[serde(default)]
    pub api_key_id: String,
    /// API key secret of the attribution API account.
    #[serde(default)]
    pub api_key_secret: String,
    /// Delay between requests, in seconds. The API enforces a fixed-rate
    /// quota, so this applies after every request.
    #[serde(default = "default_request_delay_seconds")]
    pub request_delay_seconds: u64,
    /// Ignore records older than this many days. 0 = unlimited.
    #[serde(default = "default_age_limit_days")]
    pub age_limit_days: i64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            api_key_id: String::new(),
            api_key_secret: String::new(),
            request_delay_seconds: default_request_delay_seconds(),
            age_limit_days: default_age_limit_days(),
        }
    }
}

impl EnricherConfig {
    /// Loads the configuration. A missing file falls back to defaults; a
    /// present but malformed file is logged and also falls back, so a bad
    /// config never aborts startup. Credentials absent from the file are
    /// picked up from the environment.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Malformed config file, using defaults.");
                    Self::default()
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unable to read config file, using defaults.");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if config.api_key_id.is_empty() {
            config.api_key_id = std::env::var(ENV_API_KEY_ID).unwrap_or_default();
        }
        if config.api_key_secret.is_empty() {
            config.api_key_secret = std::env::var(ENV_API_KEY_SECRET).unwrap_or_default();
        }

        config
    }

    /// Both halves of the API key are required for any querying at all.
    pub fn has_credentials(&self) -> bool {
        !self.api_key_id.is_empty() && !self.api_key_secret.is_empty()
    }
}
