//! Firebase project configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_STORAGE_URL: &str = "https://firebasestorage.googleapis.com/v0";
pub const DEFAULT_REMOTE_CONFIG_URL: &str = "https://firebaseremoteconfig.googleapis.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },

    #[error("config parse failed: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Timeouts {
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// Service endpoints; overridable for the local emulator suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth: String,
    pub token: String,
    pub database: String,
    pub storage: String,
    pub remote_config: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub app_id: Option<String>,
    pub storage_bucket: String,
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
}

impl FirebaseConfig {
    /// Build typed Firebase config from environment variables.
    ///
    /// Required:
    /// - `FIREBASE_API_KEY`
    /// - `FIREBASE_PROJECT_ID`
    ///
    /// Optional:
    /// - `FIREBASE_APP_ID`: needed by remote config; fetches fail without it
    /// - `FIREBASE_DATABASE_URL`: default `https://<project>-default-rtdb.firebaseio.com`
    /// - `FIREBASE_STORAGE_BUCKET`: default `<project>.appspot.com`
    /// - `FIREBASE_AUTH_URL`, `FIREBASE_TOKEN_URL`, `FIREBASE_STORAGE_URL`,
    ///   `FIREBASE_REMOTE_CONFIG_URL`: endpoint overrides
    /// - `FIREBASE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `FIREBASE_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is unset or a URL is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required("FIREBASE_API_KEY")?;
        let project_id = required("FIREBASE_PROJECT_ID")?;
        let app_id = std::env::var("FIREBASE_APP_ID").ok().filter(|v| !v.is_empty());

        let database = env_url("FIREBASE_DATABASE_URL", || format!("https://{project_id}-default-rtdb.firebaseio.com"))?;
        let storage_bucket =
            std::env::var("FIREBASE_STORAGE_BUCKET").unwrap_or_else(|_| format!("{project_id}.appspot.com"));

        let endpoints = Endpoints {
            auth: env_url("FIREBASE_AUTH_URL", || DEFAULT_AUTH_URL.to_owned())?,
            token: env_url("FIREBASE_TOKEN_URL", || DEFAULT_TOKEN_URL.to_owned())?,
            database,
            storage: env_url("FIREBASE_STORAGE_URL", || DEFAULT_STORAGE_URL.to_owned())?,
            remote_config: env_url("FIREBASE_REMOTE_CONFIG_URL", || DEFAULT_REMOTE_CONFIG_URL.to_owned())?,
        };
        let timeouts = Timeouts {
            request_secs: env_parse_u64("FIREBASE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("FIREBASE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { api_key, project_id, app_id, storage_bucket, endpoints, timeouts })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn env_url(var: &str, default: impl FnOnce() -> String) -> Result<String, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default());
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(ConfigError::Parse(format!("{var} must be an http(s) URL, got '{raw}'")));
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
