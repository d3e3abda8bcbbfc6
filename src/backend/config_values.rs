//! Default / fetched / active value sets behind `RemoteConfig`.
//!
//! Shared by the memory double and the Firebase client so both honour the
//! same cache-window and activation rules. Timestamps use `tokio::time` so
//! paused-clock tests can move the window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ConfigValues {
    defaults: HashMap<String, String>,
    fetched: Option<HashMap<String, String>>,
    active: HashMap<String, String>,
    last_fetch: Option<Instant>,
}

impl ConfigValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_defaults(&mut self, defaults: HashMap<String, String>) {
        self.defaults = defaults;
    }

    /// True if a successful fetch happened less than `cache_expiration` ago.
    #[must_use]
    pub fn is_fresh(&self, cache_expiration: Duration) -> bool {
        self.last_fetch
            .is_some_and(|at| at.elapsed() < cache_expiration)
    }

    /// Record a completed fetch.
    pub fn store_fetched(&mut self, values: HashMap<String, String>) {
        self.fetched = Some(values);
        self.last_fetch = Some(Instant::now());
    }

    pub fn activate(&mut self) -> bool {
        match self.fetched.take() {
            Some(values) => {
                self.active = values;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn active(&self) -> &HashMap<String, String> {
        &self.active
    }

    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.active
            .get(key)
            .or_else(|| self.defaults.get(key))
            .map(String::as_str)
    }

    #[must_use]
    pub fn get_long(&self, key: &str) -> i64 {
        self.get_string(key)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "config_values_test.rs"]
mod tests;
