//! Remote Config client fetch over REST.
//!
//! The fetch endpoint answers with the full entry map plus a `state`.
//! `NO_TEMPLATE` and `EMPTY_CONFIG` mean no server values; `NO_CHANGE`
//! re-stores the active set so the next activate is a no-op in effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use super::{FirebaseApp, read_success, request_error};
use crate::backend::config_values::ConfigValues;
use crate::backend::{BackendError, RemoteConfig};

pub struct FirebaseRemoteConfig {
    app: Arc<FirebaseApp>,
    instance_id: String,
    values: Mutex<ConfigValues>,
}

impl FirebaseRemoteConfig {
    #[must_use]
    pub fn new(app: Arc<FirebaseApp>) -> Self {
        Self { app, instance_id: uuid::Uuid::new_v4().simple().to_string(), values: Mutex::new(ConfigValues::new()) }
    }

    fn values(&self) -> MutexGuard<'_, ConfigValues> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl RemoteConfig for FirebaseRemoteConfig {
    fn set_defaults(&self, defaults: HashMap<String, String>) {
        self.values().set_defaults(defaults);
    }

    async fn fetch(&self, cache_expiration: Duration) -> Result<(), BackendError> {
        if self.values().is_fresh(cache_expiration) {
            debug!("remote config: cached values still fresh");
            return Ok(());
        }
        let config = self.app.config();
        let app_id = config
            .app_id
            .as_deref()
            .ok_or_else(|| BackendError::Config("FIREBASE_APP_ID is required for remote config".to_owned()))?;
        let url = format!(
            "{}/projects/{}/namespaces/firebase:fetch",
            config.endpoints.remote_config, config.project_id
        );
        let body = serde_json::json!({ "appInstanceId": self.instance_id, "appId": app_id });
        let response = self
            .app
            .http()
            .post(url)
            .query(&[("key", config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let fetched = parse_fetch(&read_success(response).await?)?;

        let mut values = self.values();
        let entries = match fetched {
            Fetched::Entries(entries) => entries,
            Fetched::Unchanged => values.active().clone(),
        };
        info!(entries = entries.len(), "remote config: fetched");
        values.store_fetched(entries);
        Ok(())
    }

    fn activate(&self) -> bool {
        self.values().activate()
    }

    fn get_long(&self, key: &str) -> i64 {
        self.values().get_long(key)
    }
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    entries: HashMap<String, String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Fetched {
    Entries(HashMap<String, String>),
    Unchanged,
}

fn parse_fetch(json: &str) -> Result<Fetched, BackendError> {
    let response: FetchResponse = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    Ok(match response.state.as_deref() {
        Some("NO_CHANGE") => Fetched::Unchanged,
        Some("NO_TEMPLATE" | "EMPTY_CONFIG") => Fetched::Entries(HashMap::new()),
        _ => Fetched::Entries(response.entries),
    })
}

#[cfg(test)]
#[path = "remote_config_test.rs"]
mod tests;
