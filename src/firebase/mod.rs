//! Firebase REST backend.
//!
//! DESIGN
//! ======
//! One `FirebaseApp` owns the project config, two HTTP clients, and the
//! signed-in session. The four services hold an `Arc<FirebaseApp>` and ask it
//! for a fresh id token before every authenticated call:
//! - `auth`: Identity Toolkit sign-in, Secure Token refresh
//! - `database`: realtime database push + server-sent-event subscription
//! - `storage`: object upload + download URL from object metadata
//! - `remote_config`: REST fetch into the shared default/fetched/active sets
//!
//! Streaming subscriptions use a client without a whole-request timeout; all
//! other calls use the bounded client.

pub mod auth;
pub mod config;
pub mod database;
pub mod remote_config;
pub mod sse;
pub mod storage;

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::backend::{Backend, BackendError, User};
pub use config::{ConfigError, FirebaseConfig};

/// Collection holding chat messages.
pub const MESSAGES_PATH: &str = "messages";

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) user: User,
    pub(crate) id_token: String,
    pub(crate) refresh_token: String,
    pub(crate) expires_at: Instant,
}

// =============================================================================
// APP
// =============================================================================

pub struct FirebaseApp {
    config: FirebaseConfig,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    session: RwLock<Option<Session>>,
    user_tx: watch::Sender<Option<User>>,
}

impl FirebaseApp {
    /// Build HTTP clients for the configured project.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client fails to build.
    pub fn new(config: FirebaseConfig) -> Result<Arc<Self>, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(|e| BackendError::Config(format!("http client build failed: {e}")))?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(|e| BackendError::Config(format!("http client build failed: {e}")))?;
        let (user_tx, _) = watch::channel(None);
        Ok(Arc::new(Self { config, http, stream_http, session: RwLock::new(None), user_tx }))
    }

    /// Wire all four services against this app.
    #[must_use]
    pub fn backend(self: &Arc<Self>) -> Backend {
        Backend {
            auth: Arc::new(auth::FirebaseAuth::new(self.clone())),
            messages: Arc::new(database::FirebaseDatabase::new(self.clone(), MESSAGES_PATH)),
            photos: Arc::new(storage::FirebaseStorage::new(self.clone())),
            config: Arc::new(remote_config::FirebaseRemoteConfig::new(self.clone())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn stream_http(&self) -> &reqwest::Client {
        &self.stream_http
    }

    pub(crate) fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the session and notify auth-state watchers.
    pub(crate) fn set_session(&self, session: Option<Session>) {
        let user = session.as_ref().map(|s| s.user.clone());
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
        self.user_tx.send_replace(user);
    }

    /// Swap in refreshed tokens without a visible auth-state change.
    /// Ignored if the session ended or changed hands meanwhile.
    pub(crate) fn update_tokens(&self, session: Session) {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.user.uid == session.user.uid) {
            *slot = Some(session);
        }
    }

    pub(crate) fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.user_tx.subscribe()
    }
}

/// Map a reqwest failure into the shared error type.
pub(crate) fn request_error(e: &reqwest::Error) -> BackendError {
    BackendError::Request(e.to_string())
}

/// Read a response body, turning non-success statuses into `Status` errors.
pub(crate) async fn read_success(response: reqwest::Response) -> Result<String, BackendError> {
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| request_error(&e))?;
    if !(200..300).contains(&status) {
        return Err(BackendError::Status { status, body: text });
    }
    Ok(text)
}
