//! Backend capabilities consumed by the chat screen.
//!
//! DESIGN
//! ======
//! Each remote service is an async trait object so the screen can run
//! against the in-memory double (`memory`) in tests and against the Firebase
//! REST services in the binary. The traits mirror what the screen needs and
//! nothing more:
//! - `AuthService`: current user, a change feed, sign-in, sign-out
//! - `MessageStore`: append with server-assigned keys, live child events
//! - `BlobStore`: path-keyed upload, download URL resolution
//! - `RemoteConfig`: defaults, cached fetch, explicit activate, typed reads
//!
//! ERROR HANDLING
//! ==============
//! All services share `BackendError`. None of these errors is fatal to the
//! process; the screen logs them or turns them into a notice.

pub mod config_values;
pub mod memory;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::message::Message;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The operation needs an authenticated session.
    #[error("not signed in")]
    NotSignedIn,

    /// The identity provider rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The HTTP request could not be sent or its body not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("unexpected response: status {status}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// A local file could not be read.
    #[error("local file unreadable: {0}")]
    Io(String),

    /// A storage path or file name was unusable.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// Client configuration is missing something the service needs.
    #[error("configuration error: {0}")]
    Config(String),

    /// The service is unreachable (also used for injected failures).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Stable short code for structured logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotSignedIn => "E_NOT_SIGNED_IN",
            Self::Auth(_) => "E_AUTH",
            Self::Request(_) => "E_REQUEST",
            Self::Status { .. } => "E_STATUS",
            Self::Parse(_) => "E_PARSE",
            Self::Io(_) => "E_IO",
            Self::InvalidPath(_) => "E_INVALID_PATH",
            Self::Config(_) => "E_CONFIG",
            Self::Unavailable(_) => "E_UNAVAILABLE",
        }
    }
}

// =============================================================================
// AUTH
// =============================================================================

/// The signed-in account as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Sign-in methods offered by the sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpProvider {
    Email,
    Google,
}

impl IdpProvider {
    /// Provider id understood by the identity service.
    #[must_use]
    pub fn provider_id(self) -> &'static str {
        match self {
            Self::Email => "password",
            Self::Google => "google.com",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Google => "google",
        }
    }
}

/// What the sign-in flow hands to `AuthService::sign_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    EmailPassword { email: String, password: String },
    Federated { provider: IdpProvider, id_token: String },
}

/// How a launched sign-in flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult {
    Success,
    Cancelled,
    Failed(String),
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    fn current_user(&self) -> Option<User>;

    /// Feed of auth-state changes. The receiver starts at the current state.
    fn watch(&self) -> watch::Receiver<Option<User>>;

    async fn sign_in(&self, credentials: Credentials) -> Result<User, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

// =============================================================================
// MESSAGES
// =============================================================================

/// One notification from a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added { key: String, message: Message },
    Changed { key: String, message: Message },
    Removed { key: String },
    Moved { key: String },
    /// The server ended the subscription (permission revoked, auth expired).
    Cancelled { reason: String },
}

/// Receiving end of a subscription. Dropping it unregisters the listener.
pub type ChildEvents = mpsc::UnboundedReceiver<ChildEvent>;

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message; returns the server-assigned key.
    async fn push(&self, message: &Message) -> Result<String, BackendError>;

    /// Start a subscription. Existing children are delivered as `Added`
    /// first, in key order, followed by live changes.
    fn subscribe(&self) -> ChildEvents;
}

// =============================================================================
// BLOBS
// =============================================================================

/// A local image chosen through the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    pub path: PathBuf,
    pub content_type: String,
}

impl LocalImage {
    #[must_use]
    pub fn jpeg(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), content_type: "image/jpeg".to_owned() }
    }

    /// Last path segment, used as the storage object name.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
    }
}

/// Metadata returned by a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub path: String,
    pub size: u64,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_file(&self, path: &str, file: &LocalImage) -> Result<UploadedObject, BackendError>;

    /// Resolve a public download URL for an uploaded object.
    async fn download_url(&self, path: &str) -> Result<String, BackendError>;
}

// =============================================================================
// REMOTE CONFIG
// =============================================================================

#[async_trait::async_trait]
pub trait RemoteConfig: Send + Sync {
    fn set_defaults(&self, defaults: HashMap<String, String>);

    /// Fetch server values unless the last successful fetch is younger than
    /// `cache_expiration`. Fetched values are not visible until `activate`.
    async fn fetch(&self, cache_expiration: Duration) -> Result<(), BackendError>;

    /// Promote fetched values. Returns `true` if a fetched set was activated.
    fn activate(&self) -> bool;

    /// Active value, else default, parsed as an integer; `0` if neither parses.
    fn get_long(&self, key: &str) -> i64;
}

// =============================================================================
// BUNDLE
// =============================================================================

/// The four capabilities the chat screen is wired against.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthService>,
    pub messages: Arc<dyn MessageStore>,
    pub photos: Arc<dyn BlobStore>,
    pub config: Arc<dyn RemoteConfig>,
}

/// True if `path` names a JPEG by extension.
#[must_use]
pub fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}
