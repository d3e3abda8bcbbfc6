//! In-memory backend: deterministic doubles for every capability.
//!
//! DESIGN
//! ======
//! Each double keeps its state behind a `std::sync::Mutex` (critical sections
//! never await) and exposes two kinds of hooks beyond the trait surface:
//! - failure injection (`fail_pushes`, `fail_uploads`, `fail_fetches`, ...)
//! - observation (`listener_count`, `subscribe_count`, `uploads`, ...)
//!
//! The terminal binary can also run against these doubles for a local,
//! single-process demo.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::config_values::ConfigValues;
use super::{
    AuthService, Backend, BackendError, BlobStore, ChildEvent, ChildEvents, Credentials, IdpProvider, LocalImage,
    MessageStore, RemoteConfig, UploadedObject, User,
};
use crate::message::Message;
use crate::push_id::PushIdGenerator;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// =============================================================================
// BUNDLE
// =============================================================================

/// All four doubles, kept as concrete types so tests can reach the hooks.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub auth: Arc<MemoryAuth>,
    pub messages: Arc<MemoryMessageStore>,
    pub photos: Arc<MemoryBlobStore>,
    pub config: Arc<MemoryRemoteConfig>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased view handed to the screen.
    #[must_use]
    pub fn backend(&self) -> Backend {
        Backend {
            auth: self.auth.clone(),
            messages: self.messages.clone(),
            photos: self.photos.clone(),
            config: self.config.clone(),
        }
    }
}

// =============================================================================
// AUTH
// =============================================================================

struct Account {
    credentials: Credentials,
    user: User,
}

pub struct MemoryAuth {
    accounts: Mutex<Vec<Account>>,
    state: watch::Sender<Option<User>>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        let (state, _) = watch::channel(None);
        Self { accounts: Mutex::new(Vec::new()), state }
    }
}

impl MemoryAuth {
    /// Register an email/password account.
    pub fn register_password(&self, email: &str, password: &str, display_name: Option<&str>) -> User {
        let credentials = Credentials::EmailPassword { email: email.to_owned(), password: password.to_owned() };
        self.register(credentials, Some(email), display_name)
    }

    /// Register an account reachable through a federated id token.
    pub fn register_federated(&self, provider: IdpProvider, id_token: &str, display_name: Option<&str>) -> User {
        let credentials = Credentials::Federated { provider, id_token: id_token.to_owned() };
        self.register(credentials, None, display_name)
    }

    fn register(&self, credentials: Credentials, email: Option<&str>, display_name: Option<&str>) -> User {
        let mut accounts = lock(&self.accounts);
        let user = User {
            uid: format!("uid-{}", accounts.len() + 1),
            display_name: display_name.map(ToOwned::to_owned),
            email: email.map(ToOwned::to_owned),
        };
        accounts.push(Account { credentials, user: user.clone() });
        user
    }

    /// Change the session as if it were restored or revoked out of band.
    pub fn set_current_user(&self, user: Option<User>) {
        self.state.send_replace(user);
    }
}

#[async_trait::async_trait]
impl AuthService for MemoryAuth {
    fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<User, BackendError> {
        let user = lock(&self.accounts)
            .iter()
            .find(|account| account.credentials == credentials)
            .map(|account| account.user.clone())
            .ok_or_else(|| BackendError::Auth("INVALID_LOGIN_CREDENTIALS".to_owned()))?;
        self.state.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.state.send_replace(None);
        Ok(())
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Default)]
struct StoreInner {
    children: BTreeMap<String, Message>,
    listeners: Vec<mpsc::UnboundedSender<ChildEvent>>,
    ids: PushIdGenerator,
}

impl StoreInner {
    fn broadcast(&mut self, event: &ChildEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Mutex<StoreInner>,
    fail_pushes: AtomicBool,
    subscribe_calls: AtomicUsize,
}

impl MemoryMessageStore {
    /// Append a message as if another client had pushed it.
    pub fn insert_remote(&self, message: Message) -> String {
        let mut inner = lock(&self.inner);
        let key = inner.ids.next_id(now_ms(), &mut rand::rng());
        inner.children.insert(key.clone(), message.clone());
        inner.broadcast(&ChildEvent::Added { key: key.clone(), message });
        key
    }

    /// Overwrite an existing child. Returns `false` if the key is unknown.
    pub fn update(&self, key: &str, message: Message) -> bool {
        let mut inner = lock(&self.inner);
        let Some(slot) = inner.children.get_mut(key) else {
            return false;
        };
        *slot = message.clone();
        inner.broadcast(&ChildEvent::Changed { key: key.to_owned(), message });
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = lock(&self.inner);
        if inner.children.remove(key).is_none() {
            return false;
        }
        inner.broadcast(&ChildEvent::Removed { key: key.to_owned() });
        true
    }

    /// End every subscription the way a revoked permission would.
    pub fn cancel_all(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        inner.broadcast(&ChildEvent::Cancelled { reason: reason.to_owned() });
        inner.listeners.clear();
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    /// Subscriptions whose receiver is still alive.
    pub fn listener_count(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.listeners.retain(|tx| !tx.is_closed());
        inner.listeners.len()
    }

    /// Total number of `subscribe` calls ever made.
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Stored children in key order.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).children.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryMessageStore {
    async fn push(&self, message: &Message) -> Result<String, BackendError> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("push rejected".to_owned()));
        }
        Ok(self.insert_remote(message.clone()))
    }

    fn subscribe(&self) -> ChildEvents {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        for (key, message) in &inner.children {
            let _ = tx.send(ChildEvent::Added { key: key.clone(), message: message.clone() });
        }
        inner.listeners.push(tx);
        debug!(listeners = inner.listeners.len(), "memory: subscription added");
        rx
    }
}

// =============================================================================
// BLOBS
// =============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, UploadedObject>>,
    uploads: Mutex<Vec<String>>,
    url_requests: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_urls: AtomicBool,
}

impl MemoryBlobStore {
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_download_urls(&self, fail: bool) {
        self.fail_urls.store(fail, Ordering::SeqCst);
    }

    /// Paths of every accepted upload, in order.
    pub fn uploads(&self) -> Vec<String> {
        lock(&self.uploads).clone()
    }

    pub fn url_requests(&self) -> usize {
        self.url_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn url_for(path: &str) -> String {
        format!("memory://photos/{path}")
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_file(&self, path: &str, file: &LocalImage) -> Result<UploadedObject, BackendError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("upload rejected".to_owned()));
        }
        // The local file is optional here; a missing file uploads as empty.
        let size = tokio::fs::metadata(&file.path)
            .await
            .map_or(0, |m| m.len());
        let object = UploadedObject { path: path.to_owned(), size };
        lock(&self.objects).insert(path.to_owned(), object.clone());
        lock(&self.uploads).push(path.to_owned());
        Ok(object)
    }

    async fn download_url(&self, path: &str) -> Result<String, BackendError> {
        self.url_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_urls.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("download url rejected".to_owned()));
        }
        if !lock(&self.objects).contains_key(path) {
            return Err(BackendError::InvalidPath(path.to_owned()));
        }
        Ok(Self::url_for(path))
    }
}

// =============================================================================
// REMOTE CONFIG
// =============================================================================

#[derive(Default)]
pub struct MemoryRemoteConfig {
    values: Mutex<ConfigValues>,
    server: Mutex<HashMap<String, String>>,
    fail_fetches: AtomicBool,
    network_fetches: AtomicUsize,
}

impl MemoryRemoteConfig {
    /// Value the next network fetch will return.
    pub fn set_server_value(&self, key: &str, value: &str) {
        lock(&self.server).insert(key.to_owned(), value.to_owned());
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Fetches that went past the cache window.
    pub fn network_fetches(&self) -> usize {
        self.network_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteConfig for MemoryRemoteConfig {
    fn set_defaults(&self, defaults: HashMap<String, String>) {
        lock(&self.values).set_defaults(defaults);
    }

    async fn fetch(&self, cache_expiration: Duration) -> Result<(), BackendError> {
        if lock(&self.values).is_fresh(cache_expiration) {
            return Ok(());
        }
        self.network_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("fetch rejected".to_owned()));
        }
        let server = lock(&self.server).clone();
        lock(&self.values).store_fetched(server);
        Ok(())
    }

    fn activate(&self) -> bool {
        lock(&self.values).activate()
    }

    fn get_long(&self, key: &str) -> i64 {
        lock(&self.values).get_long(key)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
