//! Chat screen controller.
//!
//! DESIGN
//! ======
//! `ChatScreen` owns everything the single chat screen shows: the sender
//! identity, the composer, the message list, and the two session-scoped
//! listeners (auth state, live message subscription). It is owned by one
//! task and mutated only there.
//!
//! Work that touches the backend is spawned. Spawned tasks never touch the
//! screen; they send a `ScreenEvent` through the channel returned by
//! `ChatScreen::new`, and the owning loop feeds it back through
//! `handle_event`. Anything the host must do (show a notice, launch the
//! sign-in flow or the picker, redraw, close) is queued as an `Effect`.
//!
//! LIFECYCLE
//! =========
//! 1. `on_create`: register config defaults, start the one-shot config fetch
//! 2. `on_resume`: attach the auth listener; its first event drives either
//!    the signed-in path (adopt name, attach subscription) or the signed-out
//!    path (clear, detach, launch sign-in)
//! 3. `on_pause`: drop both listeners, clear the list, and stop listening for
//!    in-flight config fetches and photo uploads
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal. Push failures are logged at debug, upload and
//! config failures are logged, and only a cancelled sign-in reaches the user
//! (as a notice plus `Effect::Finish`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapter::MessageAdapter;
use crate::backend::{Backend, BackendError, ChildEvent, IdpProvider, LocalImage, SignInResult, User, is_jpeg_path};
use crate::composer::Composer;
use crate::listener::ListenerGuard;
use crate::message::Message;
use crate::upload::upload_photo;

/// Sender identity used while nobody is signed in, or the account has no name.
pub const ANONYMOUS: &str = "anonymous";
/// Remote config key holding the message length cap.
pub const MSG_LENGTH_KEY: &str = "friendly_msg_length";
pub const DEFAULT_MSG_LENGTH_LIMIT: usize = 1000;

const RELEASE_CACHE_EXPIRATION: Duration = Duration::from_secs(3600);

pub const SIGNED_IN_NOTICE: &str = "Signed in successfully";
pub const SIGN_IN_CANCELLED_NOTICE: &str = "Sign in cancelled";

// =============================================================================
// SETTINGS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSettings {
    /// Developer mode disables the remote config cache window.
    pub developer_mode: bool,
    /// Sign-in methods offered when nobody is signed in.
    pub providers: Vec<IdpProvider>,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self { developer_mode: cfg!(debug_assertions), providers: vec![IdpProvider::Email, IdpProvider::Google] }
    }
}

impl ScreenSettings {
    #[must_use]
    pub fn cache_expiration(&self) -> Duration {
        if self.developer_mode { Duration::ZERO } else { RELEASE_CACHE_EXPIRATION }
    }
}

// =============================================================================
// HOST INTERFACE
// =============================================================================

/// What the host should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Transient user-visible notice.
    Notice(String),
    /// Run the sign-in flow and report back through `on_sign_in_result`.
    LaunchSignIn { providers: Vec<IdpProvider> },
    /// Run the image picker and report back through `on_image_picked`.
    LaunchImagePicker(PickerRequest),
    /// A row was appended at this index.
    MessageAdded(usize),
    /// The list was emptied.
    MessagesCleared,
    /// Close the screen.
    Finish,
}

/// Constraints for the image picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerRequest {
    pub mime_type: &'static str,
    pub local_only: bool,
}

impl PickerRequest {
    #[must_use]
    pub fn jpeg() -> Self {
        Self { mime_type: "image/jpeg", local_only: true }
    }

    /// True if a local file satisfies the request.
    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        self.mime_type != "image/jpeg" || is_jpeg_path(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickResult {
    Picked(LocalImage),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    SignOut,
}

impl MenuItem {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::SignOut => "Sign out",
        }
    }
}

const MENU: &[MenuItem] = &[MenuItem::SignOut];

// =============================================================================
// EVENTS
// =============================================================================

/// Completion of spawned work, applied on the screen's loop.
#[derive(Debug)]
pub enum ScreenEvent {
    AuthStateChanged { listener: u64, user: Option<User> },
    Child { subscription: u64, event: ChildEvent },
    ConfigFetched { generation: u64, result: Result<(), BackendError> },
    PhotoUploaded { generation: u64, result: Result<String, BackendError> },
}

/// Receiving side of the screen's event channel.
pub struct ScreenEvents {
    rx: mpsc::UnboundedReceiver<ScreenEvent>,
}

impl ScreenEvents {
    /// Next completion. Only returns `None` once the screen is dropped.
    pub async fn next(&mut self) -> Option<ScreenEvent> {
        self.rx.recv().await
    }
}

// =============================================================================
// SCREEN
// =============================================================================

pub struct ChatScreen {
    backend: Backend,
    settings: ScreenSettings,
    events: mpsc::UnboundedSender<ScreenEvent>,
    username: String,
    adapter: MessageAdapter,
    composer: Composer,
    auth_listener: Option<ListenerGuard>,
    subscription: Option<ListenerGuard>,
    next_listener_id: u64,
    /// Bumped on pause; one-shot completions started earlier are ignored.
    generation: u64,
    sign_in_pending: bool,
    effects: Vec<Effect>,
    finished: bool,
}

impl ChatScreen {
    #[must_use]
    pub fn new(backend: Backend, settings: ScreenSettings) -> (Self, ScreenEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let screen = Self {
            backend,
            settings,
            events,
            username: ANONYMOUS.to_owned(),
            adapter: MessageAdapter::new(),
            composer: Composer::new(DEFAULT_MSG_LENGTH_LIMIT),
            auth_listener: None,
            subscription: None,
            next_listener_id: 0,
            generation: 0,
            sign_in_pending: false,
            effects: Vec::new(),
            finished: false,
        };
        (screen, ScreenEvents { rx })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Register config defaults and start the one-shot length-limit fetch.
    pub fn on_create(&mut self) {
        let defaults = HashMap::from([(MSG_LENGTH_KEY.to_owned(), DEFAULT_MSG_LENGTH_LIMIT.to_string())]);
        self.backend.config.set_defaults(defaults);

        let config = self.backend.config.clone();
        let events = self.events.clone();
        let window = self.settings.cache_expiration();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = config.fetch(window).await;
            let _ = events.send(ScreenEvent::ConfigFetched { generation, result });
        });
    }

    /// Attach the auth-state listener. No-op while one is attached.
    pub fn on_resume(&mut self) {
        if self.auth_listener.is_some() {
            return;
        }
        let id = self.next_id();
        let mut state = self.backend.auth.watch();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            loop {
                let user = state.borrow_and_update().clone();
                if events.send(ScreenEvent::AuthStateChanged { listener: id, user }).is_err() {
                    break;
                }
                if state.changed().await.is_err() {
                    break;
                }
            }
        });
        self.auth_listener = Some(ListenerGuard::new(id, task));
        debug!(listener = id, "screen: auth listener attached");
    }

    /// Drop both listeners and clear the list. Uploads and fetches still in
    /// flight keep running but their completions are discarded.
    pub fn on_pause(&mut self) {
        self.generation += 1;
        if self.auth_listener.take().is_some() {
            debug!("screen: auth listener detached");
        }
        self.detach_subscription();
        self.clear_messages();
    }

    // -------------------------------------------------------------------------
    // User input
    // -------------------------------------------------------------------------

    /// Apply an edit to the composer. Returns whether send is now enabled.
    pub fn on_text_changed(&mut self, text: &str) -> bool {
        if self.composer.set_text(text) {
            debug!(max = self.composer.max_length(), "screen: input truncated");
        }
        self.composer.send_enabled()
    }

    #[must_use]
    pub fn send_enabled(&self) -> bool {
        self.composer.send_enabled()
    }

    /// Push the composer contents as a text message and clear the input.
    /// Returns `false` (and does nothing) while send is disabled.
    pub fn on_send_clicked(&mut self) -> bool {
        if !self.composer.send_enabled() {
            return false;
        }
        let message = Message::text(self.composer.text(), self.username.as_str());
        self.push_message(message);
        self.composer.take();
        true
    }

    pub fn on_photo_picker_clicked(&mut self) {
        self.effects.push(Effect::LaunchImagePicker(PickerRequest::jpeg()));
    }

    /// Start the upload pipeline for a picked image.
    pub fn on_image_picked(&mut self, result: PickResult) {
        let image = match result {
            PickResult::Picked(image) => image,
            PickResult::Cancelled => {
                debug!("screen: image picker cancelled");
                return;
            }
        };
        info!(path = %image.path.display(), "screen: uploading photo");
        let photos = self.backend.photos.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = upload_photo(photos.as_ref(), &image).await;
            let _ = events.send(ScreenEvent::PhotoUploaded { generation, result });
        });
    }

    pub fn on_sign_in_result(&mut self, result: SignInResult) {
        self.sign_in_pending = false;
        match result {
            SignInResult::Success => {
                self.effects.push(Effect::Notice(SIGNED_IN_NOTICE.to_owned()));
            }
            SignInResult::Cancelled => {
                info!("screen: sign-in cancelled; finishing");
                self.effects.push(Effect::Notice(SIGN_IN_CANCELLED_NOTICE.to_owned()));
                self.effects.push(Effect::Finish);
                self.finished = true;
            }
            SignInResult::Failed(reason) => {
                warn!(%reason, "screen: sign-in failed");
                // Still signed out and no auth change is coming: offer the flow again.
                if self.auth_listener.is_some() && self.backend.auth.current_user().is_none() {
                    self.launch_sign_in();
                }
            }
        }
    }

    #[must_use]
    pub fn menu_items(&self) -> &'static [MenuItem] {
        MENU
    }

    /// Returns `true` if the item was handled.
    pub fn on_menu_item_selected(&mut self, item: MenuItem) -> bool {
        match item {
            MenuItem::SignOut => {
                let auth = self.backend.auth.clone();
                tokio::spawn(async move {
                    if let Err(e) = auth.sign_out().await {
                        error!(error = %e, code = e.code(), "screen: sign-out failed");
                    }
                });
                true
            }
        }
    }

    // -------------------------------------------------------------------------
    // Completions
    // -------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: ScreenEvent) {
        match event {
            ScreenEvent::AuthStateChanged { listener, user } => {
                if self.auth_listener.as_ref().map(ListenerGuard::id) != Some(listener) {
                    debug!(listener, "screen: dropping event from detached auth listener");
                    return;
                }
                match user {
                    Some(user) => self.on_signed_in(&user),
                    None => self.on_signed_out(),
                }
            }
            ScreenEvent::Child { subscription, event } => {
                if self.subscription.as_ref().map(ListenerGuard::id) != Some(subscription) {
                    debug!(subscription, "screen: dropping event from detached subscription");
                    return;
                }
                self.on_child_event(event);
            }
            ScreenEvent::ConfigFetched { generation, .. } | ScreenEvent::PhotoUploaded { generation, .. }
                if generation != self.generation =>
            {
                debug!(generation, current = self.generation, "screen: dropping completion from before pause");
            }
            ScreenEvent::ConfigFetched { result, .. } => self.on_config_fetched(result),
            ScreenEvent::PhotoUploaded { result: Ok(url), .. } => {
                let message = Message::photo(url, self.username.as_str());
                self.push_message(message);
            }
            ScreenEvent::PhotoUploaded { result: Err(e), .. } => {
                error!(error = %e, code = e.code(), "screen: photo upload failed");
            }
        }
    }

    fn on_signed_in(&mut self, user: &User) {
        self.sign_in_pending = false;
        self.username = user
            .display_name
            .clone()
            .unwrap_or_else(|| ANONYMOUS.to_owned());
        info!(uid = %user.uid, username = %self.username, "screen: signed in");
        self.attach_subscription();
    }

    fn on_signed_out(&mut self) {
        self.username = ANONYMOUS.to_owned();
        self.clear_messages();
        self.detach_subscription();
        if !self.sign_in_pending {
            self.launch_sign_in();
        }
    }

    fn on_child_event(&mut self, event: ChildEvent) {
        match event {
            ChildEvent::Added { key, message } => {
                let index = self.adapter.add(message);
                debug!(%key, index, "screen: message added");
                self.effects.push(Effect::MessageAdded(index));
            }
            ChildEvent::Changed { key, .. } | ChildEvent::Removed { key } | ChildEvent::Moved { key } => {
                debug!(%key, "screen: ignoring child update");
            }
            ChildEvent::Cancelled { reason } => {
                warn!(%reason, "screen: subscription cancelled by backend");
            }
        }
    }

    fn on_config_fetched(&mut self, result: Result<(), BackendError>) {
        match result {
            Ok(()) => {
                let activated = self.backend.config.activate();
                debug!(activated, "screen: remote config fetched");
            }
            Err(e) => {
                debug!(error = %e, code = e.code(), "screen: remote config fetch failed; using active values");
            }
        }
        self.apply_length_limit();
    }

    fn apply_length_limit(&mut self) {
        let raw = self.backend.config.get_long(MSG_LENGTH_KEY);
        let limit = usize::try_from(raw)
            .ok()
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_MSG_LENGTH_LIMIT);
        info!(limit, "screen: message length limit applied");
        self.composer.set_max_length(limit);
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn next_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    fn launch_sign_in(&mut self) {
        self.sign_in_pending = true;
        self.effects.push(Effect::LaunchSignIn { providers: self.settings.providers.clone() });
    }

    /// Start the live subscription. No-op while one is attached.
    fn attach_subscription(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let id = self.next_id();
        let mut children = self.backend.messages.subscribe();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = children.recv().await {
                if events.send(ScreenEvent::Child { subscription: id, event }).is_err() {
                    break;
                }
            }
        });
        self.subscription = Some(ListenerGuard::new(id, task));
        debug!(subscription = id, "screen: subscription attached");
    }

    fn detach_subscription(&mut self) {
        if self.subscription.take().is_some() {
            debug!("screen: subscription detached");
        }
    }

    fn clear_messages(&mut self) {
        if self.adapter.clear() {
            self.effects.push(Effect::MessagesCleared);
        }
    }

    fn push_message(&self, message: Message) {
        let messages = self.backend.messages.clone();
        tokio::spawn(async move {
            match messages.push(&message).await {
                Ok(key) => debug!(%key, photo = message.is_photo(), "screen: message pushed"),
                Err(e) => debug!(error = %e, code = e.code(), "screen: push failed"),
            }
        });
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn adapter(&self) -> &MessageAdapter {
        &self.adapter
    }

    #[must_use]
    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    #[must_use]
    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    #[must_use]
    pub fn has_auth_listener(&self) -> bool {
        self.auth_listener.is_some()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Take every queued effect, oldest first.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}

#[cfg(test)]
#[path = "screen_test.rs"]
mod tests;
