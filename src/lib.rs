//! FriendlyChat: a single-screen real-time chat client.
//!
//! ARCHITECTURE
//! ============
//! The screen controller (`screen`) owns all presentation state and runs on
//! one event loop. Every remote concern is reached through the capability
//! traits in `backend`, which have two implementations: an in-memory double
//! (`backend::memory`) and the Firebase REST services (`firebase`).
//!
//! Backend work is spawned onto tokio; completions come back to the loop as
//! `ScreenEvent`s and are applied by `ChatScreen::handle_event`. Hosts (the
//! terminal binary, tests) drain `Effect`s to render notices, launch the
//! sign-in flow, launch the image picker, and close the screen.

pub mod adapter;
pub mod backend;
pub mod composer;
pub mod firebase;
pub mod listener;
pub mod message;
pub mod push_id;
pub mod screen;
pub mod terminal;
pub mod upload;

pub use adapter::{MessageAdapter, MessageRow};
pub use backend::{Backend, BackendError};
pub use composer::Composer;
pub use message::Message;
pub use screen::{ChatScreen, Effect, MenuItem, PickResult, PickerRequest, ScreenEvent, ScreenEvents, ScreenSettings};
