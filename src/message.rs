//! Chat message record.
//!
//! DESIGN
//! ======
//! A message carries either text or a photo URL, never both. The constructors
//! are the only place that invariant is enforced; decoding accepts whatever
//! the collection holds so that foreign or partial records still render.
//!
//! Field names on the wire (`text`, `name`, `photoUrl`) match the records
//! written by the mobile clients sharing the same `messages` collection.

use serde::{Deserialize, Serialize};

/// One entry in the `messages` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "name", default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl Message {
    /// Build a text message from the composer contents.
    #[must_use]
    pub fn text(text: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self { text: Some(text.into()), sender_name: sender_name.into(), photo_url: None }
    }

    /// Build an image message pointing at an uploaded photo.
    #[must_use]
    pub fn photo(photo_url: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self { text: None, sender_name: sender_name.into(), photo_url: Some(photo_url.into()) }
    }

    #[must_use]
    pub fn is_photo(&self) -> bool {
        self.photo_url.is_some()
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
