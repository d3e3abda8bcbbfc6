//! Message list adapter: the display list behind the scrolling view.
//!
//! Rows are derived on demand; the only decision is whether the record is a
//! photo (URL present) or text.

use crate::message::Message;

/// How a single message is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRow<'a> {
    Text { author: &'a str, body: &'a str },
    Photo { author: &'a str, url: &'a str },
}

impl<'a> MessageRow<'a> {
    #[must_use]
    pub fn from_message(message: &'a Message) -> Self {
        match &message.photo_url {
            Some(url) => Self::Photo { author: &message.sender_name, url },
            None => Self::Text { author: &message.sender_name, body: message.text.as_deref().unwrap_or("") },
        }
    }

    #[must_use]
    pub fn author(&self) -> &'a str {
        match *self {
            Self::Text { author, .. } | Self::Photo { author, .. } => author,
        }
    }
}

/// Insertion-ordered list of received messages.
#[derive(Debug, Clone, Default)]
pub struct MessageAdapter {
    items: Vec<Message>,
}

impl MessageAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its row index.
    pub fn add(&mut self, message: Message) -> usize {
        self.items.push(message);
        self.items.len() - 1
    }

    /// Drop every row. Returns `true` if anything was removed.
    pub fn clear(&mut self) -> bool {
        let had_rows = !self.items.is_empty();
        self.items.clear();
        had_rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<MessageRow<'_>> {
        self.items.get(index).map(MessageRow::from_message)
    }

    pub fn rows(&self) -> impl Iterator<Item = MessageRow<'_>> {
        self.items.iter().map(MessageRow::from_message)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.items
    }
}

#[cfg(test)]
#[path = "adapter_test.rs"]
mod tests;
