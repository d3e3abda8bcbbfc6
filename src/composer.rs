//! Message input box with a replaceable length filter.
//!
//! The filter counts characters and truncates on entry. Replacing the filter
//! leaves the current contents alone; only later edits see the new cap.

/// Text input state plus the send-button rule.
#[derive(Debug, Clone)]
pub struct Composer {
    text: String,
    max_length: usize,
}

impl Composer {
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self { text: String::new(), max_length }
    }

    /// Replace the input contents, truncating to the active cap.
    /// Returns `true` if characters were dropped.
    pub fn set_text(&mut self, text: &str) -> bool {
        match text.char_indices().nth(self.max_length) {
            Some((cut, _)) => {
                self.text = text[..cut].to_owned();
                true
            }
            None => {
                self.text = text.to_owned();
                false
            }
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    /// Send is enabled only for input with non-whitespace content.
    #[must_use]
    pub fn send_enabled(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Take the current contents, leaving the input empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

#[cfg(test)]
#[path = "composer_test.rs"]
mod tests;
