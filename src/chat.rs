use chrono::{DateTime, Local};

use crate::protocol::{ChatRequest, HistoryEntry, Role};

/// One chat turn. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// The ordered message log plus the loading/error slots for the single
/// outstanding request. Append-only for the lifetime of one client session;
/// nothing is ever mutated or reordered after insertion.
pub struct ChatSessionState {
    messages: Vec<Message>,
    loading: bool,
    error: Option<String>,
}

impl ChatSessionState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            loading: false,
            error: None,
        }
    }

    #[allow(dead_code)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[allow(dead_code)]
    pub fn loading(&self) -> bool {
        self.loading
    }

    /// Returns true when the flag actually changed.
    pub fn set_loading(&mut self, loading: bool) -> bool {
        if self.loading == loading {
            return false;
        }
        self.loading = loading;
        true
    }

    #[allow(dead_code)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Single slot: the most recent problem replaces any prior one.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Serialize the prior history plus `text` into the outbound envelope.
    /// The new message rides in the `message` field, not in `history`.
    pub fn build_request(&self, text: &str) -> ChatRequest {
        let history = self
            .messages
            .iter()
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        ChatRequest::new(text.to_string(), history)
    }

    /// Optimistic local append of the user's message.
    pub fn push_user(&mut self, text: &str) -> Message {
        let message = Message {
            id: format!("user_{}", now_ms()),
            role: Role::User,
            content: text.to_string(),
            timestamp: Local::now(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn push_assistant(&mut self, id: &str, text: &str) -> Message {
        let message = Message {
            id: id.to_string(),
            role: Role::Assistant,
            content: text.to_string(),
            timestamp: Local::now(),
        };
        self.messages.push(message.clone());
        message
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
