//! Session chat log.
//!
//! A bounded, append-only list of chat messages shared by everyone in the
//! classroom. It has no interaction with poll state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClassPollError, Result};

/// Number of messages kept when no explicit limit is configured.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Role of a participant in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The teacher running the session.
    #[default]
    Teacher,
    /// A student answering polls.
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Identifier, increasing within one log.
    pub id: u64,
    /// Display name of the sender.
    pub sender: String,
    /// Message text.
    pub message: String,
    /// Role of the sender.
    pub role: Role,
    /// When the message was posted.
    pub timestamp: DateTime<Utc>,
}

/// Bounded chat history, oldest message first.
#[derive(Debug, Clone)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
    next_id: u64,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ChatLog {
    /// Creates an empty log keeping at most `max_messages` messages.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages.min(DEFAULT_MAX_MESSAGES)),
            max_messages: max_messages.max(1),
            next_id: 1,
        }
    }

    /// Appends a message, evicting the oldest ones beyond the limit.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessage` if the text is blank.
    pub fn add_message(
        &mut self,
        sender: impl Into<String>,
        message: impl Into<String>,
        role: Role,
    ) -> Result<ChatMessage> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ClassPollError::EmptyMessage);
        }

        let entry = ChatMessage {
            id: self.next_id,
            sender: sender.into(),
            message,
            role,
            timestamp: Utc::now(),
        };
        self.next_id += 1;

        self.messages.push_back(entry.clone());
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }

        Ok(entry)
    }

    /// Returns all retained messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the log holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
