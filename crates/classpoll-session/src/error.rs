//! Error types for the classpoll session coordinator.
//!
//! This module defines the error hierarchy for all session operations,
//! including poll lifecycle, student registration, answer submission,
//! chat, and configuration loading.

use std::path::PathBuf;

/// A specialized `Result` type for classpoll operations.
pub type Result<T> = std::result::Result<T, ClassPollError>;

/// Errors that can occur while running a classroom poll session.
///
/// Session errors reject only the request that caused them; they are
/// surfaced to the caller and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ClassPollError {
    // ========================================================================
    // Poll Lifecycle Errors
    // ========================================================================
    /// A new poll was requested while the current one is still collecting answers.
    #[error("Cannot create new poll: not all students have answered")]
    PollInProgress,

    /// The poll definition is malformed.
    #[error("Invalid poll: {message}")]
    InvalidPoll {
        /// Description of what is wrong with the poll.
        message: String,
    },

    /// An answer was submitted while no poll is current.
    #[error("No active poll")]
    NoActivePoll,

    /// An answer was submitted after the current poll ended.
    #[error("Poll has ended")]
    PollEnded,

    // ========================================================================
    // Student Errors
    // ========================================================================
    /// Another connected student already uses this name.
    #[error("Name already taken: '{name}'")]
    NameTaken {
        /// The requested display name.
        name: String,
    },

    /// The display name is empty.
    #[error("Name must not be empty")]
    InvalidName,

    /// The connection has no registered student.
    #[error("Student not found")]
    StudentNotFound,

    /// The student already answered the current poll.
    #[error("Already answered")]
    AlreadyAnswered,

    /// The submitted option index does not exist on the current poll.
    #[error("Invalid option {index}: poll has {option_count} options")]
    InvalidOption {
        /// The submitted option index.
        index: usize,
        /// Number of options on the current poll.
        option_count: usize,
    },

    // ========================================================================
    // Chat Errors
    // ========================================================================
    /// A chat message with no content was submitted.
    #[error("Chat message must not be empty")]
    EmptyMessage,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your classpoll.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },
}

impl ClassPollError {
    /// Creates a new `InvalidPoll` error with the given message.
    #[must_use]
    pub fn invalid_poll(message: impl Into<String>) -> Self {
        Self::InvalidPoll {
            message: message.into(),
        }
    }

    /// Creates a new `NameTaken` error.
    #[must_use]
    pub fn name_taken(name: impl Into<String>) -> Self {
        Self::NameTaken { name: name.into() }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Returns the stable machine-readable code sent to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PollInProgress => "poll_in_progress",
            Self::InvalidPoll { .. } => "invalid_poll",
            Self::NoActivePoll => "no_active_poll",
            Self::PollEnded => "poll_ended",
            Self::NameTaken { .. } => "name_taken",
            Self::InvalidName => "invalid_name",
            Self::StudentNotFound => "student_not_found",
            Self::AlreadyAnswered => "already_answered",
            Self::InvalidOption { .. } => "invalid_option",
            Self::EmptyMessage => "empty_message",
            Self::ConfigParseError { .. } => "config_parse_error",
            Self::ConfigValidationError { .. } => "config_validation_error",
        }
    }
}
