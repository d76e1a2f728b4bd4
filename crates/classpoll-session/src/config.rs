//! Configuration types for the classpoll server.
//!
//! Configuration is read from `classpoll.json`. Every field has a default, so
//! a missing file or an empty object yields a working setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClassPollError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "classpoll.json";

/// Default bind address.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default listening port.
const fn default_port() -> u16 {
    5000
}

/// Default poll time limit in seconds.
const fn default_time_limit() -> u32 {
    crate::session::DEFAULT_TIME_LIMIT_SECS
}

/// Default number of chat messages retained.
const fn default_max_chat_messages() -> usize {
    crate::chat::DEFAULT_MAX_MESSAGES
}

/// Default timer tick interval in milliseconds.
const fn default_tick_interval_ms() -> u64 {
    1000
}

/// Default per-subscriber broadcast buffer.
const fn default_broadcast_capacity() -> usize {
    100
}

/// Main configuration for the classpoll server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin for the browser frontend. Any origin when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_url: Option<String>,

    /// Time limit applied when a poll is created without one.
    #[serde(default = "default_time_limit")]
    pub default_time_limit: u32,

    /// Number of chat messages kept in the log.
    #[serde(default = "default_max_chat_messages")]
    pub max_chat_messages: usize,

    /// Interval between poll timer ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Events buffered per WebSocket subscriber before old ones are dropped.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_url: None,
            default_time_limit: default_time_limit(),
            max_chat_messages: default_max_chat_messages(),
            tick_interval_ms: default_tick_interval_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `classpoll.json` in the current directory and falls back to
    /// the default configuration when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ClassPollError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `classpoll.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClassPollError::ConfigParseError` if the file cannot be read
    /// or is not valid JSON, and `ClassPollError::ConfigValidationError` if a
    /// value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ClassPollError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ClassPollError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ClassPollError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ClassPollError::config_validation(
                "host must not be empty",
                "Set host to an address such as \"0.0.0.0\" in your classpoll.json",
            ));
        }

        if self.default_time_limit == 0 {
            return Err(ClassPollError::config_validation(
                "defaultTimeLimit must be greater than 0",
                "Set defaultTimeLimit to at least 1 second in your classpoll.json",
            ));
        }

        if self.max_chat_messages == 0 {
            return Err(ClassPollError::config_validation(
                "maxChatMessages must be greater than 0",
                "Set maxChatMessages to at least 1 in your classpoll.json",
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(ClassPollError::config_validation(
                "tickIntervalMs must be greater than 0",
                "Set tickIntervalMs to 1000 for one tick per second",
            ));
        }

        if self.broadcast_capacity == 0 {
            return Err(ClassPollError::config_validation(
                "broadcastCapacity must be greater than 0",
                "Set broadcastCapacity to at least 1 in your classpoll.json",
            ));
        }

        if matches!(&self.frontend_url, Some(url) if url.trim().is_empty()) {
            return Err(ClassPollError::config_validation(
                "frontendUrl must not be empty when set",
                "Remove frontendUrl to allow any origin, or set it to e.g. \"http://localhost:5173\"",
            ));
        }

        Ok(())
    }

    /// Returns the timer tick interval as a `Duration`.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
