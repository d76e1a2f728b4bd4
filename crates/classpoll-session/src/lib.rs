//! classpoll session coordinator
//!
//! Runs one classroom live-polling session: polls with a countdown, student
//! roster, answers and results, poll history and a side chat. Clients talk
//! to it over a WebSocket; read-only state is also served over HTTP.

pub mod actions;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod timer;
pub mod websocket;

pub use actions::{ClientAction, ClientRequest, ConnectionContext};
pub use api::{create_router, AppState, HealthResponse};
pub use chat::{ChatLog, ChatMessage, Role};
pub use config::Config;
pub use error::{ClassPollError, Result};
pub use session::{
    CompletedPoll, ConnectionId, HistoryEntry, NewPoll, Poll, PollResults, PollSession,
    RemovedStudent, RosterEntry, Student, StudentAnswer, DEFAULT_TIME_LIMIT_SECS,
};
pub use timer::PollTimer;
pub use websocket::{ConnectionRegistry, EventBroadcaster, ServerEvent};
