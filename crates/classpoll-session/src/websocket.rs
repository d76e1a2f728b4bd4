//! WebSocket event types, broadcasting and the per-connection loop.
//!
//! Every frame sent by the server is a JSON object with `event` and
//! `payload` fields. Most events are broadcast to every connected client;
//! `reply` and `student_removed` go to a single connection.
//!
//! # Event Types
//!
//! - `reply` - Answer to one client request (direct)
//! - `roster_updated` - Student list changed
//! - `poll_created` - Teacher started a new poll
//! - `results_updated` - Vote counts changed
//! - `timer_tick` - One second elapsed on the poll timer
//! - `poll_ended` - Timer ran out or every student answered
//! - `poll_cleared` - Teacher closed the current poll
//! - `student_removed` - The receiving student was kicked (direct)
//! - `chat_message_posted` - New chat message
//!
//! # Example
//!
//! ```no_run
//! use classpoll_session::websocket::{EventBroadcaster, ServerEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(ServerEvent::timer_tick(30));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::actions::{self, ConnectionContext};
use crate::api::AppState;
use crate::chat::ChatMessage;
use crate::error::ClassPollError;
use crate::session::{ConnectionId, HistoryEntry, Poll, PollResults, RosterEntry};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `reply` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPayload {
    /// Id of the request being answered.
    pub id: u64,
    /// Whether the request succeeded.
    pub success: bool,
    /// Response data on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Payload for the `roster_updated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterPayload {
    /// Connected students in join order.
    pub roster: Vec<RosterEntry>,
}

/// Payload for the `poll_created` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPayload {
    /// The new poll.
    pub poll: Poll,
}

/// Payload for the `results_updated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsPayload {
    /// Current results.
    pub results: PollResults,
}

/// Payload for the `timer_tick` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerTickPayload {
    /// Seconds left on the poll timer.
    pub time_remaining: u32,
}

/// Payload for the `poll_ended` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollEndedPayload {
    /// Final results of the poll.
    pub results: PollResults,
    /// History including the ended poll.
    pub history: Vec<HistoryEntry>,
}

/// Payload for the `poll_cleared` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollClearedPayload {
    /// History including the cleared poll.
    pub history: Vec<HistoryEntry>,
}

/// Payload for the `student_removed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRemovedPayload {
    /// Name the student was removed under.
    pub name: String,
}

/// Payload for the `chat_message_posted` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    /// The posted message.
    pub message: ChatMessage,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Server-to-client WebSocket events.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Answer to a client request.
    Reply(ReplyPayload),
    /// Student list changed.
    RosterUpdated(RosterPayload),
    /// A new poll started.
    PollCreated(PollPayload),
    /// Results of the current poll changed.
    ResultsUpdated(ResultsPayload),
    /// Poll timer ticked.
    TimerTick(TimerTickPayload),
    /// The current poll ended.
    PollEnded(PollEndedPayload),
    /// The teacher cleared the current poll.
    PollCleared(PollClearedPayload),
    /// The receiving student was removed by the teacher.
    StudentRemoved(StudentRemovedPayload),
    /// A chat message was posted.
    ChatMessagePosted(ChatMessagePayload),
}

impl ServerEvent {
    /// Creates a successful `Reply` carrying `data`.
    #[must_use]
    pub const fn reply_ok(id: u64, data: serde_json::Value) -> Self {
        Self::Reply(ReplyPayload {
            id,
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }

    /// Creates a failed `Reply` from a session error.
    #[must_use]
    pub fn reply_err(id: u64, error: &ClassPollError) -> Self {
        Self::reply_failure(id, error.code(), error.to_string())
    }

    /// Creates a failed `Reply` with an explicit code and message.
    #[must_use]
    pub fn reply_failure(id: u64, code: &str, message: impl Into<String>) -> Self {
        Self::Reply(ReplyPayload {
            id,
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.to_string()),
        })
    }

    /// Creates a `RosterUpdated` event.
    #[must_use]
    pub const fn roster_updated(roster: Vec<RosterEntry>) -> Self {
        Self::RosterUpdated(RosterPayload { roster })
    }

    /// Creates a `PollCreated` event.
    #[must_use]
    pub const fn poll_created(poll: Poll) -> Self {
        Self::PollCreated(PollPayload { poll })
    }

    /// Creates a `ResultsUpdated` event.
    #[must_use]
    pub const fn results_updated(results: PollResults) -> Self {
        Self::ResultsUpdated(ResultsPayload { results })
    }

    /// Creates a `TimerTick` event.
    #[must_use]
    pub const fn timer_tick(time_remaining: u32) -> Self {
        Self::TimerTick(TimerTickPayload { time_remaining })
    }

    /// Creates a `PollEnded` event.
    #[must_use]
    pub const fn poll_ended(results: PollResults, history: Vec<HistoryEntry>) -> Self {
        Self::PollEnded(PollEndedPayload { results, history })
    }

    /// Creates a `PollCleared` event.
    #[must_use]
    pub const fn poll_cleared(history: Vec<HistoryEntry>) -> Self {
        Self::PollCleared(PollClearedPayload { history })
    }

    /// Creates a `StudentRemoved` event.
    #[must_use]
    pub fn student_removed(name: impl Into<String>) -> Self {
        Self::StudentRemoved(StudentRemovedPayload { name: name.into() })
    }

    /// Creates a `ChatMessagePosted` event.
    #[must_use]
    pub const fn chat_message_posted(message: ChatMessage) -> Self {
        Self::ChatMessagePosted(ChatMessagePayload { message })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Reply(_) => "reply",
            Self::RosterUpdated(_) => "roster_updated",
            Self::PollCreated(_) => "poll_created",
            Self::ResultsUpdated(_) => "results_updated",
            Self::TimerTick(_) => "timer_tick",
            Self::PollEnded(_) => "poll_ended",
            Self::PollCleared(_) => "poll_cleared",
            Self::StudentRemoved(_) => "student_removed",
            Self::ChatMessagePosted(_) => "chat_message_posted",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all connected WebSocket clients.
///
/// Uses a tokio broadcast channel for pub-sub event distribution.
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// The buffer determines how many events can be queued per subscriber
    /// before old events are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// some events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all connected subscribers.
    ///
    /// Returns the number of receivers that will see the event.
    pub fn send(&self, event: ServerEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Connection Registry
// ============================================================================

/// Direct delivery channels for individual connections.
///
/// Used for events that must reach exactly one client, such as telling a
/// kicked student they were removed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    senders: Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the receiving end of its channel.
    pub async fn register(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().await.insert(connection_id, tx);
        rx
    }

    /// Forgets a connection.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        self.senders.lock().await.remove(&connection_id);
    }

    /// Sends an event to one connection.
    ///
    /// Returns `false` if the connection is unknown or already gone.
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.senders
            .lock()
            .await
            .get(&connection_id)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.senders.lock().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.senders.lock().await.is_empty()
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler.
///
/// Called when a client connects to `/ws`. Upgrades the HTTP connection
/// to a WebSocket and spawns a handler task.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serializes an event and writes it to the socket.
///
/// Returns `false` if the client is gone.
async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(event = event.event_name(), "Failed to serialize event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json)).await.is_ok()
}

/// Handles a single WebSocket connection.
///
/// - Registers a direct channel for targeted events
/// - Answers client requests with `reply` events
/// - Forwards all broadcast events to the client
/// - Sends heartbeat pings every 30 seconds
/// - Runs the disconnect hook when the socket closes
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let mut ctx = ConnectionContext::new(connection_id);
    let mut direct_receiver = state.connections.register(connection_id).await;
    let mut event_receiver = state.broadcaster.subscribe();

    info!(connection = %connection_id, "Client connected");

    let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            // Client requests and control frames
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = actions::handle_message(&state, &mut ctx, &text).await;
                        if !send_event(&mut sender, &reply).await {
                            debug!("Failed to send reply, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from client");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            // Forward broadcast events to client
            event = event_receiver.recv() => {
                match event {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(connection = %connection_id, "Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            // Events addressed to this connection only
            direct = direct_receiver.recv() => {
                let Some(event) = direct else {
                    break;
                };
                let kicked = matches!(event, ServerEvent::StudentRemoved(_));
                if !send_event(&mut sender, &event).await || kicked {
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
    actions::handle_disconnect(&state, &ctx).await;
    state.connections.unregister(connection_id).await;

    info!(connection = %connection_id, "Client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
