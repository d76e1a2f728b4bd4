//! Client request protocol and its dispatch onto the poll session.
//!
//! Every text frame from a client is a [`ClientRequest`]:
//!
//! ```json
//! {"id": 1, "action": {"type": "submit_answer", "optionIndex": 0}}
//! ```
//!
//! The request is answered with a `reply` event carrying the same id. Side
//! effects that other clients must see (roster changes, new polls, results)
//! are broadcast through the [`EventBroadcaster`](crate::websocket::EventBroadcaster).

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::api::AppState;
use crate::chat::Role;
use crate::error::{ClassPollError, Result};
use crate::session::{ConnectionId, NewPoll, PollSession};
use crate::websocket::ServerEvent;

/// Error code for frames that are not a valid request.
pub const INVALID_REQUEST_CODE: &str = "invalid_request";

/// Sender name used for chat messages from connections without a student name.
pub const TEACHER_SENDER: &str = "Teacher";

// ============================================================================
// Protocol Types
// ============================================================================

/// A request sent by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRequest {
    /// Client-chosen id echoed in the reply.
    pub id: u64,
    /// The requested action.
    pub action: ClientAction,
}

/// Actions a client can request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAction {
    /// Join the session as a student.
    StudentJoin {
        /// Display name.
        name: String,
    },
    /// Join the session as the teacher.
    TeacherJoin,
    /// Start a new poll.
    CreatePoll(NewPoll),
    /// Answer the current poll.
    SubmitAnswer {
        /// Index of the chosen option.
        #[serde(rename = "optionIndex")]
        option_index: usize,
    },
    /// Kick a student by name.
    RemoveStudent {
        /// Name of the student to remove.
        #[serde(rename = "studentName")]
        student_name: String,
    },
    /// Fetch results of the current poll.
    GetResults,
    /// Fetch archived polls.
    GetHistory,
    /// Post a chat message.
    SendChatMessage {
        /// Message text.
        message: String,
    },
    /// Fetch the chat log.
    GetChatHistory,
    /// Archive and close the current poll.
    ClearPoll,
}

impl ClientAction {
    /// Returns the wire name of the action.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StudentJoin { .. } => "student_join",
            Self::TeacherJoin => "teacher_join",
            Self::CreatePoll(_) => "create_poll",
            Self::SubmitAnswer { .. } => "submit_answer",
            Self::RemoveStudent { .. } => "remove_student",
            Self::GetResults => "get_results",
            Self::GetHistory => "get_history",
            Self::SendChatMessage { .. } => "send_chat_message",
            Self::GetChatHistory => "get_chat_history",
            Self::ClearPoll => "clear_poll",
        }
    }
}

/// What the server knows about one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Transport-assigned connection id.
    pub id: ConnectionId,
    /// Role announced by the client, if any.
    pub role: Option<Role>,
    /// Student name after a successful `student_join`.
    pub name: Option<String>,
}

impl ConnectionContext {
    /// Creates the context of a fresh, anonymous connection.
    #[must_use]
    pub const fn new(id: ConnectionId) -> Self {
        Self {
            id,
            role: None,
            name: None,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Parses and executes one client frame, returning the reply to send back.
pub async fn handle_message(state: &AppState, ctx: &mut ConnectionContext, text: &str) -> ServerEvent {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection = %ctx.id, "Rejecting malformed request: {}", e);
            return ServerEvent::reply_failure(0, INVALID_REQUEST_CODE, format!("Invalid request: {e}"));
        }
    };

    let id = request.id;
    let action = request.action.name();
    match dispatch(state, ctx, request.action).await {
        Ok(data) => ServerEvent::reply_ok(id, data),
        Err(e) => {
            debug!(connection = %ctx.id, action, code = e.code(), "Request rejected: {}", e);
            ServerEvent::reply_err(id, &e)
        }
    }
}

/// Executes one action and returns the reply data.
///
/// # Errors
///
/// Returns the session error that rejected the action.
pub async fn dispatch(
    state: &AppState,
    ctx: &mut ConnectionContext,
    action: ClientAction,
) -> Result<serde_json::Value> {
    match action {
        ClientAction::StudentJoin { name } => student_join(state, ctx, name).await,
        ClientAction::TeacherJoin => teacher_join(state, ctx).await,
        ClientAction::CreatePoll(new_poll) => create_poll(state, new_poll).await,
        ClientAction::SubmitAnswer { option_index } => submit_answer(state, ctx, option_index).await,
        ClientAction::RemoveStudent { student_name } => remove_student(state, &student_name).await,
        ClientAction::GetResults => {
            let session = state.session.lock().await;
            Ok(json!({ "results": session.results() }))
        }
        ClientAction::GetHistory => {
            let session = state.session.lock().await;
            Ok(json!({ "history": session.history() }))
        }
        ClientAction::SendChatMessage { message } => send_chat_message(state, ctx, message).await,
        ClientAction::GetChatHistory => {
            let chat = state.chat.lock().await;
            Ok(json!({ "messages": chat.messages() }))
        }
        ClientAction::ClearPoll => clear_poll(state).await,
    }
}

async fn student_join(
    state: &AppState,
    ctx: &mut ConnectionContext,
    name: String,
) -> Result<serde_json::Value> {
    let mut session = state.session.lock().await;
    let roster = session.add_student(ctx.id, name.clone())?;

    ctx.role = Some(Role::Student);
    ctx.name = Some(name.clone());
    info!(connection = %ctx.id, name = %name, "Student joined");

    state.broadcaster.send(ServerEvent::roster_updated(roster.clone()));

    let results = if session.has_ended() {
        session.results()
    } else {
        None
    };
    Ok(json!({
        "roster": roster,
        "currentPoll": session.current_poll(),
        "results": results,
        "timeRemaining": session.time_remaining(),
    }))
}

async fn teacher_join(state: &AppState, ctx: &mut ConnectionContext) -> Result<serde_json::Value> {
    ctx.role = Some(Role::Teacher);
    info!(connection = %ctx.id, "Teacher joined");

    let session = state.session.lock().await;
    Ok(json!({
        "roster": session.roster(),
        "currentPoll": session.current_poll(),
        "results": session.results(),
        "history": session.history(),
    }))
}

async fn create_poll(state: &AppState, new_poll: NewPoll) -> Result<serde_json::Value> {
    let mut session = state.session.lock().await;
    let poll = session.create_poll(new_poll)?;
    info!(
        poll_id = %poll.id,
        question = %poll.question,
        options = poll.options.len(),
        time_limit = poll.time_limit,
        "Poll created"
    );

    state.broadcaster.send(ServerEvent::poll_created(poll.clone()));
    state.broadcaster.send(ServerEvent::roster_updated(session.roster()));
    state
        .timer
        .start(poll.id, state.session.clone(), state.broadcaster.clone())
        .await;

    Ok(json!({ "poll": poll }))
}

async fn submit_answer(
    state: &AppState,
    ctx: &ConnectionContext,
    option_index: usize,
) -> Result<serde_json::Value> {
    let name = ctx.name.as_deref().ok_or(ClassPollError::StudentNotFound)?;

    let mut session = state.session.lock().await;
    let results = session.submit_answer(ctx.id, name, option_index)?;
    debug!(name = %name, option_index, "Answer recorded");

    state.broadcaster.send(ServerEvent::results_updated(results.clone()));
    state.broadcaster.send(ServerEvent::roster_updated(session.roster()));
    finish_poll_if_complete(state, &mut session).await;

    Ok(json!({ "results": results }))
}

async fn remove_student(state: &AppState, student_name: &str) -> Result<serde_json::Value> {
    let mut session = state.session.lock().await;
    let removed = session.remove_student_by_name(student_name);

    match removed.connection_id {
        Some(connection_id) => {
            info!(name = %student_name, "Student removed by teacher");
            if !state
                .connections
                .send_to(connection_id, ServerEvent::student_removed(student_name))
                .await
            {
                debug!(name = %student_name, "Removed student had no live connection");
            }
        }
        None => {
            debug!(name = %student_name, "Remove requested for unknown student");
        }
    }

    state.broadcaster.send(ServerEvent::roster_updated(removed.roster.clone()));
    if let Some(results) = session.results() {
        state.broadcaster.send(ServerEvent::results_updated(results));
    }
    finish_poll_if_complete(state, &mut session).await;

    Ok(json!({ "roster": removed.roster }))
}

async fn send_chat_message(
    state: &AppState,
    ctx: &ConnectionContext,
    message: String,
) -> Result<serde_json::Value> {
    let sender = ctx.name.clone().unwrap_or_else(|| TEACHER_SENDER.to_string());
    let role = ctx.role.unwrap_or_default();

    let posted = state.chat.lock().await.add_message(sender, message, role)?;
    debug!(sender = %posted.sender, role = %posted.role, "Chat message posted");

    state
        .broadcaster
        .send(ServerEvent::chat_message_posted(posted.clone()));
    Ok(json!({ "message": posted }))
}

async fn clear_poll(state: &AppState) -> Result<serde_json::Value> {
    let mut session = state.session.lock().await;
    if session.current_poll().is_none() {
        return Err(ClassPollError::NoActivePoll);
    }

    state.timer.stop().await;
    session.clear_current_poll();
    info!("Current poll cleared");

    let history = session.history().to_vec();
    state.broadcaster.send(ServerEvent::poll_cleared(history.clone()));
    state.broadcaster.send(ServerEvent::roster_updated(session.roster()));

    Ok(json!({ "history": history }))
}

/// Ends the current poll if every connected student has answered.
///
/// Stops the countdown and broadcasts `poll_ended` once per poll.
async fn finish_poll_if_complete(state: &AppState, session: &mut PollSession) {
    if !session.has_ended() || session.is_archived() {
        return;
    }

    state.timer.stop().await;
    if let Some(completed) = session.complete_poll() {
        info!(
            poll_id = %completed.results.poll_id,
            answered = completed.results.answered_count,
            "Poll ended"
        );
        state
            .broadcaster
            .send(ServerEvent::poll_ended(completed.results, completed.history));
    }
}

// ============================================================================
// Disconnect
// ============================================================================

/// Cleans up after a closed connection.
///
/// A registered student is removed from the roster; their answer stays in
/// the results. Removing the last unanswered student can end the poll.
pub async fn handle_disconnect(state: &AppState, ctx: &ConnectionContext) {
    let mut session = state.session.lock().await;
    let Some(student) = session.remove_student(ctx.id) else {
        return;
    };

    info!(connection = %ctx.id, name = %student.name, "Student left");
    state.broadcaster.send(ServerEvent::roster_updated(session.roster()));
    finish_poll_if_complete(state, &mut session).await;
}

// ============================================================================
// Tests
// ============================================================================
