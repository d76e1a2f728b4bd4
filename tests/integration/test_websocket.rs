//! Integration tests for the WebSocket session protocol.
//!
//! These tests run a real server and drive it with several WebSocket
//! clients playing the teacher and students.

use std::net::TcpListener;
use std::time::Duration;

use classpoll_session::websocket::ReplyPayload;
use classpoll_session::{create_router, AppState, Config, ServerEvent};
use futures::SinkExt;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns the WebSocket URL.
async fn spawn_test_server(config: Config) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws");

    let router = create_router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Sends one request frame.
async fn send_request(client: &mut WsClient, id: u64, action: Value) {
    let text = json!({ "id": id, "action": action }).to_string();
    client
        .send(Message::Text(text))
        .await
        .expect("Failed to send request");
}

/// Receives the next text message from the WebSocket and parses it as `ServerEvent`.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> ServerEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Skips events until one matches `predicate`.
async fn receive_until<F>(client: &mut WsClient, predicate: F) -> ServerEvent
where
    F: Fn(&ServerEvent) -> bool,
{
    loop {
        let event = receive_event(client).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Waits for the reply to request `id`.
async fn receive_reply(client: &mut WsClient, id: u64) -> ReplyPayload {
    match receive_until(client, |e| matches!(e, ServerEvent::Reply(r) if r.id == id)).await {
        ServerEvent::Reply(reply) => reply,
        _ => unreachable!(),
    }
}

/// Sends a request and waits for its reply.
async fn request(client: &mut WsClient, id: u64, action: Value) -> ReplyPayload {
    send_request(client, id, action).await;
    receive_reply(client, id).await
}

async fn join_teacher(url: &str) -> WsClient {
    let mut client = connect_client(url).await;
    let reply = request(&mut client, 1, json!({"type": "teacher_join"})).await;
    assert!(reply.success);
    client
}

async fn join_student(url: &str, name: &str) -> WsClient {
    let mut client = connect_client(url).await;
    let reply = request(&mut client, 1, json!({"type": "student_join", "name": name})).await;
    assert!(reply.success, "join failed: {reply:?}");
    client
}

fn color_poll(time_limit: u32) -> Value {
    json!({
        "type": "create_poll",
        "question": "Color?",
        "options": ["Red", "Blue"],
        "timeLimit": time_limit
    })
}

// ============================================================================
// Poll Flow Tests
// ============================================================================

/// Tests a full round: poll creation, answers from every student, poll end.
#[tokio::test]
async fn test_poll_ends_when_all_students_answer() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;
    let mut bob = join_student(&ws_url, "Bob").await;

    let reply = request(&mut teacher, 2, color_poll(30)).await;
    assert!(reply.success);

    let created = receive_until(&mut ann, |e| matches!(e, ServerEvent::PollCreated(_))).await;
    let ServerEvent::PollCreated(created) = created else {
        unreachable!()
    };
    assert_eq!(created.poll.question, "Color?");
    assert_eq!(created.poll.time_limit, 30);

    let reply = request(&mut ann, 2, json!({"type": "submit_answer", "optionIndex": 0})).await;
    assert!(reply.success);
    assert_eq!(reply.data.unwrap()["results"]["votes"], json!([1, 0]));

    let reply = request(&mut ann, 3, json!({"type": "submit_answer", "optionIndex": 1})).await;
    assert!(!reply.success);
    assert_eq!(reply.code.as_deref(), Some("already_answered"));

    let reply = request(&mut bob, 2, json!({"type": "submit_answer", "optionIndex": 1})).await;
    assert!(reply.success);

    let ended = receive_until(&mut teacher, |e| matches!(e, ServerEvent::PollEnded(_))).await;
    let ServerEvent::PollEnded(ended) = ended else {
        unreachable!()
    };
    assert_eq!(ended.results.votes, vec![1, 1]);
    assert_eq!(ended.results.answered_count, 2);
    assert_eq!(ended.history.len(), 1);
    assert_eq!(ended.history[0].poll.question, "Color?");

    // Everyone answered, so a new poll is allowed right away.
    let reply = request(&mut teacher, 3, color_poll(30)).await;
    assert!(reply.success);
}

/// Tests that a poll nobody finishes ends when the timer runs out.
#[tokio::test]
async fn test_timer_ticks_until_poll_ends() {
    let config = Config {
        tick_interval_ms: 20,
        ..Config::default()
    };
    let (ws_url, _handle) = spawn_test_server(config).await;

    let mut teacher = join_teacher(&ws_url).await;
    let _ann = join_student(&ws_url, "Ann").await;

    let reply = request(&mut teacher, 2, color_poll(3)).await;
    assert!(reply.success);

    let mut ticks = Vec::new();
    loop {
        match receive_event(&mut teacher).await {
            ServerEvent::TimerTick(tick) => ticks.push(tick.time_remaining),
            ServerEvent::PollEnded(ended) => {
                assert_eq!(ended.results.time_remaining, 0);
                assert_eq!(ended.results.answered_count, 0);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(ticks, vec![2, 1, 0]);

    let reply = request(&mut teacher, 3, json!({"type": "get_history"})).await;
    assert_eq!(reply.data.unwrap()["history"].as_array().unwrap().len(), 1);
}

/// Tests that a new poll is refused while students are still answering.
#[tokio::test]
async fn test_create_poll_rejected_while_in_progress() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let _ann = join_student(&ws_url, "Ann").await;

    assert!(request(&mut teacher, 2, color_poll(30)).await.success);
    let reply = request(&mut teacher, 3, color_poll(30)).await;

    assert!(!reply.success);
    assert_eq!(reply.code.as_deref(), Some("poll_in_progress"));
    assert_eq!(
        reply.error.as_deref(),
        Some("Cannot create new poll: not all students have answered")
    );
}

/// Tests that the teacher can close a poll early.
#[tokio::test]
async fn test_clear_poll_broadcasts_history() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;
    assert!(request(&mut teacher, 2, color_poll(30)).await.success);

    let reply = request(&mut teacher, 3, json!({"type": "clear_poll"})).await;
    assert!(reply.success);

    let cleared = receive_until(&mut ann, |e| matches!(e, ServerEvent::PollCleared(_))).await;
    let ServerEvent::PollCleared(cleared) = cleared else {
        unreachable!()
    };
    assert_eq!(cleared.history.len(), 1);

    let reply = request(&mut ann, 2, json!({"type": "get_results"})).await;
    assert!(reply.data.unwrap()["results"].is_null());
}

// ============================================================================
// Roster Tests
// ============================================================================

/// Tests that a name in use cannot be taken by a second client.
#[tokio::test]
async fn test_duplicate_name_rejected() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let _ann = join_student(&ws_url, "Ann").await;
    let mut imposter = connect_client(&ws_url).await;

    let reply = request(&mut imposter, 1, json!({"type": "student_join", "name": "Ann"})).await;

    assert!(!reply.success);
    assert_eq!(reply.code.as_deref(), Some("name_taken"));
}

/// Tests that a kicked student is told and disconnected.
#[tokio::test]
async fn test_removed_student_is_notified_and_closed() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;

    let reply = request(
        &mut teacher,
        2,
        json!({"type": "remove_student", "studentName": "Ann"}),
    )
    .await;
    assert!(reply.success);
    assert_eq!(reply.data.unwrap()["roster"], json!([]));

    let removed = receive_until(&mut ann, |e| matches!(e, ServerEvent::StudentRemoved(_))).await;
    assert!(matches!(removed, ServerEvent::StudentRemoved(ref p) if p.name == "Ann"));

    // The server closes the socket after the notice.
    loop {
        match timeout(Duration::from_secs(5), ann.next())
            .await
            .expect("Timeout waiting for close")
        {
            None | Some(Ok(Message::Close(_)) | Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    // The name is free again.
    let _ann_again = join_student(&ws_url, "Ann").await;
}

/// Tests that a closed student connection leaves the roster.
#[tokio::test]
async fn test_disconnect_updates_roster() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;
    receive_until(&mut teacher, |e| {
        matches!(e, ServerEvent::RosterUpdated(p) if p.roster.len() == 1)
    })
    .await;

    ann.close(None).await.expect("Failed to close");

    let event = receive_until(&mut teacher, |e| matches!(e, ServerEvent::RosterUpdated(_))).await;
    assert!(matches!(event, ServerEvent::RosterUpdated(ref p) if p.roster.is_empty()));
}

/// Tests that the last unanswered student leaving ends the poll.
#[tokio::test]
async fn test_disconnect_of_last_unanswered_student_ends_poll() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;
    let mut bob = join_student(&ws_url, "Bob").await;
    assert!(request(&mut teacher, 2, color_poll(30)).await.success);
    assert!(
        request(&mut ann, 2, json!({"type": "submit_answer", "optionIndex": 0}))
            .await
            .success
    );

    bob.close(None).await.expect("Failed to close");

    let ended = receive_until(&mut teacher, |e| matches!(e, ServerEvent::PollEnded(_))).await;
    let ServerEvent::PollEnded(ended) = ended else {
        unreachable!()
    };
    assert_eq!(ended.results.votes, vec![1, 0]);
    assert_eq!(ended.results.total_students, 1);
}

// ============================================================================
// Chat Tests
// ============================================================================

/// Tests that chat messages reach every client with the right sender.
#[tokio::test]
async fn test_chat_message_broadcast() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;

    let mut teacher = join_teacher(&ws_url).await;
    let mut ann = join_student(&ws_url, "Ann").await;

    let reply = request(
        &mut ann,
        2,
        json!({"type": "send_chat_message", "message": "Is this graded?"}),
    )
    .await;
    assert!(reply.success);

    let posted = receive_until(&mut teacher, |e| {
        matches!(e, ServerEvent::ChatMessagePosted(_))
    })
    .await;
    let ServerEvent::ChatMessagePosted(posted) = posted else {
        unreachable!()
    };
    assert_eq!(posted.message.sender, "Ann");
    assert_eq!(posted.message.message, "Is this graded?");

    let reply = request(&mut teacher, 2, json!({"type": "get_chat_history"})).await;
    let messages = reply.data.unwrap()["messages"].clone();
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["role"], "student");
}

// ============================================================================
// Protocol Tests
// ============================================================================

/// Tests that garbage frames get an error reply and keep the socket open.
#[tokio::test]
async fn test_malformed_request_gets_error_reply() {
    let (ws_url, _handle) = spawn_test_server(Config::default()).await;
    let mut client = connect_client(&ws_url).await;

    client
        .send(Message::Text("{\"nope\":true}".to_string()))
        .await
        .expect("Failed to send");

    let reply = receive_reply(&mut client, 0).await;
    assert!(!reply.success);
    assert_eq!(reply.code.as_deref(), Some("invalid_request"));

    let reply = request(&mut client, 5, json!({"type": "get_history"})).await;
    assert!(reply.success);
}
