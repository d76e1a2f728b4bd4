//! Integration tests for the HTTP endpoints.

use std::net::TcpListener;
use std::time::Duration;

use classpoll_session::{create_router, AppState, ChatMessage, Config, HealthResponse, Role};
use serde_json::Value;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns a server around `state` and returns its base URL.
async fn spawn_test_server(state: AppState) -> String {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{addr}")
}

#[tokio::test]
async fn test_health_endpoint() {
    let base = spawn_test_server(AppState::new(Config::default())).await;

    let health: HealthResponse = reqwest::get(format!("{base}/health"))
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");

    assert_eq!(health.status, "ok");
    assert_eq!(health.message, "Live polling server is running");
}

#[tokio::test]
async fn test_read_endpoints_on_fresh_session() {
    let base = spawn_test_server(AppState::new(Config::default())).await;

    let results: Value = reqwest::get(format!("{base}/api/results"))
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    assert!(results.is_null());

    for path in ["history", "roster", "chat"] {
        let body: Value = reqwest::get(format!("{base}/api/{path}"))
            .await
            .expect("Request failed")
            .json()
            .await
            .expect("Invalid JSON");
        assert_eq!(body, Value::Array(vec![]), "/api/{path} should be empty");
    }
}

#[tokio::test]
async fn test_chat_endpoint_returns_messages() {
    let state = AppState::new(Config::default());
    state
        .chat
        .lock()
        .await
        .add_message("Teacher", "Quiz starts soon", Role::Teacher)
        .expect("Failed to add message");
    let base = spawn_test_server(state).await;

    let messages: Vec<ChatMessage> = reqwest::get(format!("{base}/api/chat"))
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, "Teacher");
    assert_eq!(messages[0].role, Role::Teacher);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let base = spawn_test_server(AppState::new(Config::default())).await;

    let response = reqwest::get(format!("{base}/api/unknown"))
        .await
        .expect("Request failed");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
