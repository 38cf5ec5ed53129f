//! Canned chat route used when no AI backend is wired up

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chat::types::now_millis;

pub const GREETING: &str =
    "Hi there! I'm your AI tech support assistant. How can I help you today?";

const MOCK_REPLY_DELAY: Duration = Duration::from_millis(1000);

/// `GET /api/chat`
pub async fn greeting() -> Json<Value> {
    Json(json!({
        "messages": [{
            "id": "1",
            "content": GREETING,
            "role": "assistant",
            "timestamp": now_millis(),
        }]
    }))
}

/// `POST /api/chat`
///
/// Echoes the message back inside a fixed sentence after a short delay.
pub async fn mock_reply(body: Bytes) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Chat: unreadable request body: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to process request"})),
            )
                .into_response();
        }
    };

    let Some(message) = request
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid request: message is required and must be a string"})),
        )
            .into_response();
    };

    tokio::time::sleep(MOCK_REPLY_DELAY).await;

    let now = now_millis();
    Json(json!({
        "id": now.to_string(),
        "message": format!(
            "I'll help you with \"{}\". This is a simulated response from the API.",
            message
        ),
        "timestamp": now,
    }))
    .into_response()
}
