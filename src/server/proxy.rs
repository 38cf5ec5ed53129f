//! Completions proxy route
//!
//! Forwards the request body unchanged to `{api_base}/chat/completions`,
//! moving the credential from `X-OpenRouter-Key` into a bearer token. When
//! the body asks for a stream the upstream event stream is passed through
//! as-is.

use super::AppState;
use crate::providers::openrouter::API_KEY_HEADER;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::time::Instant;

const RAW_PREVIEW_CHARS: usize = 500;

fn error_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// `POST /api/openrouter`
pub async fn forward_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Proxy: invalid JSON in request body: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                json!({"error": "Invalid JSON in request body"}),
            );
        }
    };

    let Some(api_key) = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
    else {
        tracing::warn!("Proxy: missing {} header", API_KEY_HEADER);
        return error_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "Missing OpenRouter API key. Please provide X-OpenRouter-Key header."}),
        );
    };

    let stream = request
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    metrics::increment_counter!("proxy_requests_total", "stream" => stream.to_string());

    let model = request
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let message_count = request
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    tracing::debug!(
        model,
        messages = message_count,
        stream,
        key_prefix = %api_key.chars().take(8).collect::<String>(),
        "Proxy: forwarding completion request"
    );

    let started = Instant::now();
    let upstream = state
        .http
        .post(state.provider.completions_url())
        .header("Authorization", format!("Bearer {}", api_key))
        .header("HTTP-Referer", &state.provider.referer)
        .header("X-Title", &state.provider.app_title)
        .json(&request)
        .send()
        .await;
    metrics::histogram!("proxy_upstream_seconds", started.elapsed().as_secs_f64());

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!("Proxy: network error while contacting upstream: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Network error while contacting OpenRouter API",
                    "message": e.to_string(),
                }),
            );
        }
    };

    let upstream_status = upstream.status();
    tracing::debug!("Proxy: upstream responded {}", upstream_status);

    if !upstream_status.is_success() {
        let status =
            StatusCode::from_u16(upstream_status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let reason = upstream_status.canonical_reason().unwrap_or("Unknown");
        let details = upstream
            .text()
            .await
            .unwrap_or_else(|_| "Could not read error details".to_string());
        tracing::error!("Proxy: upstream error ({}): {}", upstream_status, details);
        return error_response(
            status,
            json!({
                "error": format!("OpenRouter API error: {}", reason),
                "details": details,
            }),
        );
    }

    if stream {
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response();
    }

    let text = match upstream.text().await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Proxy: could not read upstream body: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Failed to parse OpenRouter response"}),
            );
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(data) => Json(data).into_response(),
        Err(e) => {
            tracing::error!("Proxy: upstream returned non-JSON body: {}", e);
            let preview: String = text.chars().take(RAW_PREVIEW_CHARS).collect();
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Failed to parse OpenRouter response as JSON",
                    "rawResponse": preview,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use crate::server::tests::test_state;
    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post(body: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/openrouter")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));
        let response = app.oneshot(post("{nope", Some("sk-a"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Invalid JSON in request body");
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));
        let response = app.oneshot(post("{}", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("X-OpenRouter-Key"));
    }

    #[tokio::test]
    async fn test_buffered_reply_is_forwarded() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header_is("authorization", "Bearer sk-good"))
            .and(header_is("x-title", "Computer Support Assistant"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-1",
                "choices": [{"message": {"content": "Reboot"}, "finish_reason": "stop"}]
            })))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&upstream.uri(), dir.path().to_path_buf()));
        let response = app
            .oneshot(post(r#"{"model":"m","messages":[]}"#, Some("sk-good")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let body = json_body(response).await;
        assert_eq!(body["choices"][0]["message"]["content"], "Reboot");
    }

    #[tokio::test]
    async fn test_upstream_error_status_is_forwarded() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&upstream.uri(), dir.path().to_path_buf()));
        let response = app.oneshot(post("{}", Some("sk-bad"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"], "OpenRouter API error: Unauthorized");
        assert_eq!(body["details"], "bad key");
    }

    #[tokio::test]
    async fn test_non_json_upstream_reply_is_500_with_preview() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(800)))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&upstream.uri(), dir.path().to_path_buf()));
        let response = app.oneshot(post("{}", Some("sk-a"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["rawResponse"].as_str().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn test_stream_is_passed_through() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&upstream.uri(), dir.path().to_path_buf()));
        let response = app
            .oneshot(post(r#"{"stream":true}"#, Some("sk-a")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], sse.as_bytes());
    }

    #[tokio::test]
    async fn test_network_error_is_500() {
        let dir = tempfile::tempdir().unwrap();
        // port 9 (discard) is not expected to accept connections
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));
        let response = app.oneshot(post("{}", Some("sk-a"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Network error while contacting OpenRouter API");
    }
}
