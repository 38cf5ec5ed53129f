//! Upload route
//!
//! Accepts a multipart form with a single `file` field, validates it and
//! writes it under `<public_dir>/uploads/` with a generated name.

use super::AppState;
use crate::error::{HelpdeskError, Result};
use crate::upload::{stored_extension, validate_upload, UploadError, UploadResponse};
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::Path;

struct ReceivedFile {
    name: String,
    content_type: String,
    data: Bytes,
}

fn rejected(message: String) -> Response {
    metrics::increment_counter!("uploads_total", "outcome" => "rejected");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// `POST /api/upload`
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut received = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(data) => {
                        received = Some(ReceivedFile {
                            name,
                            content_type,
                            data,
                        });
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Upload: failed to read file field: {}", e);
                        return rejected(format!("Could not read uploaded file: {}", e));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Upload: malformed multipart body: {}", e);
                return rejected(UploadError::NoFile.to_string());
            }
        }
    }

    let Some(file) = received else {
        return rejected(UploadError::NoFile.to_string());
    };

    if let Err(e) = validate_upload(file.data.len(), &file.content_type, state.max_upload_bytes) {
        tracing::info!(
            name = %file.name,
            size = file.data.len(),
            content_type = %file.content_type,
            "Upload rejected: {}",
            e
        );
        return rejected(e.to_string());
    }

    match store_upload(&state.upload_dir(), &file.name, &file.data).await {
        Ok(stored) => {
            metrics::increment_counter!("uploads_total", "outcome" => "stored");
            tracing::info!(name = %file.name, stored = %stored, "Upload stored");
            Json(UploadResponse {
                success: true,
                file_url: Some(format!("/uploads/{}", stored)),
                file_name: Some(file.name),
                file_type: Some(file.content_type),
                error: None,
            })
            .into_response()
        }
        Err(e) => {
            metrics::increment_counter!("uploads_total", "outcome" => "failed");
            tracing::error!("Error uploading file: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error uploading file: {}", e) })),
            )
                .into_response()
        }
    }
}

/// Write `data` under `dir` with a generated name; returns that name
async fn store_upload(dir: &Path, original_name: &str, data: &[u8]) -> Result<String> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        HelpdeskError::Upload(format!(
            "Failed to create upload directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let stored = format!(
        "{}.{}",
        ulid::Ulid::new().to_string().to_lowercase(),
        stored_extension(original_name)
    );
    tokio::fs::write(dir.join(&stored), data)
        .await
        .map_err(|e| HelpdeskError::Upload(format!("Failed to write {}: {}", stored, e)))?;

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use crate::server::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "helpdesk-test-boundary";

    fn multipart_request(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n",
                b = BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_image_is_stored_and_described() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));

        let response = app
            .oneshot(multipart_request("file", "screen.png", "image/png", b"\x89PNG"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["fileName"], "screen.png");
        assert_eq!(body["fileType"], "image/png");

        let url = body["fileUrl"].as_str().unwrap();
        assert!(url.starts_with("/uploads/") && url.ends_with(".png"));
        let stored = dir.path().join(url.trim_start_matches('/'));
        assert_eq!(std::fs::read(stored).unwrap(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_disallowed_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));

        let response = app
            .oneshot(multipart_request("file", "run.sh", "text/x-shellscript", b"#!/bin/sh"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "File type not allowed. Please upload an image (JPEG, PNG, GIF) or PDF."
        );
        assert!(!dir.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));
        let data = vec![0u8; crate::upload::DEFAULT_MAX_UPLOAD_BYTES + 1];

        let response = app
            .oneshot(multipart_request("file", "big.pdf", "application/pdf", &data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "File size exceeds 5MB limit");
    }

    #[tokio::test]
    async fn test_missing_file_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state("http://127.0.0.1:9", dir.path().to_path_buf()));

        let response = app
            .oneshot(multipart_request("other", "a.png", "image/png", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No file provided");
    }
}
