//! File attachments
//!
//! Validation shared by the upload route and the chat client, a client for
//! the `/api/upload` route, and markdown helpers for referencing uploaded
//! files in a message.

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default maximum upload size (5 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// MIME types accepted for upload
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "application/pdf"];

/// Why an upload was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("No file provided")]
    NoFile,

    #[error("File size exceeds {limit_mb}MB limit")]
    TooLarge { limit_mb: usize },

    #[error("File type not allowed. Please upload an image (JPEG, PNG, GIF) or PDF.")]
    TypeNotAllowed,
}

/// Check size and type against the upload rules
///
/// # Examples
///
/// ```
/// use helpdesk::upload::{validate_upload, UploadError, DEFAULT_MAX_UPLOAD_BYTES};
///
/// assert!(validate_upload(1024, "image/png", DEFAULT_MAX_UPLOAD_BYTES).is_ok());
/// assert_eq!(
///     validate_upload(1024, "text/plain", DEFAULT_MAX_UPLOAD_BYTES),
///     Err(UploadError::TypeNotAllowed)
/// );
/// ```
pub fn validate_upload(size: usize, mime: &str, max_bytes: usize) -> Result<(), UploadError> {
    if size > max_bytes {
        return Err(UploadError::TooLarge {
            limit_mb: (max_bytes / (1024 * 1024)).max(1),
        });
    }

    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return Err(UploadError::TypeNotAllowed);
    }

    Ok(())
}

/// Guess an allowed MIME type from a file extension
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Extension used when storing an upload of the given name
///
/// Anything other than a short alphanumeric extension becomes `bin`, so a
/// client-supplied name can never steer the stored path.
pub fn stored_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "bin",
    }
}

/// Result of an upload, as returned by the upload route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Markdown reference for a successful upload
    ///
    /// Images are embedded, other files linked.
    pub fn markdown(&self) -> Option<String> {
        let url = self.file_url.as_deref()?;
        let name = self.file_name.as_deref().unwrap_or("attachment");
        if self
            .file_type
            .as_deref()
            .is_some_and(|t| t.starts_with("image/"))
        {
            Some(image_markdown(url, name))
        } else {
            Some(file_link_markdown(url, name))
        }
    }
}

/// `![name](url)`
pub fn image_markdown(file_url: &str, file_name: &str) -> String {
    format!("![{}]({})", file_name, file_url)
}

/// `[name](url)`
pub fn file_link_markdown(file_url: &str, file_name: &str) -> String {
    format!("[{}]({})", file_name, file_url)
}

/// Client for the service's upload route
pub struct UploadClient {
    client: reqwest::Client,
    endpoint: String,
    max_bytes: usize,
}

impl UploadClient {
    /// Client for `{service_base}/api/upload`
    pub fn new(service_base: &str, max_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/upload", service_base.trim_end_matches('/')),
            max_bytes,
        }
    }

    /// Validate and upload a local file
    ///
    /// Never fails: problems are reported in the returned response.
    /// Validation happens before any network traffic.
    pub async fn upload_file(&self, path: &Path) -> UploadResponse {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", path.display(), e);
                return UploadResponse::failure(UploadError::NoFile.to_string());
            }
        };

        let mime = mime_from_path(path).unwrap_or("application/octet-stream");
        if let Err(e) = validate_upload(data.len(), mime, self.max_bytes) {
            return UploadResponse::failure(e.to_string());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let part = match Part::bytes(data).file_name(file_name).mime_str(mime) {
            Ok(part) => part,
            Err(e) => {
                tracing::error!("Error preparing upload: {}", e);
                return UploadResponse::failure(
                    "An unexpected error occurred while uploading the file",
                );
            }
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .multipart(Form::new().part("file", part))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error uploading file: {}", e);
                return UploadResponse::failure(
                    "An unexpected error occurred while uploading the file",
                );
            }
        };

        let ok = response.status().is_success();
        match response.json::<UploadResponse>().await {
            Ok(body) if ok => body,
            Ok(body) => UploadResponse::failure(
                body.error
                    .unwrap_or_else(|| "Failed to upload file".to_string()),
            ),
            Err(e) => {
                tracing::error!("Unreadable upload response: {}", e);
                UploadResponse::failure("An unexpected error occurred while uploading the file")
            }
        }
    }
}
