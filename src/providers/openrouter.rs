//! AI client for OpenRouter-compatible completions behind the local proxy
//!
//! Requests go to the service's `/api/openrouter` route with the credential
//! in the `X-OpenRouter-Key` header. The client holds a primary and an
//! optional backup credential; when the primary is rejected with 401 it is
//! marked failed and the request is retried once with the backup.

use crate::config::AssistantConfig;
use crate::error::{HelpdeskError, Result};
use crate::providers::base::{AiResponse, ByteStream, Message, Provider};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Header carrying the credential to the proxy
pub const API_KEY_HEADER: &str = "X-OpenRouter-Key";

const KEY_PREFIX: &str = "sk-";

/// Whether `key` looks like a usable credential
///
/// # Examples
///
/// ```
/// use helpdesk::providers::openrouter::is_valid_key;
///
/// assert!(is_valid_key("sk-or-v1-abc"));
/// assert!(!is_valid_key(""));
/// assert!(!is_valid_key("pk-123"));
/// ```
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.starts_with(KEY_PREFIX)
}

fn redact(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}... (length: {})", prefix, key.len())
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    primary: String,
    backup: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completions client with primary/backup credential fallback
pub struct AiClient {
    client: Client,
    proxy_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: RwLock<String>,
    credentials: RwLock<Credentials>,
    primary_failed: AtomicBool,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("proxy_url", &self.proxy_url)
            .field("model", &self.model)
            .field("primary_failed", &self.primary_failed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AiClient {
    /// Build a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `HelpdeskError::MissingCredentials` when neither credential
    /// is a valid key.
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk::config::AssistantConfig;
    /// use helpdesk::providers::AiClient;
    ///
    /// let config = AssistantConfig {
    ///     api_key: Some("sk-test".to_string()),
    ///     ..Default::default()
    /// };
    /// assert!(AiClient::new(&config).is_ok());
    ///
    /// let empty = AssistantConfig::default();
    /// assert!(AiClient::new(&empty).is_err());
    /// ```
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let mut credentials = Credentials {
            primary: config.api_key.clone().unwrap_or_default(),
            backup: config.backup_api_key.clone().unwrap_or_default(),
        };

        tracing::info!(
            primary = is_valid_key(&credentials.primary),
            backup = is_valid_key(&credentials.backup),
            model = %config.model,
            proxy = %config.proxy_url,
            "Configuring AI client"
        );

        if !is_valid_key(&credentials.primary) && !is_valid_key(&credentials.backup) {
            return Err(HelpdeskError::MissingCredentials(
                "no valid API keys available for the AI client".to_string(),
            )
            .into());
        }

        if !is_valid_key(&credentials.primary) {
            tracing::info!("No primary key available, promoting backup to primary");
            credentials.primary = std::mem::take(&mut credentials.backup);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("helpdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HelpdeskError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            proxy_url: config.proxy_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: RwLock::new(config.system_prompt.clone()),
            credentials: RwLock::new(credentials),
            primary_failed: AtomicBool::new(false),
        })
    }

    /// Model identifier sent with every request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Current system instruction
    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Replace the system instruction
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        if let Ok(mut current) = self.system_prompt.write() {
            *current = prompt.into();
        }
    }

    /// Replace the primary credential
    ///
    /// Invalid keys are ignored. A new primary clears the failed mark.
    pub fn set_api_key(&self, key: &str) -> bool {
        if !is_valid_key(key) {
            tracing::warn!("Attempted to set invalid API key");
            return false;
        }

        let Ok(mut creds) = self.credentials.write() else {
            return false;
        };
        creds.primary = key.to_string();
        self.primary_failed.store(false, Ordering::SeqCst);
        tracing::info!("API key set ({})", redact(key));
        true
    }

    /// Replace the backup credential
    ///
    /// When no valid primary exists the backup is promoted to primary.
    pub fn set_backup_api_key(&self, key: &str) -> bool {
        if !is_valid_key(key) {
            tracing::warn!("Attempted to set invalid backup API key");
            return false;
        }

        let Ok(mut creds) = self.credentials.write() else {
            return false;
        };
        if is_valid_key(&creds.primary) {
            creds.backup = key.to_string();
            tracing::info!("Backup API key set ({})", redact(key));
        } else {
            creds.primary = key.to_string();
            creds.backup.clear();
            self.primary_failed.store(false, Ordering::SeqCst);
            tracing::info!("No primary key available, promoting backup to primary");
        }
        true
    }

    /// Whether the primary credential has been rejected
    pub fn primary_failed(&self) -> bool {
        self.primary_failed.load(Ordering::SeqCst)
    }

    fn active_key(&self) -> Result<String> {
        let creds = self
            .credentials
            .read()
            .map_err(|_| HelpdeskError::Provider("Credential lock poisoned".to_string()))?;
        if self.primary_failed() && is_valid_key(&creds.backup) {
            Ok(creds.backup.clone())
        } else {
            Ok(creds.primary.clone())
        }
    }

    fn has_valid_backup(&self) -> bool {
        self.credentials
            .read()
            .map(|c| is_valid_key(&c.backup))
            .unwrap_or(false)
    }

    /// Prepend the system instruction to the history
    pub fn prepare_conversation(&self, messages: &[Message]) -> Vec<Message> {
        let mut prepared = Vec::with_capacity(messages.len() + 1);
        prepared.push(Message::system(self.system_prompt()));
        prepared.extend_from_slice(messages);
        prepared
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let key = self.active_key()?;
        let body = CompletionRequest {
            model: &self.model,
            messages: self.prepare_conversation(messages),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };

        tracing::debug!(
            credential = if self.primary_failed() { "backup" } else { "primary" },
            key = %redact(&key),
            messages = body.messages.len(),
            stream,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.proxy_url)
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await?;
        Ok(response)
    }

    /// Decide whether a failed attempt should be retried with the backup
    ///
    /// Only the first 401 per client retries, and only when a backup exists.
    fn should_fall_back(&self, status: reqwest::StatusCode) -> bool {
        if status != reqwest::StatusCode::UNAUTHORIZED || self.primary_failed() {
            return false;
        }

        tracing::warn!("Primary API key rejected (401); trying backup key");
        self.primary_failed.store(true, Ordering::SeqCst);
        if self.has_valid_backup() {
            metrics::increment_counter!("ai_credential_fallbacks_total");
            true
        } else {
            tracing::error!("No valid backup API key to fall back to");
            false
        }
    }

    fn record_failure(status: Option<reqwest::StatusCode>) {
        let label = status
            .map(|s| s.as_u16().to_string())
            .unwrap_or_else(|| "network".to_string());
        metrics::increment_counter!("ai_request_failures_total", "status" => label);
    }
}

#[async_trait]
impl Provider for AiClient {
    async fn generate_response(&self, messages: &[Message]) -> Result<AiResponse> {
        metrics::increment_counter!("ai_requests_total", "kind" => "complete");

        // one initial attempt plus at most one credential fallback
        for _ in 0..2 {
            let response = match self.send(messages, false).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Error calling AI API: {}", e);
                    Self::record_failure(None);
                    return Ok(AiResponse::technical_difficulties(None));
                }
            };

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                tracing::error!("AI API returned error {}: {}", status, error_text);
                if self.should_fall_back(status) {
                    continue;
                }
                Self::record_failure(Some(status));
                return Ok(AiResponse::technical_difficulties(Some(status.as_u16())));
            }

            let parsed: CompletionResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!("Failed to parse AI API response: {}", e);
                    Self::record_failure(Some(status));
                    return Ok(AiResponse::technical_difficulties(None));
                }
            };

            let Some(choice) = parsed.choices.into_iter().next() else {
                tracing::error!("AI API response contained no choices");
                Self::record_failure(Some(status));
                return Ok(AiResponse::technical_difficulties(None));
            };

            return Ok(AiResponse {
                id: parsed.id.unwrap_or_else(|| ulid::Ulid::new().to_string()),
                content: choice.message.content.unwrap_or_default(),
                finish_reason: Some(choice.finish_reason.unwrap_or_else(|| "stop".to_string())),
                created_at: Utc::now(),
            });
        }

        Self::record_failure(Some(reqwest::StatusCode::UNAUTHORIZED));
        Ok(AiResponse::technical_difficulties(Some(401)))
    }

    async fn generate_streaming_response(&self, messages: &[Message]) -> Option<ByteStream> {
        metrics::increment_counter!("ai_requests_total", "kind" => "stream");

        for _ in 0..2 {
            let response = match self.send(messages, true).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Error in streaming request: {}", e);
                    Self::record_failure(None);
                    return None;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                tracing::error!("AI API returned error {}: {}", status, error_text);
                if self.should_fall_back(status) {
                    continue;
                }
                Self::record_failure(Some(status));
                return None;
            }

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
            return Some(Box::pin(body));
        }

        Self::record_failure(Some(reqwest::StatusCode::UNAUTHORIZED));
        None
    }
}
