//! Base provider trait and common types for Helpdesk
//!
//! This module defines the Provider trait that the AI client implements,
//! along with the wire message type and the response structures shared by
//! the conversation store and the command handlers.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Finish reason attached to canned failure responses
pub const ERROR_FINISH_REASON: &str = "error";

/// Role of a message sender on the completions wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message structure for conversation
///
/// Represents a message exchanged with the completions API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk::providers::{Message, Role};
    ///
    /// let msg = Message::user("My printer is offline");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Complete (non-streaming) response from the AI client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    /// Response identifier reported upstream, or a generated one
    pub id: String,
    /// Generated text
    pub content: String,
    /// Why generation stopped; `error` marks a canned failure response
    pub finish_reason: Option<String>,
    /// When the response was produced
    pub created_at: DateTime<Utc>,
}

impl AiResponse {
    /// Canned reply used when the completions API cannot be reached
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk::providers::AiResponse;
    ///
    /// let response = AiResponse::technical_difficulties(Some(503));
    /// assert!(response.is_error());
    /// assert!(response.content.ends_with("(Status: 503)"));
    /// ```
    pub fn technical_difficulties(status: Option<u16>) -> Self {
        let mut content = "I'm currently experiencing some technical difficulties. Please try again in a moment.".to_string();
        if let Some(status) = status {
            content.push_str(&format!(" (Status: {})", status));
        }

        Self {
            id: ulid::Ulid::new().to_string(),
            content,
            finish_reason: Some(ERROR_FINISH_REASON.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Whether this response is a canned failure
    pub fn is_error(&self) -> bool {
        self.finish_reason.as_deref() == Some(ERROR_FINISH_REASON)
    }
}

/// Raw response body of a streaming completion
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Provider trait for AI completions
///
/// The conversation store talks to the model only through this trait so
/// tests can substitute a scripted provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Request a single complete response for the given history
    ///
    /// # Errors
    ///
    /// Upstream failures are reported as a canned response
    /// (see [`AiResponse::technical_difficulties`]); an error is returned
    /// only when the client itself cannot be used.
    async fn generate_response(&self, messages: &[Message]) -> Result<AiResponse>;

    /// Request a streaming response for the given history
    ///
    /// Returns the raw event-stream body, or `None` when no stream could be
    /// obtained.
    async fn generate_streaming_response(&self, messages: &[Message]) -> Option<ByteStream>;
}
