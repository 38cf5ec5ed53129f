//! Test utilities for Helpdesk
//!
//! This module provides a scripted provider and helpers for building
//! completion event-stream bodies.

use crate::error::{HelpdeskError, Result};
use crate::providers::{AiResponse, ByteStream, Message, Provider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Script {
    responses: VecDeque<String>,
    streams: VecDeque<Vec<Bytes>>,
    fail: bool,
    histories: Vec<Vec<Message>>,
}

/// Provider that replays canned answers
///
/// Clones share the same script, so a test can keep a handle to inspect
/// what the store sent.
#[derive(Clone, Default)]
pub struct FakeProvider {
    script: Arc<Mutex<Script>>,
}

impl FakeProvider {
    /// Answer `generate_response` calls with these texts, in order
    pub fn with_responses(responses: Vec<&str>) -> Self {
        let provider = Self::default();
        provider.script.lock().unwrap().responses = responses.into_iter().map(String::from).collect();
        provider
    }

    /// Answer the next streaming call with this body
    pub fn with_stream(body: Vec<Bytes>) -> Self {
        let provider = Self::default();
        provider.script.lock().unwrap().streams.push_back(body);
        provider
    }

    /// Fail every `generate_response` call
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.script.lock().unwrap().fail = true;
        provider
    }

    /// History passed to the most recent call
    pub fn last_history(&self) -> Option<Vec<Message>> {
        self.script.lock().unwrap().histories.last().cloned()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn generate_response(&self, messages: &[Message]) -> Result<AiResponse> {
        let mut script = self.script.lock().unwrap();
        script.histories.push(messages.to_vec());
        if script.fail {
            return Err(HelpdeskError::Provider("scripted failure".into()).into());
        }
        let content = script.responses.pop_front().unwrap_or_default();
        Ok(AiResponse {
            id: ulid::Ulid::new().to_string(),
            content,
            finish_reason: Some("stop".into()),
            created_at: Utc::now(),
        })
    }

    async fn generate_streaming_response(&self, messages: &[Message]) -> Option<ByteStream> {
        let mut script = self.script.lock().unwrap();
        script.histories.push(messages.to_vec());
        let body = script.streams.pop_front()?;
        let chunks: Vec<std::io::Result<Bytes>> = body.into_iter().map(Ok).collect();
        Some(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Event-stream body carrying `fragments` and the closing sentinel
pub fn sse_body(fragments: &[&str]) -> Vec<Bytes> {
    let mut chunks: Vec<Bytes> = fragments
        .iter()
        .map(|f| {
            Bytes::from(format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": f}}]})
            ))
        })
        .collect();
    chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
    chunks
}

/// Create a temporary directory for testing
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temporary directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::read_stream_to_completion;

    #[tokio::test]
    async fn test_fake_provider_replays_responses() {
        let provider = FakeProvider::with_responses(vec!["one", "two"]);
        let first = provider.generate_response(&[Message::user("a")]).await.unwrap();
        let second = provider.generate_response(&[Message::user("b")]).await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert_eq!(provider.last_history().unwrap(), vec![Message::user("b")]);
    }

    #[tokio::test]
    async fn test_sse_body_parses_back() {
        let provider = FakeProvider::with_stream(sse_body(&["a", "b"]));
        let body = provider.generate_streaming_response(&[]).await.unwrap();
        assert_eq!(read_stream_to_completion(body).await, "ab");
        assert!(provider.generate_streaming_response(&[]).await.is_none());
    }
}
