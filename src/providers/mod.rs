//! Provider module for Helpdesk
//!
//! This module contains the AI provider abstraction, the completions
//! client, and the event-stream parser used to read streamed answers.

pub mod base;
pub mod openrouter;
pub mod stream;

pub use base::{AiResponse, ByteStream, Message, Provider, Role};
pub use openrouter::AiClient;
pub use stream::{parse_completion_stream, read_stream_to_completion, CompletionStream};

use crate::config::AssistantConfig;
use crate::error::{HelpdeskError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Create the configured provider
///
/// # Errors
///
/// Returns error if no usable credential is configured or the HTTP client
/// cannot be built
pub fn create_provider(config: &AssistantConfig) -> Result<Arc<AiClient>> {
    Ok(Arc::new(AiClient::new(config)?))
}

/// Provider for commands that read or edit stored conversations but never
/// talk to the model
pub struct OfflineProvider;

#[async_trait]
impl Provider for OfflineProvider {
    async fn generate_response(&self, _messages: &[Message]) -> Result<AiResponse> {
        Err(HelpdeskError::MissingCredentials("no AI client in offline mode".to_string()).into())
    }

    async fn generate_streaming_response(&self, _messages: &[Message]) -> Option<ByteStream> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_without_keys_fails() {
        let config = AssistantConfig::default();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_create_provider_uses_configured_model() {
        let config = AssistantConfig {
            api_key: Some("sk-test".to_string()),
            model: "test/model".to_string(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model(), "test/model");
    }

    #[tokio::test]
    async fn test_offline_provider_refuses_requests() {
        let provider = OfflineProvider;
        assert!(provider.generate_response(&[Message::user("hi")]).await.is_err());
        assert!(provider
            .generate_streaming_response(&[Message::user("hi")])
            .await
            .is_none());
    }
}
