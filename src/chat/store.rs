//! Conversation store
//!
//! Holds every conversation in memory, tracks which one is active, and
//! writes the whole set to the key-value store after each mutation.

use crate::analytics::{
    SharedAnalytics, AnalyticsService, EVENT_CHAT_ERROR, EVENT_CONVERSATION_DELETED,
    EVENT_STREAMING_END, EVENT_STREAMING_START,
};
use crate::chat::types::{now_millis, ChatMessage, Conversation, ConversationsDocument, Feedback};
use crate::error::{HelpdeskError, Result};
use crate::providers::{parse_completion_stream, Message, Provider, Role};
use crate::storage::{self, KeyValueStore, CONVERSATIONS_KEY};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Assistant text used when a stream ends without producing any content
pub const EMPTY_STREAM_FALLBACK: &str =
    "I'm here to help with your tech problem. Could you provide more details?";

/// Assistant text left in place when a streamed answer fails
pub const STREAM_ERROR_APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

/// In-memory conversation set with write-through persistence
pub struct ConversationStore {
    provider: Arc<dyn Provider>,
    storage: Arc<dyn KeyValueStore>,
    analytics: Option<SharedAnalytics>,
    conversations: HashMap<String, Conversation>,
    active_id: Option<String>,
}

impl ConversationStore {
    /// Create a store and load any persisted conversations
    ///
    /// Missing or unreadable state yields an empty store.
    pub fn new(
        provider: Arc<dyn Provider>,
        storage: Arc<dyn KeyValueStore>,
        analytics: Option<SharedAnalytics>,
    ) -> Self {
        let mut store = Self {
            provider,
            storage,
            analytics,
            conversations: HashMap::new(),
            active_id: None,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        match storage::load_json::<ConversationsDocument>(self.storage.as_ref(), CONVERSATIONS_KEY) {
            Ok(Some(document)) => {
                for conversation in document.conversations {
                    self.conversations
                        .insert(conversation.id.clone(), conversation);
                }
                self.active_id = document
                    .active_conversation_id
                    .filter(|id| self.conversations.contains_key(id));
                tracing::debug!(
                    conversations = self.conversations.len(),
                    "Loaded conversations"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Error loading conversations from storage: {}", e);
                self.conversations.clear();
                self.active_id = None;
            }
        }
    }

    fn persist(&self) {
        let document = ConversationsDocument {
            conversations: self.all_conversations().into_iter().cloned().collect(),
            active_conversation_id: self.active_id.clone(),
        };
        if let Err(e) = storage::save_json(self.storage.as_ref(), CONVERSATIONS_KEY, &document) {
            tracing::error!("Error saving conversations to storage: {}", e);
        }
    }

    fn with_analytics(&self, f: impl FnOnce(&mut AnalyticsService)) {
        if let Some(analytics) = &self.analytics {
            match analytics.lock() {
                Ok(mut service) => f(&mut service),
                Err(_) => tracing::error!("Analytics lock poisoned; event dropped"),
            }
        }
    }

    fn resync_analytics(&self) {
        self.with_analytics(|a| a.resync());
    }

    fn track(&self, name: &str, properties: Vec<(&str, Value)>) {
        let properties: Map<String, Value> = properties
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.with_analytics(|a| a.track_event(name, properties));
    }

    /// Start a new empty conversation and make it active
    pub fn create_conversation(&mut self) -> Conversation {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation.clone());
        self.active_id = Some(id.clone());
        self.persist();

        tracing::info!(conversation = %id, "Started new conversation");
        self.with_analytics(|a| a.track_new_conversation(&id));
        self.resync_analytics();
        conversation
    }

    /// The active conversation, if any
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id
            .as_ref()
            .and_then(|id| self.conversations.get(id))
    }

    /// Look up a conversation by id
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Every conversation, most recently updated first
    pub fn all_conversations(&self) -> Vec<&Conversation> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Make `id` the active conversation
    ///
    /// # Errors
    ///
    /// Returns `HelpdeskError::ConversationNotFound` for an unknown id.
    pub fn switch_conversation(&mut self, id: &str) -> Result<Conversation> {
        let conversation = self
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| HelpdeskError::ConversationNotFound(id.to_string()))?;
        self.active_id = Some(id.to_string());
        self.persist();
        Ok(conversation)
    }

    /// Remove a conversation; returns whether it existed
    ///
    /// Deleting the active conversation leaves no conversation active.
    pub fn delete_conversation(&mut self, id: &str) -> bool {
        if self.conversations.remove(id).is_none() {
            return false;
        }

        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        self.persist();

        tracing::info!(conversation = %id, "Deleted conversation");
        self.track(
            EVENT_CONVERSATION_DELETED,
            vec![("conversation_id", Value::from(id))],
        );
        self.resync_analytics();
        true
    }

    /// Rate a message of the active conversation
    ///
    /// Returns `None` when nothing is active or the id is not in the active
    /// conversation.
    pub fn update_message_feedback(
        &mut self,
        message_id: &str,
        feedback: Feedback,
    ) -> Option<ChatMessage> {
        let active_id = self.active_id.clone()?;
        let conversation = self.conversations.get_mut(&active_id)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)?;
        message.feedback = Some(feedback);
        let updated = message.clone();

        self.persist();
        self.with_analytics(|a| a.track_feedback(message_id, feedback, &active_id));
        self.resync_analytics();
        Some(updated)
    }

    /// Remove every conversation
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.active_id = None;
        self.persist();
        self.resync_analytics();
    }

    /// Append a user message to the active conversation (creating one if
    /// needed) and return the conversation id, the message, and the history
    fn push_user_message(&mut self, text: &str) -> Result<(String, ChatMessage, Vec<Message>)> {
        let conversation_id = match self.active_id.clone() {
            Some(id) => id,
            None => self.create_conversation().id,
        };

        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| HelpdeskError::ConversationNotFound(conversation_id.clone()))?;

        let user_message = ChatMessage::new(Role::User, text);
        conversation.messages.push(user_message.clone());
        conversation.updated_at = Utc::now();
        if conversation.messages.len() == 1 {
            conversation.title = crate::chat::types::generate_title(text);
        }
        let history = conversation.wire_history();

        self.with_analytics(|a| a.track_user_message(&user_message.id, text));
        Ok((conversation_id, user_message, history))
    }

    fn message_mut(&mut self, conversation_id: &str, message_id: &str) -> Option<&mut ChatMessage> {
        self.conversations
            .get_mut(conversation_id)?
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == message_id)
    }

    fn touch(&mut self, conversation_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.updated_at = Utc::now();
        }
    }

    /// Send a message and wait for the complete answer
    ///
    /// The user message stays in the conversation even when the provider
    /// fails.
    ///
    /// # Errors
    ///
    /// Propagates provider errors.
    pub async fn send_message(&mut self, text: &str) -> Result<ChatMessage> {
        let (conversation_id, user_message, history) = self.push_user_message(text)?;

        let response = match self.provider.generate_response(&history).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error getting AI response: {}", e);
                self.persist();
                self.with_analytics(|a| a.discard_pending(&user_message.id));
                self.track(EVENT_CHAT_ERROR, vec![("error", Value::from(e.to_string()))]);
                self.resync_analytics();
                return Err(e);
            }
        };

        let assistant = ChatMessage::new(Role::Assistant, response.content);
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| HelpdeskError::ConversationNotFound(conversation_id.clone()))?;
        conversation.messages.push(assistant.clone());
        conversation.updated_at = Utc::now();
        self.persist();

        let length = assistant.content.chars().count();
        self.with_analytics(|a| a.track_assistant_response(&assistant.id, &user_message.id, length));
        self.resync_analytics();
        Ok(assistant)
    }

    /// Send a message and stream the answer
    ///
    /// `on_fragment` receives each fragment with the assistant message id.
    /// An answer with no fragments is replaced by a canned prompt for more
    /// detail.
    ///
    /// # Errors
    ///
    /// Returns `HelpdeskError::Stream` when no stream could be opened; the
    /// assistant message then holds an apology.
    pub async fn stream_message<F>(&mut self, text: &str, mut on_fragment: F) -> Result<ChatMessage>
    where
        F: FnMut(&str, &str),
    {
        let (conversation_id, user_message, history) = self.push_user_message(text)?;

        let assistant = ChatMessage::new(Role::Assistant, String::new());
        let assistant_id = assistant.id.clone();
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.messages.push(assistant);
        }

        self.track(
            EVENT_STREAMING_START,
            vec![("message_id", Value::from(assistant_id.as_str()))],
        );

        let outcome = self
            .pump_stream(&conversation_id, &assistant_id, &history, &mut on_fragment)
            .await;

        let result = match outcome {
            Ok(fragments) => {
                if fragments == 0 {
                    tracing::info!("Stream had no content, using fallback response");
                    if let Some(message) = self.message_mut(&conversation_id, &assistant_id) {
                        message.content = EMPTY_STREAM_FALLBACK.to_string();
                    }
                    on_fragment(EMPTY_STREAM_FALLBACK, &assistant_id);
                }
                Ok(fragments)
            }
            Err(e) => {
                tracing::error!("Error in streaming message: {}", e);
                if let Some(message) = self.message_mut(&conversation_id, &assistant_id) {
                    message.content = STREAM_ERROR_APOLOGY.to_string();
                }
                Err(e)
            }
        };

        if let Some(message) = self.message_mut(&conversation_id, &assistant_id) {
            message.timestamp = now_millis();
        }
        self.touch(&conversation_id);
        self.persist();

        let finished = self
            .message_mut(&conversation_id, &assistant_id)
            .map(|m| m.clone())
            .ok_or_else(|| HelpdeskError::ConversationNotFound(conversation_id.clone()))?;

        match result {
            Ok(fragments) => {
                let length = finished.content.chars().count();
                self.with_analytics(|a| {
                    a.track_assistant_response(&finished.id, &user_message.id, length)
                });
                self.track(
                    EVENT_STREAMING_END,
                    vec![
                        ("message_id", Value::from(finished.id.as_str())),
                        ("fragments", Value::from(fragments)),
                    ],
                );
                self.resync_analytics();
                Ok(finished)
            }
            Err(e) => {
                self.with_analytics(|a| a.discard_pending(&user_message.id));
                self.track(
                    EVENT_CHAT_ERROR,
                    vec![
                        ("message_id", Value::from(finished.id.as_str())),
                        ("error", Value::from(e.to_string())),
                    ],
                );
                self.resync_analytics();
                Err(e)
            }
        }
    }

    async fn pump_stream<F>(
        &mut self,
        conversation_id: &str,
        assistant_id: &str,
        history: &[Message],
        on_fragment: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(&str, &str),
    {
        let body = self
            .provider
            .generate_streaming_response(history)
            .await
            .ok_or_else(|| HelpdeskError::Stream("Failed to get streaming response".to_string()))?;

        let mut fragments = parse_completion_stream(body);
        let mut count = 0;
        while let Some(fragment) = fragments.next().await {
            count += 1;
            if let Some(message) = self.message_mut(conversation_id, assistant_id) {
                message.content.push_str(&fragment);
            }
            on_fragment(&fragment, assistant_id);
        }

        tracing::debug!(fragments = count, "Streaming complete");
        Ok(count)
    }
}
