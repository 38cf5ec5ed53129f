//! Conversation data model
//!
//! These types are both the in-memory representation held by the
//! conversation store and the JSON document persisted under
//! [`crate::storage::CONVERSATIONS_KEY`].

use crate::providers::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Title given to a conversation until its first message arrives
pub const NEW_CONVERSATION_TITLE: &str = "New Conversation";

const TITLE_MAX_CHARS: usize = 30;

/// User rating of an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Helpful,
    Unhelpful,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Helpful => "helpful",
            Feedback::Unhelpful => "unhelpful",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "helpful" => Ok(Feedback::Helpful),
            "unhelpful" => Ok(Feedback::Unhelpful),
            other => Err(format!("unknown feedback '{}'", other)),
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Creation time, epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl ChatMessage {
    /// Create a message stamped with the current time and a fresh id
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            feedback: None,
        }
    }

    /// Wire representation sent to the completions API
    pub fn to_wire(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A titled, ordered exchange between user and assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start an empty conversation
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            title: NEW_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// History in wire form, oldest first
    pub fn wire_history(&self) -> Vec<Message> {
        self.messages.iter().map(ChatMessage::to_wire).collect()
    }

    /// Most recent assistant message, if any
    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Persisted form of the whole conversation set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationsDocument {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub active_conversation_id: Option<String>,
}

/// Derive a conversation title from its first message
///
/// Messages of up to 30 characters are used as-is. Longer ones are cut to
/// 30 characters, backed up to the last space when that space lies past the
/// midpoint, and suffixed with `...`.
///
/// # Examples
///
/// ```
/// use helpdesk::chat::generate_title;
///
/// assert_eq!(generate_title("Printer offline"), "Printer offline");
/// assert_eq!(
///     generate_title("My laptop will not connect to the office wifi"),
///     "My laptop will not connect to..."
/// );
/// ```
pub fn generate_title(message: &str) -> String {
    if message.chars().count() <= TITLE_MAX_CHARS {
        return message.to_string();
    }

    let truncated: String = message.chars().take(TITLE_MAX_CHARS).collect();
    if let Some(space) = truncated.rfind(' ') {
        if truncated[..space].chars().count() > TITLE_MAX_CHARS / 2 {
            return format!("{}...", &truncated[..space]);
        }
    }

    format!("{}...", truncated)
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
