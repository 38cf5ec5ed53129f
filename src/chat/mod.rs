//! Conversations: data model and the persistent conversation store

pub mod store;
pub mod types;

pub use store::{ConversationStore, EMPTY_STREAM_FALLBACK, STREAM_ERROR_APOLOGY};
pub use types::{
    generate_title, ChatMessage, Conversation, ConversationsDocument, Feedback,
    NEW_CONVERSATION_TITLE,
};
