//! Helpdesk - AI tech-support chat library
//!
//! This library provides the pieces behind the `helpdesk` binary: a
//! streaming completions client with credential fallback, a persistent
//! conversation store, a usage analytics aggregator, and the HTTP service
//! that proxies completions and accepts file uploads.
//!
//! # Architecture
//!
//! - `providers`: completions client, provider trait and event-stream parser
//! - `chat`: conversation data model and the conversation store
//! - `analytics`: event tracking and derived usage report
//! - `storage`: key-value persistence (sled, in-memory)
//! - `server`: proxy, upload and mock chat routes
//! - `upload`: upload rules and the upload client
//! - `context`: wiring of the above from a [`Config`]
//! - `config`, `error`, `cli`, `commands`: the application shell
//!
//! # Example
//!
//! ```no_run
//! use helpdesk::context::AppContext;
//! use helpdesk::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/helpdesk.yaml", &Default::default())?;
//!     config.validate()?;
//!     let ctx = AppContext::new(config);
//!     let mut store = ctx.conversation_store(ctx.client()?);
//!     let answer = store.send_message("My laptop will not wake from sleep").await?;
//!     println!("{}", answer.content);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod providers;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use analytics::{AnalyticsService, AnalyticsSnapshot};
pub use chat::{ChatMessage, Conversation, ConversationStore, Feedback};
pub use config::Config;
pub use error::{HelpdeskError, Result};
pub use providers::{AiClient, Provider};

#[cfg(test)]
pub mod test_utils;
