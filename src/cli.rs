//! Command-line interface definition for Helpdesk
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for the proxy service, interactive chat, one-shot
//! questions, history management and analytics reporting.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Helpdesk - AI tech-support chat
///
/// Ask technical questions, stream answers from a hosted model through a
/// same-origin proxy, and keep conversation history and usage analytics
/// in a local store.
#[derive(Parser, Debug, Clone)]
#[command(name = "helpdesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/helpdesk.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the local state database location
    #[arg(long, env = "HELPDESK_STATE_DB")]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Helpdesk
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the completions proxy and upload service
    Serve {
        /// Address to bind (e.g. 127.0.0.1:3000)
        #[arg(short, long)]
        bind: Option<String>,

        /// Directory uploaded files are written under
        #[arg(long)]
        public_dir: Option<PathBuf>,
    },

    /// Start an interactive support chat
    Chat {
        /// Wait for complete answers instead of streaming them
        #[arg(long)]
        no_stream: bool,

        /// Start a fresh conversation instead of resuming the active one
        #[arg(short, long)]
        new: bool,
    },

    /// Ask a single question in the active conversation
    Ask {
        /// The question to ask
        prompt: String,

        /// Wait for the complete answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Manage stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Show usage analytics
    Analytics {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear stored conversations
    Reset {
        /// Also clear the analytics aggregate
        #[arg(long)]
        analytics: bool,
    },
}

/// History management subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum HistoryCommand {
    /// List stored conversations, most recently updated first
    List,

    /// Print every message of a conversation
    Show {
        /// Conversation ID
        id: String,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/helpdesk.yaml".to_string()),
            verbose: false,
            json_logs: false,
            storage_path: None,
            command: Commands::Analytics { json: false },
        }
    }
}
