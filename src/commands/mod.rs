/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat` : Interactive support chat
- `ask`  : One question in the active conversation
- `serve`: Completions proxy and upload service
- `reset`: Clear stored state
- `history`, `analytics`: Inspect stored state
*/

use crate::chat::{ChatMessage, ConversationStore, STREAM_ERROR_APOLOGY};
use crate::config::Config;
use crate::error::Result;
use colored::Colorize;
use std::io::Write;

// Special commands parser for the chat REPL
pub mod special_commands;

// Stored conversation listing
pub mod history;

// Analytics report
pub mod analytics;

/// Send `text` and print the answer, streaming it when asked to
///
/// # Errors
///
/// Propagates the conversation store's error after printing an apology.
pub(crate) async fn deliver(
    store: &mut ConversationStore,
    text: &str,
    streaming: bool,
) -> Result<ChatMessage> {
    println!();
    let result = if streaming {
        let result = store
            .stream_message(text, |fragment, _| {
                print!("{}", fragment);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();
        result
    } else {
        let result = store.send_message(text).await;
        if let Ok(message) = &result {
            println!("{}", message.content);
        }
        result
    };

    match &result {
        Ok(message) => println!("{}\n", history::short_id(&message.id).dimmed()),
        Err(e) => {
            tracing::error!("Failed to get an answer: {}", e);
            eprintln!("{}\n", STREAM_ERROR_APOLOGY.red());
        }
    }
    result
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Resumes (or starts) a conversation and runs a readline-based loop
    //! that sends user input to the assistant.

    use super::*;
    use crate::chat::Feedback;
    use crate::commands::history::{
        print_conversation, print_conversation_table, resolve_conversation_id,
        resolve_message_id, short_id,
    };
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::context::AppContext;
    use crate::upload::UploadClient;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::path::Path;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `no_stream` - Wait for complete answers even if streaming is configured
    /// * `new` - Start a fresh conversation instead of resuming the active one
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the terminal cannot be
    /// initialised
    pub async fn run_chat(config: Config, no_stream: bool, new: bool) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let ctx = AppContext::new(config);
        let client = ctx.client()?;
        let uploads = ctx.upload_client()?;
        let mut store = ctx.conversation_store(client.clone());
        let mut streaming = ctx.config.assistant.stream && !no_stream;

        if new || store.active_conversation().is_none() {
            store.create_conversation();
        }

        let mut rl = DefaultEditor::new()?;
        let mut attachments: Vec<String> = Vec::new();

        print_welcome_banner(client.model(), streaming);
        if let Some(conversation) = store.active_conversation() {
            if !conversation.messages.is_empty() {
                print_conversation(conversation);
            }
        }

        loop {
            let prompt = format!("{} ", "you>".blue().bold());
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}\n", e.to_string().yellow());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::New => {
                            let conversation = store.create_conversation();
                            println!(
                                "Started conversation {}\n",
                                short_id(&conversation.id).cyan()
                            );
                            continue;
                        }
                        SpecialCommand::List => {
                            let active = store.active_conversation().map(|c| c.id.clone());
                            print_conversation_table(&store.all_conversations(), active.as_deref());
                            continue;
                        }
                        SpecialCommand::Switch(id) => {
                            switch_conversation(&mut store, &id);
                            continue;
                        }
                        SpecialCommand::Delete(id) => {
                            delete_conversation(&mut store, &id);
                            continue;
                        }
                        SpecialCommand::Helpful(id) => {
                            rate(&mut store, id.as_deref(), Feedback::Helpful);
                            continue;
                        }
                        SpecialCommand::Unhelpful(id) => {
                            rate(&mut store, id.as_deref(), Feedback::Unhelpful);
                            continue;
                        }
                        SpecialCommand::Attach(path) => {
                            if let Some(markdown) = attach(&uploads, &path).await {
                                attachments.push(markdown);
                            }
                            continue;
                        }
                        SpecialCommand::Analytics => {
                            match ctx.analytics_snapshot() {
                                Ok(snapshot) => crate::commands::analytics::print_snapshot(&snapshot),
                                Err(e) => eprintln!("Error: {}\n", e),
                            }
                            continue;
                        }
                        SpecialCommand::Stream(on) => {
                            streaming = on;
                            println!(
                                "Streaming {}\n",
                                if on { "enabled" } else { "disabled" }
                            );
                            continue;
                        }
                        SpecialCommand::Help => {
                            print_help();
                            continue;
                        }
                        SpecialCommand::Exit => break,
                        SpecialCommand::None => {}
                    }

                    rl.add_history_entry(trimmed)?;

                    let text = compose_message(&mut attachments, trimmed);
                    // errors are already reported to the user
                    let _ = deliver(&mut store, &text, streaming).await;
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Prefix pending attachment references to the typed text
    pub(crate) fn compose_message(attachments: &mut Vec<String>, text: &str) -> String {
        if attachments.is_empty() {
            return text.to_string();
        }
        let mut parts = std::mem::take(attachments);
        parts.push(text.to_string());
        parts.join("\n\n")
    }

    fn switch_conversation(store: &mut ConversationStore, id: &str) {
        let Some(full_id) = resolve_conversation_id(store, id) else {
            eprintln!("{}\n", format!("No single conversation matches '{}'", id).yellow());
            return;
        };
        match store.switch_conversation(&full_id) {
            Ok(conversation) => print_conversation(&conversation),
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }

    fn delete_conversation(store: &mut ConversationStore, id: &str) {
        let Some(full_id) = resolve_conversation_id(store, id) else {
            eprintln!("{}\n", format!("No single conversation matches '{}'", id).yellow());
            return;
        };
        store.delete_conversation(&full_id);
        println!("{}", format!("Deleted conversation {}", short_id(&full_id)).green());

        if store.active_conversation().is_none() {
            let conversation = store.create_conversation();
            println!(
                "Started conversation {}\n",
                short_id(&conversation.id).cyan()
            );
        }
    }

    fn rate(store: &mut ConversationStore, id: Option<&str>, feedback: Feedback) {
        let target = store.active_conversation().and_then(|conversation| match id {
            Some(prefix) => resolve_message_id(conversation, prefix),
            None => conversation.last_assistant_message().map(|m| m.id.clone()),
        });
        let Some(message_id) = target else {
            eprintln!("{}\n", "No matching answer to rate".yellow());
            return;
        };

        if store.update_message_feedback(&message_id, feedback).is_some() {
            println!("{}\n", "Thanks for the feedback!".green());
        }
    }

    async fn attach(uploads: &UploadClient, path: &Path) -> Option<String> {
        let response = uploads.upload_file(path).await;
        if !response.success {
            eprintln!(
                "{}\n",
                response
                    .error
                    .unwrap_or_else(|| "Failed to upload file".to_string())
                    .red()
            );
            return None;
        }
        let markdown = response.markdown()?;
        println!(
            "Attached {} (sent with your next message)\n",
            markdown.cyan()
        );
        Some(markdown)
    }

    /// Display welcome banner at the start of interactive chat mode
    fn print_welcome_banner(model: &str, streaming: bool) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║            Helpdesk - AI Tech Support Assistant              ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Model:     {}", model.cyan());
        println!(
            "Streaming: {}\n",
            if streaming { "on".green() } else { "off".yellow() }
        );
        println!("Describe your problem. Type '/help' for commands, 'exit' to quit\n");
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::providers::OfflineProvider;
        use crate::providers::Role;
        use crate::storage::MemoryStore;
        use std::sync::Arc;

        fn store() -> ConversationStore {
            ConversationStore::new(Arc::new(OfflineProvider), Arc::new(MemoryStore::new()), None)
        }

        #[test]
        fn test_compose_message_without_attachments() {
            let mut attachments = Vec::new();
            assert_eq!(compose_message(&mut attachments, "hello"), "hello");
        }

        #[test]
        fn test_compose_message_drains_attachments() {
            let mut attachments = vec!["![a.png](/uploads/1.png)".to_string()];
            assert_eq!(
                compose_message(&mut attachments, "what is this error?"),
                "![a.png](/uploads/1.png)\n\nwhat is this error?"
            );
            assert!(attachments.is_empty());
        }

        #[test]
        fn test_delete_active_starts_fresh_conversation() {
            let mut store = store();
            let first = store.create_conversation();
            delete_conversation(&mut store, &first.id);

            let active = store.active_conversation().unwrap();
            assert_ne!(active.id, first.id);
            assert!(store.conversation(&first.id).is_none());
        }

        #[test]
        fn test_switch_unknown_leaves_active() {
            let mut store = store();
            let first = store.create_conversation();
            switch_conversation(&mut store, "nothing-like-this");
            assert_eq!(store.active_conversation().unwrap().id, first.id);
        }

        #[tokio::test]
        async fn test_rate_latest_answer() {
            let provider = crate::test_utils::FakeProvider::with_responses(vec!["Restart it"]);
            let mut store = ConversationStore::new(
                Arc::new(provider),
                Arc::new(MemoryStore::new()),
                None,
            );
            store.send_message("Router down").await.unwrap();

            rate(&mut store, None, Feedback::Helpful);

            let answer = store
                .active_conversation()
                .unwrap()
                .messages
                .iter()
                .find(|m| m.role == Role::Assistant)
                .unwrap();
            assert_eq!(answer.feedback, Some(Feedback::Helpful));
        }
    }
}

// One-shot question handler
pub mod ask {
    use super::*;
    use crate::context::AppContext;

    /// Ask a single question in the active conversation
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the answer fails
    pub async fn run_ask(config: Config, prompt: String, no_stream: bool) -> Result<()> {
        let ctx = AppContext::new(config);
        let client = ctx.client()?;
        let mut store = ctx.conversation_store(client);
        let streaming = ctx.config.assistant.stream && !no_stream;

        deliver(&mut store, &prompt, streaming).await?;
        Ok(())
    }
}

// HTTP service handler
pub mod serve {
    use super::*;

    /// Run the completions proxy and upload service until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the service cannot bind its address
    pub async fn run_serve(config: Config) -> Result<()> {
        tracing::info!("Starting HTTP service on {}", config.server.bind);
        crate::server::serve(&config).await
    }
}

// Reset handler
pub mod reset {
    use super::*;
    use crate::context::AppContext;

    /// Clear stored conversations, and optionally the analytics aggregate
    pub fn run_reset(config: Config, analytics: bool) -> Result<()> {
        let ctx = AppContext::new(config);
        let mut store = ctx.offline_store();
        let count = store.all_conversations().len();
        store.clear();
        println!("{}", format!("Cleared {} conversation(s)", count).green());

        if analytics {
            ctx.reset_analytics()?;
            println!("{}", "Cleared analytics".green());
        }
        Ok(())
    }

}
