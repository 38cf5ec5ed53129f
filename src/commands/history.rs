use crate::chat::{ChatMessage, Conversation, ConversationStore};
use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::context::AppContext;
use crate::error::{HelpdeskError, Result};
use crate::providers::Role;
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use prettytable::{format, Table};

const SHORT_ID_LEN: usize = 8;
const TITLE_WIDTH: usize = 40;

/// First characters of an id, enough to tell conversations apart
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Find the single conversation whose id starts with `prefix`
///
/// Matching ignores case. Returns `None` when nothing or more than one
/// conversation matches.
pub fn resolve_conversation_id(store: &ConversationStore, prefix: &str) -> Option<String> {
    if store.conversation(prefix).is_some() {
        return Some(prefix.to_string());
    }
    let prefix = prefix.to_uppercase();
    let mut matches = store
        .all_conversations()
        .into_iter()
        .filter(|c| c.id.to_uppercase().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only.id.clone()),
        _ => None,
    }
}

/// Find the single message of `conversation` whose id starts with `prefix`
pub fn resolve_message_id(conversation: &Conversation, prefix: &str) -> Option<String> {
    let prefix = prefix.to_uppercase();
    let mut matches = conversation
        .messages
        .iter()
        .filter(|m| m.id.to_uppercase().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only.id.clone()),
        _ => None,
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() > TITLE_WIDTH {
        let head: String = title.chars().take(TITLE_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn message_time(message: &ChatMessage) -> String {
    DateTime::<Utc>::from_timestamp_millis(message.timestamp)
        .map(local_time)
        .unwrap_or_else(|| "-".to_string())
}

/// Print conversations as a table, marking the active one
pub fn print_conversation_table(conversations: &[&Conversation], active_id: Option<&str>) {
    if conversations.is_empty() {
        println!("{}", "No conversation history found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "",
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for conversation in conversations {
        let marker = if active_id == Some(conversation.id.as_str()) {
            "*".green().to_string()
        } else {
            String::new()
        };
        table.add_row(prettytable::row![
            marker,
            short_id(&conversation.id).cyan(),
            truncate_title(&conversation.title),
            conversation.messages.len(),
            local_time(conversation.updated_at)
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
}

/// Print every message of a conversation
pub fn print_conversation(conversation: &Conversation) {
    println!(
        "\n{} {}",
        conversation.title.bold(),
        format!("({})", conversation.id).dimmed()
    );
    println!(
        "{}\n",
        format!("Started {}", local_time(conversation.created_at)).dimmed()
    );

    if conversation.messages.is_empty() {
        println!("{}", "No messages yet.".yellow());
        return;
    }

    for message in &conversation.messages {
        let speaker = match message.role {
            Role::User => "You".blue().bold(),
            Role::Assistant => "Assistant".green().bold(),
            Role::System => "System".dimmed(),
        };
        let feedback = match message.feedback {
            Some(feedback) => format!(" [{}]", feedback).magenta().to_string(),
            None => String::new(),
        };
        println!(
            "{} {}{} {}",
            speaker,
            message_time(message).dimmed(),
            feedback,
            short_id(&message.id).dimmed()
        );
        println!("{}\n", message.content);
    }
}

/// Handle history commands
pub fn handle_history(config: Config, command: HistoryCommand) -> Result<()> {
    let ctx = AppContext::new(config);
    let mut store = ctx.offline_store();

    match command {
        HistoryCommand::List => {
            let active = store.active_conversation().map(|c| c.id.clone());
            print_conversation_table(&store.all_conversations(), active.as_deref());
            println!(
                "Use {} to continue one of them.",
                "/switch <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { id } => {
            let full_id = resolve_conversation_id(&store, &id)
                .ok_or_else(|| HelpdeskError::ConversationNotFound(id.clone()))?;
            if let Some(conversation) = store.conversation(&full_id) {
                print_conversation(conversation);
            }
        }
        HistoryCommand::Delete { id } => {
            let full_id = resolve_conversation_id(&store, &id)
                .ok_or_else(|| HelpdeskError::ConversationNotFound(id.clone()))?;
            store.delete_conversation(&full_id);
            println!("{}", format!("Deleted conversation {}", full_id).green());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::OfflineProvider;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(OfflineProvider), Arc::new(MemoryStore::new()), None)
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("01HXYZABCDEFG"), "01HXYZAB");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short"), "short");
        let long = "x".repeat(50);
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), TITLE_WIDTH);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_resolve_conversation_by_prefix() {
        let mut store = store();
        let conversation = store.create_conversation();

        assert_eq!(
            resolve_conversation_id(&store, &conversation.id),
            Some(conversation.id.clone())
        );
        let prefix = conversation.id[..10].to_lowercase();
        assert_eq!(
            resolve_conversation_id(&store, &prefix),
            Some(conversation.id.clone())
        );
        assert_eq!(resolve_conversation_id(&store, "zzzz"), None);
    }

    #[test]
    fn test_ambiguous_prefix_resolves_to_nothing() {
        let mut store = store();
        store.create_conversation();
        store.create_conversation();
        // every ulid minted this millennium starts with 0
        assert_eq!(resolve_conversation_id(&store, "0"), None);
    }

    #[test]
    fn test_resolve_message_by_prefix() {
        let mut conversation = Conversation::new();
        let message = ChatMessage::new(Role::Assistant, "Try restarting");
        conversation.messages.push(message.clone());

        assert_eq!(
            resolve_message_id(&conversation, &message.id[..12]),
            Some(message.id.clone())
        );
        assert_eq!(resolve_message_id(&conversation, "nope"), None);
    }

    #[test]
    fn test_printing_does_not_panic() {
        let mut conversation = Conversation::new();
        conversation
            .messages
            .push(ChatMessage::new(Role::User, "Printer offline"));
        print_conversation(&conversation);
        print_conversation_table(&[&conversation], Some(&conversation.id));
        print_conversation_table(&[], None);
    }
}
