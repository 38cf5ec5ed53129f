//! Special commands parser for interactive chat mode
//!
//! Special commands manage conversations and the session rather than being
//! sent to the assistant. They are prefixed with `/`; the command word is
//! case-insensitive while arguments (ids, paths) are kept as typed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new conversation and make it active
    New,

    /// List stored conversations
    List,

    /// Make the conversation with this id (or unique id prefix) active
    Switch(String),

    /// Delete the conversation with this id (or unique id prefix)
    Delete(String),

    /// Rate a message helpful; without an id, the latest answer
    Helpful(Option<String>),

    /// Rate a message unhelpful; without an id, the latest answer
    Unhelpful(Option<String>),

    /// Upload a file and reference it in the next message
    Attach(PathBuf),

    /// Show the analytics report
    Analytics,

    /// Turn streamed answers on or off
    Stream(bool),

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be sent to the assistant.
    None,
}

fn required(command: &str, usage: &str, arg: &str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        })
    } else {
        Ok(arg.to_string())
    }
}

fn optional(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for an unrecognised `/` command,
/// `CommandError::MissingArgument` when a required argument is absent and
/// `CommandError::UnsupportedArgument` for an invalid argument.
///
/// # Examples
///
/// ```
/// use helpdesk::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::New);
/// assert_eq!(
///     parse_special_command("/switch 01HX").unwrap(),
///     SpecialCommand::Switch("01HX".to_string())
/// );
/// assert_eq!(
///     parse_special_command("my laptop will not boot").unwrap(),
///     SpecialCommand::None
/// );
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if lower == "exit" || lower == "quit" {
        return Ok(SpecialCommand::Exit);
    }
    if !trimmed.starts_with('/') {
        return Ok(SpecialCommand::None);
    }

    let (word, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word.to_lowercase(), rest.trim()),
        None => (lower, ""),
    };

    match word.as_str() {
        "/new" => Ok(SpecialCommand::New),
        "/list" | "/conversations" => Ok(SpecialCommand::List),
        "/switch" => required("/switch", "/switch <conversation_id>", arg).map(SpecialCommand::Switch),
        "/delete" => required("/delete", "/delete <conversation_id>", arg).map(SpecialCommand::Delete),
        "/helpful" | "/good" => Ok(SpecialCommand::Helpful(optional(arg))),
        "/unhelpful" | "/bad" => Ok(SpecialCommand::Unhelpful(optional(arg))),
        "/attach" | "/upload" => {
            required("/attach", "/attach <path>", arg).map(|p| SpecialCommand::Attach(PathBuf::from(p)))
        }
        "/analytics" | "/stats" => Ok(SpecialCommand::Analytics),
        "/stream" => match arg.to_lowercase().as_str() {
            "on" => Ok(SpecialCommand::Stream(true)),
            "off" => Ok(SpecialCommand::Stream(false)),
            "" => Err(CommandError::MissingArgument {
                command: "/stream".to_string(),
                usage: "/stream <on|off>".to_string(),
            }),
            other => Err(CommandError::UnsupportedArgument {
                command: "/stream".to_string(),
                arg: other.to_string(),
            }),
        },
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

/// Display help text for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat
=====================================

CONVERSATIONS:
  /new              - Start a new conversation
  /list             - List conversations, most recent first
  /switch <id>      - Switch to a conversation (an id prefix is enough)
  /delete <id>      - Delete a conversation

FEEDBACK:
  /helpful [id]     - Mark the latest (or given) answer as helpful
  /unhelpful [id]   - Mark the latest (or given) answer as unhelpful

ATTACHMENTS:
  /attach <path>    - Upload an image (JPEG, PNG, GIF) or PDF, max 5MB;
                      it is referenced in your next message

SESSION:
  /analytics        - Show usage analytics
  /stream on|off    - Stream answers as they are generated, or wait for them
  /help             - Show this help message
  exit              - Exit interactive mode

NOTES:
  - Command names are case-insensitive
  - Regular text (not starting with /) is sent to the assistant
"#
    );
}
