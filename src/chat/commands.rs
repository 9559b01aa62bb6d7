//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the model.

/// How the user named a model in `/model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// A 1-based position in the last `/models` listing.
    Index(usize),

    /// A model identifier such as `llama2` or `deepseek-r1:7b`.
    Name(String),
}

/// A parsed chat command.
///
/// These commands control the chat session and are never sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start a fresh conversation.
    Clear,

    /// Change the model.
    Model(ModelSelection),

    /// List the models installed on the server.
    Models,

    /// Download a model to the server.
    Pull(String),

    /// Set or clear the system prompt.
    /// `None` clears the current system prompt.
    System(Option<String>),

    /// Print the conversation so far.
    History,

    /// Set the auto-save transcript path.
    TranscriptPath(String),

    /// Clear the auto-save transcript path.
    ClearTranscriptPath,

    /// Save the transcript to a specific file immediately.
    SaveTranscript(String),

    /// Load conversation history from a file.
    LoadTranscript(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics (message count, current model, etc.).
    Stats,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be sent as a regular message.
/// The bare words `quit` and `exit` are accepted without a slash.
///
/// # Examples
///
/// ```
/// # use ollama_chat::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(parse_command("exit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/model llama2").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
        return Some(ChatCommand::Quit);
    }

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => ChatCommand::Clear,
        "model" => match argument {
            Some(arg) => ChatCommand::Model(parse_model_selection(arg)),
            None => ChatCommand::Invalid("/model requires a model name or number".to_string()),
        },
        "models" => ChatCommand::Models,
        "pull" => match argument {
            Some(model) => ChatCommand::Pull(model.to_string()),
            None => ChatCommand::Invalid("/pull requires a model name".to_string()),
        },
        "system" => ChatCommand::System(argument.map(|s| s.to_string())),
        "history" => ChatCommand::History,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        "transcript" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::ClearTranscriptPath,
            Some(arg) => ChatCommand::TranscriptPath(arg.to_string()),
            None => ChatCommand::Invalid("/transcript requires a file path".to_string()),
        },
        "save" => match argument {
            Some(arg) => ChatCommand::SaveTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "load" => match argument {
            Some(arg) => ChatCommand::LoadTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/load requires a file path".to_string()),
        },
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_model_selection(arg: &str) -> ModelSelection {
    match arg.parse::<usize>() {
        Ok(index) => ModelSelection::Index(index),
        Err(_) => ModelSelection::Name(arg.to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Start a fresh conversation
  /model <name|number>   Change the model (number picks from the last /models listing)
  /models                List the models installed on the server
  /pull <name>           Download a model to the server
  /system [prompt]       Set system prompt (no argument clears it)
  /history               Show the conversation so far
  /transcript <file>     Enable auto-saving transcripts (or 'clear')
  /save <file>           Save the current transcript immediately
  /load <file>           Load a transcript from disk
  /stats                 Show session statistics
  /help                  Show this help message
  /quit                  Exit the chat (also 'quit' or 'exit')"#
}
