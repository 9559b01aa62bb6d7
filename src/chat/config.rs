//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the session and the binary run from.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::{HOST_ENV, MODEL_ENV, RequestConfig};
use crate::conversation::default_transcript_path;
use crate::error::{Error, Result};

/// Command-line arguments for the ollama-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Server to talk to.
    #[arrrg(optional, "Ollama server (default: $OLLAMA_HOST or localhost:11434)", "URL")]
    pub host: Option<String>,

    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: $OLLAMA_MODEL or deepseek-r1)", "MODEL")]
    pub model: Option<String>,

    /// System prompt to set context for the conversation.
    #[arrrg(optional, "System prompt for the conversation", "PROMPT")]
    pub system: Option<String>,

    #[arrrg(optional, "Auto-save the conversation to this file after every turn", "FILE")]
    pub transcript: Option<String>,

    #[arrrg(flag, "Resume the conversation stored in the transcript file")]
    pub resume: bool,

    #[arrrg(flag, "Auto-save to ~/.ollama_logs/<model>_conversation_log.json")]
    pub log: bool,

    #[arrrg(optional, "Save the conversation to this file on exit", "FILE")]
    pub save: Option<String>,

    #[arrrg(flag, "List installed models and exit")]
    pub list_models: bool,

    #[arrrg(optional, "Download a model and exit", "MODEL")]
    pub pull: Option<String>,

    #[arrrg(optional, "Attempts per request, including the first (default: 3)", "N")]
    pub retries: Option<u32>,

    #[arrrg(optional, "Seconds of stream silence before giving up (default: 120)", "SECS")]
    pub timeout: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    #[arrrg(flag, "Log debug output to stderr")]
    pub verbose: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments and the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Endpoint, model, timeouts and retries.
    pub request: RequestConfig,

    /// Optional system prompt placed at the start of every fresh conversation.
    pub system_prompt: Option<String>,

    /// Path to persist transcripts automatically after each completed turn.
    pub transcript_path: Option<PathBuf>,

    /// Whether to start from the conversation stored at `transcript_path`.
    pub resume: bool,

    /// Path to save the conversation to when the session ends.
    pub save_path: Option<PathBuf>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to log debug output.
    pub verbose: bool,

    /// List installed models instead of chatting.
    pub list_models: bool,

    /// Download this model instead of chatting.
    pub pull_model: Option<String>,

    /// One-shot prompt taken from the free arguments.
    pub prompt: Option<String>,
}

impl ChatConfig {
    /// Creates an interactive configuration for `request` with everything else at its default.
    pub fn new(request: RequestConfig) -> Self {
        Self {
            request,
            system_prompt: None,
            transcript_path: None,
            resume: false,
            save_path: None,
            use_color: true,
            verbose: false,
            list_models: false,
            pull_model: None,
            prompt: None,
        }
    }

    /// Resolve the command line against the process environment.
    pub fn from_command_line(args: ChatArgs, free: Vec<String>) -> Result<Self> {
        Self::from_args(args, free, |key| std::env::var(key).ok())
    }

    /// Resolve the command line, reading environment variables through `lookup`.
    ///
    /// Command-line values win over `OLLAMA_HOST` and `OLLAMA_MODEL`, which win over the
    /// built-in defaults.  `HOME` is consulted only when a default transcript path is needed.
    pub fn from_args<F>(args: ChatArgs, free: Vec<String>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut request = RequestConfig::from_lookup(|key| match key {
            HOST_ENV if args.host.is_some() => args.host.clone(),
            MODEL_ENV if args.model.is_some() => args.model.clone(),
            _ => lookup(key),
        })?;
        if let Some(model) = &args.model {
            request = request.with_model(model.as_str())?;
        }
        if let Some(retries) = args.retries {
            request.retry.max_attempts = retries;
        }
        if let Some(secs) = args.timeout {
            if secs == 0 {
                return Err(Error::validation(
                    "--timeout must be at least one second",
                    Some("timeout".to_string()),
                ));
            }
            request.timeouts.idle = Duration::from_secs(secs);
        }

        let transcript_path = match args.transcript {
            Some(path) => Some(PathBuf::from(path)),
            None if args.resume || args.log => {
                let home = lookup("HOME").filter(|h| !h.is_empty()).ok_or_else(|| {
                    Error::validation(
                        "HOME is not set; pass --transcript to choose a transcript file",
                        Some("transcript".to_string()),
                    )
                })?;
                Some(default_transcript_path(
                    PathBuf::from(home).as_path(),
                    &request.model,
                ))
            }
            None => None,
        };

        let prompt = free.join(" ");
        let prompt = (!prompt.trim().is_empty()).then_some(prompt);

        let pull_model = match args.pull {
            Some(model) if model.trim().is_empty() => {
                return Err(Error::validation(
                    "--pull requires a model name",
                    Some("pull".to_string()),
                ));
            }
            other => other,
        };

        Ok(ChatConfig {
            system_prompt: args.system.filter(|s| !s.trim().is_empty()),
            transcript_path,
            resume: args.resume,
            save_path: args.save.map(PathBuf::from),
            use_color: !args.no_color,
            verbose: args.verbose,
            list_models: args.list_models,
            pull_model,
            prompt,
            ..ChatConfig::new(request)
        })
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the transcript auto-save path.
    pub fn with_transcript_path(mut self, path: Option<PathBuf>) -> Self {
        self.transcript_path = path;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from_args(ChatArgs::default(), vec![], no_env).unwrap();
        assert_eq!(config.request.host.as_str(), "http://localhost:11434/");
        assert_eq!(config.request.model, DEFAULT_MODEL);
        assert_eq!(config.request.retry.max_attempts, 3);
        assert!(config.use_color);
        assert!(config.system_prompt.is_none());
        assert!(config.transcript_path.is_none());
        assert!(config.prompt.is_none());
        assert!(!config.list_models);
    }

    #[test]
    fn command_line_beats_environment() {
        let env = |key: &str| match key {
            "OLLAMA_HOST" => Some("env-host:1234".to_string()),
            "OLLAMA_MODEL" => Some("env-model".to_string()),
            _ => None,
        };
        let config = ChatConfig::from_args(ChatArgs::default(), vec![], env).unwrap();
        assert_eq!(config.request.host.as_str(), "http://env-host:1234/");
        assert_eq!(config.request.model, "env-model");

        let args = ChatArgs {
            host: Some("cli-host".to_string()),
            model: Some("llama2".to_string()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::from_args(args, vec![], env).unwrap();
        assert_eq!(config.request.host.as_str(), "http://cli-host:11434/");
        assert_eq!(config.request.model, "llama2");
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            system: Some("You are helpful.".to_string()),
            transcript: Some("chat.json".to_string()),
            save: Some("final.json".to_string()),
            retries: Some(5),
            timeout: Some(10),
            no_color: true,
            verbose: true,
            ..ChatArgs::default()
        };
        let free = vec!["why".to_string(), "is".to_string(), "the sky blue?".to_string()];
        let config = ChatConfig::from_args(args, free, no_env).unwrap();
        assert_eq!(config.system_prompt.as_deref(), Some("You are helpful."));
        assert_eq!(config.transcript_path, Some(PathBuf::from("chat.json")));
        assert_eq!(config.save_path, Some(PathBuf::from("final.json")));
        assert_eq!(config.request.retry.max_attempts, 5);
        assert_eq!(config.request.timeouts.idle, Duration::from_secs(10));
        assert_eq!(config.prompt.as_deref(), Some("why is the sky blue?"));
        assert!(!config.use_color);
        assert!(config.verbose);
    }

    #[test]
    fn log_uses_default_transcript_path() {
        let env = |key: &str| (key == "HOME").then(|| "/home/me".to_string());
        let args = ChatArgs {
            model: Some("llama2:13b".to_string()),
            log: true,
            ..ChatArgs::default()
        };
        let config = ChatConfig::from_args(args, vec![], env).unwrap();
        assert_eq!(
            config.transcript_path,
            Some(PathBuf::from(
                "/home/me/.ollama_logs/llama2_13b_conversation_log.json"
            ))
        );
        assert!(!config.resume);
    }

    #[test]
    fn resume_without_home_needs_a_transcript() {
        let args = ChatArgs {
            resume: true,
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args(args, vec![], no_env)
            .unwrap_err()
            .is_validation());

        let args = ChatArgs {
            resume: true,
            transcript: Some("mine.json".to_string()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::from_args(args, vec![], no_env).unwrap();
        assert!(config.resume);
        assert_eq!(config.transcript_path, Some(PathBuf::from("mine.json")));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let args = ChatArgs {
            model: Some("  ".to_string()),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args(args, vec![], no_env).is_err());

        let args = ChatArgs {
            host: Some("ftp://example.com".to_string()),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args(args, vec![], no_env).is_err());

        let args = ChatArgs {
            timeout: Some(0),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args(args, vec![], no_env).is_err());

        let args = ChatArgs {
            pull: Some("".to_string()),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args(args, vec![], no_env).is_err());
    }

    #[test]
    fn config_builder_pattern() {
        let request = RequestConfig::new("localhost", "llama2").unwrap();
        let config = ChatConfig::new(request)
            .with_system_prompt("Test prompt")
            .with_transcript_path(Some(PathBuf::from("transcript.json")))
            .without_color();
        assert_eq!(config.system_prompt.as_deref(), Some("Test prompt"));
        assert_eq!(
            config.transcript_path,
            Some(PathBuf::from("transcript.json"))
        );
        assert!(!config.use_color);
    }
}
