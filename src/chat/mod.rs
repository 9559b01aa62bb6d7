//! Chat application module for interactive conversations with a local model.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! client library. It supports:
//!
//! - Streaming responses with real-time token display
//! - Slash commands for session control
//! - Transcript auto-save and resume
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Core chat session management and server interaction
//! - [`commands`]: Slash command parsing
//! - [`interrupt`]: Ctrl-C routing to the operation in flight

mod commands;
mod config;
mod interrupt;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, ModelSelection, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use interrupt::Interrupt;
pub use session::{ChatSession, SessionState, SessionStats, TurnOutcome};
