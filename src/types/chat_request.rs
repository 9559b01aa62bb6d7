use serde::Serialize;

use crate::types::Message;

/// Body of a `POST /api/chat` request.
///
/// The request borrows the conversation; building it never copies or mutates the history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    /// Model identifier, e.g. `llama2` or `deepseek-r1:7b`.
    pub model: &'a str,

    /// The full conversation, oldest message first.
    pub messages: &'a [Message],

    /// Whether the server should stream its answer as newline-delimited JSON.
    pub stream: bool,
}

impl<'a> ChatRequest<'a> {
    /// Create a streaming chat request.
    pub fn streaming(model: &'a str, messages: &'a [Message]) -> Self {
        Self {
            model,
            messages,
            stream: true,
        }
    }
}

/// Body of a `POST /api/pull` request.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest<'a> {
    /// Model to download.
    pub model: &'a str,

    /// Whether the server should stream progress updates.
    pub stream: bool,
}

impl<'a> PullRequest<'a> {
    /// Create a streaming pull request.
    pub fn streaming(model: &'a str) -> Self {
        Self {
            model,
            stream: true,
        }
    }
}
