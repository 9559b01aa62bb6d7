use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{GenerationStats, StreamFragment};

/// One line of a streamed `/api/chat` response, as it appears on the wire.
///
/// Every field is optional here so that a server-side error object can be told apart from a
/// malformed chunk.  [`ChatChunk::into_fragment`] enforces what a valid chunk must carry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunk {
    /// The model that produced the chunk.
    #[serde(default)]
    pub model: Option<String>,

    /// The message delta.
    #[serde(default)]
    pub message: Option<ChunkMessage>,

    /// Completion flag.
    #[serde(default)]
    pub done: Option<bool>,

    /// Error reported by the server in place of a chunk.
    #[serde(default)]
    pub error: Option<String>,

    /// Statistics present on the final chunk.
    #[serde(flatten)]
    pub stats: GenerationStats,
}

/// The message part of a [`ChatChunk`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkMessage {
    /// Role of the author; always `assistant` in practice.
    #[serde(default)]
    pub role: Option<String>,

    /// The text delta.
    #[serde(default)]
    pub content: String,
}

impl ChatChunk {
    /// Convert the wire chunk into a [`StreamFragment`].
    ///
    /// A chunk carrying `error` becomes [`Error::Server`]; a chunk without a `done` flag is a
    /// decode error.
    pub fn into_fragment(self) -> Result<StreamFragment> {
        if let Some(error) = self.error {
            return Err(Error::server(error));
        }
        let Some(done) = self.done else {
            return Err(Error::decode("chunk has no \"done\" flag", None, None));
        };
        let content = self.message.map(|m| m.content).unwrap_or_default();
        let stats = if done && !self.stats.is_empty() {
            Some(self.stats)
        } else {
            None
        };
        Ok(StreamFragment {
            content,
            done,
            stats,
        })
    }
}
