// Public modules
pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ndjson;
pub mod render;
pub mod retry;
pub mod types;
pub mod utils;

mod observability;

// Re-exports
pub use client::{Ollama, PullStream};
pub use config::{RequestConfig, TimeoutPolicy, normalize_host};
pub use conversation::{Conversation, default_transcript_path};
pub use error::{Error, Result};
pub use ndjson::{FragmentStream, NdjsonDecoder, decode_line, fragment_stream};
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper, retry};
pub use types::*;
