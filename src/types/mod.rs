// Public modules
pub mod chat_chunk;
pub mod chat_request;
pub mod message;
pub mod model_list;
pub mod server_info;
pub mod stream_fragment;

// Re-exports
pub use chat_chunk::{ChatChunk, ChunkMessage};
pub use chat_request::{ChatRequest, PullRequest};
pub use message::{Message, Role};
pub use model_list::{ModelDetails, ModelList, ModelSummary, format_model_size};
pub use server_info::{PullProgress, VersionInfo};
pub use stream_fragment::{GenerationStats, StreamFragment};
