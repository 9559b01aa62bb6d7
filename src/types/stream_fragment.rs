use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One decoded unit of a streamed chat response.
///
/// Fragments are transient: the session displays the content delta and accumulates it, but
/// never stores a fragment itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFragment {
    /// The text produced since the previous fragment.  May be empty.
    pub content: String,

    /// True for the last fragment of a response.
    pub done: bool,

    /// Generation statistics, reported by the server on the last fragment.
    pub stats: Option<GenerationStats>,
}

impl StreamFragment {
    /// Create an intermediate fragment carrying `content`.
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            stats: None,
        }
    }

    /// Create a terminal fragment carrying `content`.
    pub fn last(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: true,
            stats: None,
        }
    }
}

/// Statistics the server attaches to the terminal chunk of a chat response.
///
/// Durations are reported by the server in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Why generation stopped (for example `stop` or `length`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,

    /// Wall time spent on the whole request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,

    /// Number of tokens in the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,

    /// Number of tokens generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,

    /// Time spent generating tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl GenerationStats {
    /// Generated tokens per second, when the server reported enough to compute it.
    pub fn tokens_per_second(&self) -> Option<f64> {
        let count = self.eval_count?;
        let nanos = self.eval_duration.filter(|d| *d > 0)?;
        Some(count as f64 / Duration::from_nanos(nanos).as_secs_f64())
    }

    /// Total request time, when reported.
    pub fn total(&self) -> Option<Duration> {
        self.total_duration.map(Duration::from_nanos)
    }

    /// True when the server reported none of the fields.
    pub fn is_empty(&self) -> bool {
        self == &GenerationStats::default()
    }
}
