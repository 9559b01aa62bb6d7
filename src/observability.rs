use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("ollama_chat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("ollama_chat.client.request_errors");
pub(crate) static CLIENT_REQUEST_RETRIES: Counter = Counter::new("ollama_chat.client.retries");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("ollama_chat.client.request_duration_seconds");
pub(crate) static CLIENT_RETRY_BACKOFF: Moments =
    Moments::new("ollama_chat.client.retry_backoff_seconds");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("ollama_chat.stream.fragments");
pub(crate) static STREAM_MALFORMED_LINES: Counter =
    Counter::new("ollama_chat.stream.malformed_lines");
pub(crate) static STREAM_INTERRUPTIONS: Counter = Counter::new("ollama_chat.stream.interruptions");
pub(crate) static STREAM_BYTES: Counter = Counter::new("ollama_chat.stream.bytes");

pub(crate) static SESSION_TURNS: Counter = Counter::new("ollama_chat.session.turns");
pub(crate) static SESSION_TURN_FAILURES: Counter =
    Counter::new("ollama_chat.session.turn_failures");
pub(crate) static SESSION_FIRST_FRAGMENT: Moments =
    Moments::new("ollama_chat.session.first_fragment_seconds");
pub(crate) static SESSION_TURN_DURATION: Moments =
    Moments::new("ollama_chat.session.turn_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_RETRIES);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_moments(&CLIENT_RETRY_BACKOFF);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_MALFORMED_LINES);
    collector.register_counter(&STREAM_INTERRUPTIONS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&SESSION_TURNS);
    collector.register_counter(&SESSION_TURN_FAILURES);
    collector.register_moments(&SESSION_FIRST_FRAGMENT);
    collector.register_moments(&SESSION_TURN_DURATION);
}
