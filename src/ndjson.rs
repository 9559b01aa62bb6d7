//! Newline-delimited JSON decoding for streaming responses.
//!
//! The server answers a streaming request with one JSON object per line.  This module turns a raw
//! byte stream into [`StreamFragment`]s:
//!
//! - lines may be split across network chunks and several lines may share a chunk;
//! - blank lines are keep-alives and are ignored;
//! - a malformed line is skipped with a warning and decoding continues;
//! - the fragment with `done = true` is the last one, and nothing after it is read;
//! - a body that ends, errors, or goes silent before `done = true` yields
//!   [`Error::StreamInterrupted`].

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::observability::{
    STREAM_BYTES, STREAM_FRAGMENTS, STREAM_INTERRUPTIONS, STREAM_MALFORMED_LINES,
};
use crate::types::{ChatChunk, StreamFragment};

/// Longest line kept in a warning before it is truncated.
const MAX_LOGGED_LINE: usize = 256;

/// Decode a single line of a chat stream.
///
/// The line must be a UTF-8 JSON object with a boolean `done` flag.  Trailing whitespace is
/// ignored.  A line carrying an `error` field decodes to [`Error::Server`]; anything else that
/// does not decode is an [`Error::Decode`].
pub fn decode_line(raw_line: &[u8]) -> Result<StreamFragment> {
    let text = std::str::from_utf8(raw_line).map_err(|e| {
        Error::decode(
            format!("invalid UTF-8 in stream line: {e}"),
            Some(String::from_utf8_lossy(raw_line).into_owned()),
            Some(Box::new(e)),
        )
    })?;
    let text = text.trim_end();
    let chunk: ChatChunk = serde_json::from_str(text).map_err(|e| {
        Error::decode(
            format!("malformed stream line: {e}"),
            Some(text.to_string()),
            Some(Box::new(e)),
        )
    })?;
    chunk.into_fragment().map_err(|err| match err {
        Error::Decode { message, .. } => Error::decode(message, Some(text.to_string()), None),
        other => other,
    })
}

/// Accumulates bytes and hands out complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// The next complete line, without its terminator.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Whatever is left once the body has ended.
    fn take_rest(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    if text.len() <= MAX_LOGGED_LINE {
        text.into_owned()
    } else {
        let mut end = MAX_LOGGED_LINE;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Incremental decoder for a chat response body.
///
/// Feed it the body in whatever chunks the network delivers; it returns the fragments that
/// became complete.  Once the terminal fragment has been produced, or a fatal error reported,
/// the decoder is terminated and ignores further input.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    lines: LineBuffer,
    completed: bool,
    terminated: bool,
    malformed: usize,
}

impl NdjsonDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete line in `chunk` (plus whatever was buffered before it).
    ///
    /// Malformed lines are skipped.  A server-reported error is returned in place and
    /// terminates the decoder.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamFragment>> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        self.lines.push(chunk);
        while let Some(line) = self.lines.next_line() {
            self.decode_into(&line, &mut out);
            if self.terminated {
                self.lines.clear();
                break;
            }
        }
        out
    }

    /// Decode a final unterminated line, if any, once the body has ended.
    pub fn finish(&mut self) -> Vec<Result<StreamFragment>> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        if let Some(rest) = self.lines.take_rest() {
            self.decode_into(&rest, &mut out);
        }
        out
    }

    /// Stop decoding; further input is ignored.
    pub fn terminate(&mut self) {
        self.terminated = true;
        self.lines.clear();
    }

    /// True once the terminal (`done = true`) fragment has been produced.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// True once the decoder will produce nothing further.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of malformed lines skipped so far.
    pub fn malformed_lines(&self) -> usize {
        self.malformed
    }

    fn decode_into(&mut self, line: &[u8], out: &mut Vec<Result<StreamFragment>>) {
        if is_blank(line) {
            trace!("ignoring keep-alive line");
            return;
        }
        match decode_line(line) {
            Ok(fragment) => {
                STREAM_FRAGMENTS.click();
                if fragment.done {
                    self.completed = true;
                    self.terminated = true;
                }
                out.push(Ok(fragment));
            }
            Err(err) if err.is_decode() => {
                self.malformed += 1;
                STREAM_MALFORMED_LINES.click();
                warn!(line = %preview(line), error = %err, "skipping malformed stream line");
            }
            Err(err) => {
                self.terminated = true;
                out.push(Err(err));
            }
        }
    }
}

/// A lazy, finite stream of decoded fragments.
pub type FragmentStream = std::pin::Pin<Box<dyn Stream<Item = Result<StreamFragment>> + Send>>;

struct FragmentState<S> {
    bytes: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<StreamFragment>>,
    idle_timeout: Duration,
}

/// Adapt a response body into a [`FragmentStream`].
///
/// The stream ends right after the terminal fragment; the body is dropped at that point even if
/// the server sent more.  A transport error, a body that ends early, or no data for
/// `idle_timeout` yields one [`Error::StreamInterrupted`] and ends the stream.
pub fn fragment_stream<S, E>(bytes: S, idle_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = FragmentState {
        bytes,
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        idle_timeout,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.decoder.is_terminated() {
                return None;
            }
            match tokio::time::timeout(state.idle_timeout, state.bytes.next()).await {
                Ok(Some(Ok(chunk))) => {
                    STREAM_BYTES.count(chunk.len() as u64);
                    state.pending.extend(state.decoder.feed(&chunk));
                }
                Ok(Some(Err(e))) => {
                    state.decoder.terminate();
                    state.pending.push_back(Err(interrupted(
                        format!("connection lost mid-response: {e}"),
                        Some(Box::new(e)),
                    )));
                }
                Ok(None) => {
                    state.pending.extend(state.decoder.finish());
                    if !state.decoder.is_terminated() {
                        state.decoder.terminate();
                        state.pending.push_back(Err(interrupted(
                            "server closed the stream before the response completed",
                            None,
                        )));
                    }
                }
                Err(_) => {
                    state.decoder.terminate();
                    state.pending.push_back(Err(interrupted(
                        format!(
                            "no data received for {} seconds",
                            state.idle_timeout.as_secs_f64()
                        ),
                        None,
                    )));
                }
            }
        }
    }))
}

fn interrupted(
    message: impl Into<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    STREAM_INTERRUPTIONS.click();
    Error::stream_interrupted(message, source)
}

struct JsonLinesState<S, T, F> {
    bytes: S,
    lines: LineBuffer,
    pending: VecDeque<Result<T>>,
    finished: bool,
    idle_timeout: Duration,
    is_last: F,
}

/// Decode one line into `pending`; returns true when it ends the stream.
fn decode_json_line<T, F>(line: &[u8], is_last: &F, pending: &mut VecDeque<Result<T>>) -> bool
where
    T: DeserializeOwned,
    F: Fn(&T) -> Result<bool>,
{
    if is_blank(line) {
        return false;
    }
    match serde_json::from_slice::<T>(line) {
        Ok(item) => match is_last(&item) {
            Ok(last) => {
                pending.push_back(Ok(item));
                last
            }
            Err(err) => {
                pending.push_back(Err(err));
                true
            }
        },
        Err(e) => {
            STREAM_MALFORMED_LINES.click();
            warn!(line = %preview(line), error = %e, "skipping malformed stream line");
            false
        }
    }
}

/// Adapt a response body of arbitrary JSON lines into a stream of `T`.
///
/// Blank lines are ignored, malformed lines are skipped with a warning, and the stream ends when
/// `is_last` returns true for an item, returns an error, or when the body ends.  A transport
/// error or an idle timeout yields one [`Error::StreamInterrupted`] and ends the stream.
pub fn json_lines<T, S, E, F>(
    bytes: S,
    idle_timeout: Duration,
    is_last: F,
) -> std::pin::Pin<Box<dyn Stream<Item = Result<T>> + Send>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(&T) -> Result<bool> + Send + 'static,
{
    let state = JsonLinesState {
        bytes,
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        finished: false,
        idle_timeout,
        is_last,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match tokio::time::timeout(state.idle_timeout, state.bytes.next()).await {
                Ok(Some(Ok(chunk))) => {
                    STREAM_BYTES.count(chunk.len() as u64);
                    state.lines.push(&chunk);
                    while let Some(line) = state.lines.next_line() {
                        if decode_json_line(&line, &state.is_last, &mut state.pending) {
                            state.finished = true;
                            state.lines.clear();
                            break;
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    state.pending.push_back(Err(interrupted(
                        format!("connection lost mid-response: {e}"),
                        Some(Box::new(e)),
                    )));
                }
                Ok(None) => {
                    state.finished = true;
                    if let Some(rest) = state.lines.take_rest() {
                        decode_json_line(&rest, &state.is_last, &mut state.pending);
                    }
                }
                Err(_) => {
                    state.finished = true;
                    state.pending.push_back(Err(interrupted(
                        format!(
                            "no data received for {} seconds",
                            state.idle_timeout.as_secs_f64()
                        ),
                        None,
                    )));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn ok_chunks(
        chunks: &[&str],
    ) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Send + Unpin + 'static {
        let chunks: Vec<std::result::Result<Bytes, io::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        stream::iter(chunks)
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<StreamFragment>> {
        stream.collect().await
    }

    const HEL: &str = r#"{"message":{"content":"Hel"},"done":false}"#;
    const LO: &str = r#"{"message":{"content":"lo"},"done":true}"#;

    #[test]
    fn decode_valid_line() {
        let fragment = decode_line(HEL.as_bytes()).unwrap();
        assert_eq!(fragment, StreamFragment::delta("Hel"));
        let fragment = decode_line(format!("{LO}\r").as_bytes()).unwrap();
        assert_eq!(fragment, StreamFragment::last("lo"));
    }

    #[test]
    fn decode_malformed_lines() {
        for line in [
            &b"{not json"[..],
            &b"[1, 2, 3]"[..],
            &b"{\"message\":{\"content\":\"x\"}}"[..],
            &b"\xff\xfe"[..],
        ] {
            let err = decode_line(line).unwrap_err();
            assert!(err.is_decode(), "{err}");
        }
    }

    #[test]
    fn decode_server_error_line() {
        let err = decode_line(br#"{"error":"out of memory"}"#).unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
    }

    #[test]
    fn malformed_line_between_valid_fragments_is_skipped() {
        let mut decoder = NdjsonDecoder::new();
        let body = format!("{HEL}\n{{\"message\": oops\n{LO}\n");
        let fragments: Vec<_> = decoder
            .feed(body.as_bytes())
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            fragments,
            vec![StreamFragment::delta("Hel"), StreamFragment::last("lo")]
        );
        assert_eq!(decoder.malformed_lines(), 1);
        assert!(decoder.is_completed());
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        let (a, b) = HEL.split_at(10);
        assert!(decoder.feed(a.as_bytes()).is_empty());
        let out = decoder.feed(format!("{b}\n").as_bytes());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().content, "Hel");
    }

    #[test]
    fn blank_lines_are_keep_alives() {
        let mut decoder = NdjsonDecoder::new();
        let body = format!("\n  \r\n{HEL}\n\n{LO}\n");
        let out = decoder.feed(body.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(decoder.malformed_lines(), 0);
    }

    #[test]
    fn nothing_after_done_is_decoded() {
        let mut decoder = NdjsonDecoder::new();
        let body = format!("{LO}\n{HEL}\n");
        let out = decoder.feed(body.as_bytes());
        assert_eq!(out.len(), 1);
        assert!(decoder.is_terminated());
        assert!(decoder.feed(format!("{HEL}\n").as_bytes()).is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn unterminated_last_line_is_decoded_at_end() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.feed(LO.as_bytes()).is_empty());
        let out = decoder.finish();
        assert_eq!(out.len(), 1);
        assert!(decoder.is_completed());
    }

    #[test]
    fn server_error_terminates() {
        let mut decoder = NdjsonDecoder::new();
        let body = format!("{HEL}\n{{\"error\":\"boom\"}}\n{LO}\n");
        let out = decoder.feed(body.as_bytes());
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(Error::Server { .. })));
        assert!(decoder.is_terminated());
        assert!(!decoder.is_completed());
    }

    #[tokio::test]
    async fn stream_yields_fragments_in_order() {
        let body = ok_chunks(&[&format!("{HEL}\n"), "{broken\n", &format!("{LO}\n")]);
        let items = collect(fragment_stream(body, Duration::from_secs(5))).await;
        let text: String = items
            .into_iter()
            .map(|r| r.unwrap().content)
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn stream_stops_pulling_after_done() {
        let tail = stream::iter(std::iter::from_fn(
            || -> Option<std::result::Result<Bytes, io::Error>> {
                panic!("the body must not be read after the terminal fragment")
            },
        ));
        let body = ok_chunks(&[&format!("{LO}\n")]).chain(tail);
        let items = collect(fragment_stream(body, Duration::from_secs(5))).await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn early_end_of_body_is_an_interruption() {
        let body = ok_chunks(&[&format!("{HEL}\n")]);
        let items = collect(fragment_stream(body, Duration::from_secs(5))).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "Hel");
        assert!(items[1].as_ref().unwrap_err().is_stream_interrupted());
    }

    #[tokio::test]
    async fn transport_error_is_an_interruption() {
        let chunks: Vec<std::result::Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from(format!("{HEL}\n"))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from(format!("{LO}\n"))),
        ];
        let items = collect(fragment_stream(stream::iter(chunks), Duration::from_secs(5))).await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_stream_interrupted());
        assert!(err.to_string().contains("reset by peer"));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_an_interruption() {
        let body = ok_chunks(&[&format!("{HEL}\n")]).chain(stream::pending());
        let items = collect(fragment_stream(body, Duration::from_secs(30))).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().is_stream_interrupted());
    }

    #[tokio::test]
    async fn json_lines_stop_at_last_item() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Status {
            status: String,
        }
        let body = ok_chunks(&[
            "{\"status\":\"pulling manifest\"}\n\n{garbage\n",
            "{\"status\":\"success\"}\n{\"status\":\"extra\"}\n",
        ]);
        let items: Vec<_> = json_lines(body, Duration::from_secs(5), |s: &Status| {
            Ok(s.status == "success")
        })
        .collect()
        .await;
        let statuses: Vec<String> = items.into_iter().map(|r| r.unwrap().status).collect();
        assert_eq!(statuses, vec!["pulling manifest", "success"]);
    }

    #[tokio::test]
    async fn json_lines_propagate_item_errors() {
        #[derive(serde::Deserialize)]
        struct Status {
            error: Option<String>,
        }
        let body = ok_chunks(&["{\"error\":\"no space left\"}\n{}\n"]);
        let items: Vec<_> = json_lines(body, Duration::from_secs(5), |s: &Status| match &s.error {
            Some(e) => Err(Error::server(e.clone())),
            None => Ok(false),
        })
        .collect()
        .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn long_lines_are_truncated_in_logs() {
        let line = "x".repeat(1000);
        let shown = preview(line.as_bytes());
        assert_eq!(shown.len(), MAX_LOGGED_LINE + 3);
    }
}
