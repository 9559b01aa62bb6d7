//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the conversation,
//! drives one turn at a time against the server, and tracks usage.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chat::commands::ModelSelection;
use crate::chat::config::ChatConfig;
use crate::client::Ollama;
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_FIRST_FRAGMENT, SESSION_TURN_DURATION, SESSION_TURN_FAILURES, SESSION_TURNS,
};
use crate::render::Renderer;
use crate::types::{GenerationStats, Message, ModelList, PullProgress, Role};

/// Where the session is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next prompt.
    AwaitingInput,
    /// A request is being established.
    Sending,
    /// Fragments are arriving.
    Streaming,
    /// The session has ended and accepts no more turns.
    Closed,
}

/// The result of a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant message appended to the conversation.
    pub reply: Message,
    /// Statistics from the terminal fragment, when the server sent them.
    pub stats: Option<GenerationStats>,
    /// Number of fragments received.
    pub fragments: usize,
    /// Wall time from sending the request to the terminal fragment.
    pub elapsed: Duration,
}

/// A chat session that manages conversation state and server interactions.
pub struct ChatSession {
    client: Ollama,
    model: String,
    system_prompt: Option<String>,
    conversation: Conversation,
    transcript_path: Option<PathBuf>,
    state: SessionState,
    last_listing: Option<ModelList>,
    completed_turns: u64,
    failed_turns: u64,
    total_prompt_tokens: u64,
    total_eval_tokens: u64,
    last_tokens_per_second: Option<f64>,
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    /// The model used for the session.
    pub model: String,
    /// The number of messages in the conversation.
    pub message_count: usize,
    /// Turns that completed and were appended.
    pub completed_turns: u64,
    /// Turns that failed or were interrupted.
    pub failed_turns: u64,
    /// The system prompt, if any.
    pub system_prompt: Option<String>,
    /// The auto-save transcript path, if set.
    pub transcript_path: Option<PathBuf>,
    /// Prompt tokens across all turns the server reported.
    pub total_prompt_tokens: u64,
    /// Generated tokens across all turns the server reported.
    pub total_eval_tokens: u64,
    /// Generation speed of the last turn, if reported.
    pub last_tokens_per_second: Option<f64>,
}

impl ChatSession {
    /// Creates a new chat session with the given client and configuration.
    ///
    /// The session starts with a fresh conversation; see [`ChatSession::resume`].
    pub fn new(client: Ollama, config: &ChatConfig) -> Self {
        let mut session = Self {
            client,
            model: config.request.model.clone(),
            system_prompt: config.system_prompt.clone(),
            conversation: Conversation::new(),
            transcript_path: config.transcript_path.clone(),
            state: SessionState::AwaitingInput,
            last_listing: None,
            completed_turns: 0,
            failed_turns: 0,
            total_prompt_tokens: 0,
            total_eval_tokens: 0,
            last_tokens_per_second: None,
        };
        session.reset();
        session
    }

    /// Continue the conversation stored at the transcript path, if it exists.
    ///
    /// A configured system prompt is appended to a restored transcript that carries none, so it
    /// governs the rest of the conversation.  Returns the number of messages restored.
    pub fn resume(&mut self) -> Result<usize> {
        let Some(path) = self.transcript_path.clone() else {
            return Err(Error::validation(
                "no transcript file to resume from",
                Some("transcript".to_string()),
            ));
        };
        let mut conversation = Conversation::load_or_default(&path)?;
        let restored = conversation.len();
        if restored > 0 {
            if let Some(prompt) = &self.system_prompt
                && !conversation
                    .history()
                    .iter()
                    .any(|message| message.role == Role::System)
            {
                conversation.append(Message::system(prompt.clone()));
            }
            self.conversation = conversation;
        }
        info!(path = %path.display(), restored, "resumed transcript");
        Ok(restored)
    }

    /// Sends a user message and streams the response.
    ///
    /// The prompt and the assembled reply are appended together once the server reports
    /// completion.  On any failure the conversation is left exactly as it was; text already
    /// handed to `renderer` stays visible but is not recorded.  Cancelling `cancel` aborts
    /// the turn, drops the connection and closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or the stream fails, or if the session is closed.
    pub async fn send_streaming(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if self.state == SessionState::Closed {
            return Err(Error::validation("the session is closed", None));
        }
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Err(Error::validation(
                "prompt must not be empty",
                Some("prompt".to_string()),
            ));
        }

        SESSION_TURNS.click();
        let user = Message::user(user_input);
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        messages.extend_from_slice(self.conversation.history());
        messages.push(user.clone());

        self.state = SessionState::Sending;
        let start = Instant::now();
        let result = self.stream_reply(&messages, renderer, cancel, start).await;
        let elapsed = start.elapsed();
        SESSION_TURN_DURATION.add(elapsed.as_secs_f64());

        match result {
            Ok((content, stats, fragments)) => {
                renderer.finish_response();
                let reply = Message::assistant(content);
                self.conversation.append(user);
                self.conversation.append(reply.clone());
                self.state = SessionState::AwaitingInput;
                self.record_stats(stats.as_ref());
                debug!(fragments, ?elapsed, "turn complete");
                self.auto_save_transcript()?;
                Ok(TurnOutcome {
                    reply,
                    stats,
                    fragments,
                    elapsed,
                })
            }
            Err(err) => {
                SESSION_TURN_FAILURES.click();
                self.failed_turns += 1;
                if err.is_interrupted() {
                    renderer.print_interrupted();
                    self.state = SessionState::Closed;
                } else {
                    if err.is_stream_interrupted() {
                        renderer.print_interrupted();
                    }
                    self.state = SessionState::AwaitingInput;
                }
                Err(err)
            }
        }
    }

    async fn stream_reply(
        &mut self,
        messages: &[Message],
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<(String, Option<GenerationStats>, usize)> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::interrupted("request cancelled before the server answered"));
            }
            stream = self.client.chat(&self.model, messages) => stream?,
        };

        let mut reply = String::new();
        let mut fragments = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::interrupted("reply cancelled"));
                }
                next = stream.next() => next,
            };
            let fragment = match next {
                Some(fragment) => fragment?,
                None => {
                    return Err(Error::stream_interrupted(
                        "stream ended before completion",
                        None,
                    ));
                }
            };
            if self.state == SessionState::Sending {
                self.state = SessionState::Streaming;
                SESSION_FIRST_FRAGMENT.add(start.elapsed().as_secs_f64());
            }
            fragments += 1;
            renderer.print_text(&fragment.content);
            reply.push_str(&fragment.content);
            if fragment.done {
                return Ok((reply, fragment.stats, fragments));
            }
        }
    }

    /// Starts a fresh conversation, seeded with the system prompt when one is set.
    pub fn reset(&mut self) {
        let mut conversation = Conversation::new();
        if let Some(prompt) = &self.system_prompt {
            conversation.append(Message::system(prompt.clone()));
        }
        self.conversation = conversation;
    }

    /// Ends the session.  Further turns are rejected.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once the session has ended.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Returns the conversation so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }

    /// Returns the client the session talks through.
    pub fn client(&self) -> &Ollama {
        &self.client
    }

    /// Returns the current model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Changes the model used for responses.  The conversation is kept.
    pub fn set_model(&mut self, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        let model = model.trim();
        if model.is_empty() {
            return Err(Error::validation(
                "model identifier must not be empty",
                Some("model".to_string()),
            ));
        }
        self.model = model.to_string();
        Ok(())
    }

    /// Changes the model to the one the user picked, by name or by position in the last listing.
    ///
    /// Returns the name of the newly selected model.
    pub fn select_model(&mut self, selection: ModelSelection) -> Result<&str> {
        let name = match selection {
            ModelSelection::Name(name) => name,
            ModelSelection::Index(index) => {
                let Some(listing) = &self.last_listing else {
                    return Err(Error::validation(
                        "no model listing yet; run /models first",
                        Some("model".to_string()),
                    ));
                };
                match index.checked_sub(1).and_then(|i| listing.models().get(i)) {
                    Some(summary) => summary.name.clone(),
                    None => {
                        return Err(Error::validation(
                            format!(
                                "invalid selection {index}; pick 1 to {}",
                                listing.models().len()
                            ),
                            Some("model".to_string()),
                        ));
                    }
                }
            }
        };
        self.set_model(name)?;
        Ok(&self.model)
    }

    /// Lists the installed models and remembers the listing for numbered selection.
    ///
    /// Cancelling `cancel` abandons the request and closes the session.
    pub async fn list_models(&mut self, cancel: &CancellationToken) -> Result<&ModelList> {
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.state = SessionState::Closed;
                return Err(Error::interrupted("model listing cancelled"));
            }
            listing = self.client.list_models() => listing?,
        };
        Ok(self.last_listing.insert(listing))
    }

    /// Downloads `model`, reporting progress through `renderer`.
    ///
    /// Cancelling `cancel` drops the download stream and closes the session.
    pub async fn pull_model(
        &mut self,
        model: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = self.follow_pull(model, renderer, cancel).await;
        if let Err(err) = &result
            && err.is_interrupted()
        {
            renderer.print_interrupted();
            self.state = SessionState::Closed;
        }
        result
    }

    async fn follow_pull(
        &self,
        model: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut progress = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::interrupted("pull cancelled")),
            progress = self.client.pull(model) => progress?,
        };
        let mut last_status = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::interrupted("pull cancelled")),
                next = progress.next() => next,
            };
            let Some(update) = next else {
                return Err(Error::stream_interrupted(
                    "pull ended before the server reported success",
                    None,
                ));
            };
            let update = update?;
            if update.status != last_status {
                renderer.print_info(&describe_progress(&update));
                last_status.clone_from(&update.status);
            }
            if update.is_success() {
                return Ok(());
            }
        }
    }

    /// Sets or clears the system prompt and starts a fresh conversation with it.
    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self.reset();
    }

    /// Returns the current system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Sets the auto-save transcript path.
    pub fn set_transcript_path(&mut self, path: Option<PathBuf>) {
        self.transcript_path = path;
    }

    /// Returns the configured transcript path, if any.
    pub fn transcript_path(&self) -> Option<&Path> {
        self.transcript_path.as_deref()
    }

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.conversation.save(path)
    }

    /// Loads a transcript from disk, replacing the current conversation.
    pub fn load_transcript_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.conversation = Conversation::load(path)?;
        Ok(())
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            model: self.model.clone(),
            message_count: self.message_count(),
            completed_turns: self.completed_turns,
            failed_turns: self.failed_turns,
            system_prompt: self.system_prompt.clone(),
            transcript_path: self.transcript_path.clone(),
            total_prompt_tokens: self.total_prompt_tokens,
            total_eval_tokens: self.total_eval_tokens,
            last_tokens_per_second: self.last_tokens_per_second,
        }
    }

    fn record_stats(&mut self, stats: Option<&GenerationStats>) {
        self.completed_turns += 1;
        self.last_tokens_per_second = stats.and_then(GenerationStats::tokens_per_second);
        if let Some(stats) = stats {
            self.total_prompt_tokens = self
                .total_prompt_tokens
                .saturating_add(stats.prompt_eval_count.unwrap_or(0));
            self.total_eval_tokens = self
                .total_eval_tokens
                .saturating_add(stats.eval_count.unwrap_or(0));
        }
    }

    fn auto_save_transcript(&self) -> Result<()> {
        if let Some(path) = &self.transcript_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|err| {
                    Error::io(
                        format!("failed to create transcript directory {}", parent.display()),
                        err,
                    )
                })?;
            }
            self.save_transcript_to(path)
        } else {
            Ok(())
        }
    }
}

fn describe_progress(progress: &PullProgress) -> String {
    match progress.percent() {
        Some(percent) => format!("{} ({percent:.0}%)", progress.status),
        None => progress.status.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::types::ModelSummary;

    fn session(system: Option<&str>) -> ChatSession {
        let request = RequestConfig::new("localhost", "llama2").unwrap();
        let client = Ollama::new(request.clone()).unwrap();
        let mut config = ChatConfig::new(request);
        config.system_prompt = system.map(str::to_string);
        ChatSession::new(client, &config)
    }

    #[test]
    fn new_session_empty() {
        let session = session(None);
        assert_eq!(session.message_count(), 0);
        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert_eq!(session.model(), "llama2");
    }

    #[test]
    fn system_prompt_seeds_fresh_conversations() {
        let mut session = session(Some("Be brief."));
        assert_eq!(session.message_count(), 1);
        assert_eq!(session.conversation().history()[0].role, Role::System);

        session.conversation.append(Message::user("hi"));
        session.reset();
        assert_eq!(session.message_count(), 1);

        session.set_system_prompt(None);
        assert_eq!(session.message_count(), 0);
        assert!(session.system_prompt().is_none());
    }

    #[test]
    fn set_model() {
        let mut session = session(None);
        session.set_model(" mistral ").unwrap();
        assert_eq!(session.model(), "mistral");
        assert!(session.set_model("").is_err());
        assert_eq!(session.model(), "mistral");
    }

    #[test]
    fn select_model_by_number_needs_listing() {
        let mut session = session(None);
        assert!(session.select_model(ModelSelection::Index(1)).is_err());

        session.last_listing = Some(ModelList {
            models: vec![ModelSummary::new("llama2:latest"), ModelSummary::new("phi3:mini")],
        });
        assert_eq!(
            session.select_model(ModelSelection::Index(2)).unwrap(),
            "phi3:mini"
        );
        assert!(session.select_model(ModelSelection::Index(0)).is_err());
        assert!(session.select_model(ModelSelection::Index(3)).is_err());
        assert_eq!(
            session
                .select_model(ModelSelection::Name("qwen2".to_string()))
                .unwrap(),
            "qwen2"
        );
    }

    #[test]
    fn stats_accumulate() {
        let mut session = session(None);
        let stats = GenerationStats {
            prompt_eval_count: Some(10),
            eval_count: Some(50),
            eval_duration: Some(2_000_000_000),
            ..GenerationStats::default()
        };
        session.record_stats(Some(&stats));
        session.record_stats(None);
        let snapshot = session.stats();
        assert_eq!(snapshot.completed_turns, 2);
        assert_eq!(snapshot.total_prompt_tokens, 10);
        assert_eq!(snapshot.total_eval_tokens, 50);
        assert_eq!(snapshot.last_tokens_per_second, None);

        session.record_stats(Some(&stats));
        assert_eq!(session.stats().last_tokens_per_second, Some(25.0));
    }

    #[tokio::test]
    async fn closed_sessions_reject_turns() {
        struct Silent;
        impl Renderer for Silent {
            fn print_text(&mut self, _: &str) {}
            fn print_error(&mut self, _: &str) {}
            fn print_info(&mut self, _: &str) {}
            fn finish_response(&mut self) {}
        }

        let mut session = session(None);
        let cancel = CancellationToken::new();
        assert!(session
            .send_streaming("   ", &mut Silent, &cancel)
            .await
            .unwrap_err()
            .is_validation());

        session.close();
        assert!(session.is_closed());
        assert!(session
            .send_streaming("hi", &mut Silent, &cancel)
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn cancelled_before_request_closes_session() {
        struct Silent;
        impl Renderer for Silent {
            fn print_text(&mut self, _: &str) {}
            fn print_error(&mut self, _: &str) {}
            fn print_info(&mut self, _: &str) {}
            fn finish_response(&mut self) {}
        }

        let mut session = session(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session
            .send_streaming("hi", &mut Silent, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());
        assert!(session.is_closed());
        assert_eq!(session.message_count(), 0);
    }

    #[test]
    fn save_and_load_replace_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        let mut session = session(None);
        session.conversation.append(Message::user("hi"));
        session.conversation.append(Message::assistant("Hello"));
        session.save_transcript_to(&path).unwrap();

        session.reset();
        assert_eq!(session.message_count(), 0);
        session.load_transcript_from(&path).unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[test]
    fn resume_restores_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        Conversation::from(vec![Message::user("hi"), Message::assistant("Hello")])
            .save(&path)
            .unwrap();

        let request = RequestConfig::new("localhost", "llama2").unwrap();
        let client = Ollama::new(request.clone()).unwrap();
        let config = ChatConfig::new(request).with_transcript_path(Some(path));
        let mut session = ChatSession::new(client, &config);
        assert_eq!(session.resume().unwrap(), 2);
        assert_eq!(session.message_count(), 2);
    }

    #[test]
    fn resume_keeps_the_configured_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.json");
        Conversation::from(vec![Message::user("hi"), Message::assistant("Hello")])
            .save(&plain)
            .unwrap();
        let seeded = dir.path().join("seeded.json");
        Conversation::from(vec![Message::system("Be terse."), Message::user("hi")])
            .save(&seeded)
            .unwrap();

        let request = RequestConfig::new("localhost", "llama2").unwrap();
        let config = ChatConfig::new(request.clone()).with_system_prompt("Be brief.");

        let client = Ollama::new(request.clone()).unwrap();
        let mut session =
            ChatSession::new(client, &config.clone().with_transcript_path(Some(plain)));
        assert_eq!(session.resume().unwrap(), 2);
        assert_eq!(
            session.conversation().history(),
            &[
                Message::user("hi"),
                Message::assistant("Hello"),
                Message::system("Be brief.")
            ]
        );

        let client = Ollama::new(request).unwrap();
        let mut session = ChatSession::new(client, &config.with_transcript_path(Some(seeded)));
        assert_eq!(session.resume().unwrap(), 2);
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.conversation().history()[0], Message::system("Be terse."));
    }

    #[test]
    fn progress_description() {
        let progress = PullProgress {
            status: "downloading".to_string(),
            total: Some(200),
            completed: Some(50),
            ..PullProgress::default()
        };
        assert_eq!(describe_progress(&progress), "downloading (25%)");
        assert_eq!(
            describe_progress(&PullProgress {
                status: "success".to_string(),
                ..PullProgress::default()
            }),
            "success"
        );
    }
}
