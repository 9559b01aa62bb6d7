use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::RequestConfig;
use crate::error::{Error, Result};
use crate::ndjson::{FragmentStream, fragment_stream, json_lines};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::retry::{Sleeper, TokioSleeper, retry};
use crate::types::{ChatRequest, Message, ModelList, PullProgress, PullRequest, VersionInfo};

/// A stream of progress updates for a model download.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<PullProgress>> + Send>>;

/// Client for an Ollama inference server.
///
/// The client is cheap to clone.  It never mutates the conversations passed to it.
#[derive(Clone)]
pub struct Ollama {
    client: ReqwestClient,
    config: RequestConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Ollama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ollama")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ollama {
    /// Create a new client for the endpoint described by `config`.
    pub fn new(config: RequestConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(config.timeouts.connect)
            .default_headers(default_headers())
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Create a client from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::new(RequestConfig::from_env()?)
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Send the conversation to `model` and stream the reply.
    ///
    /// Establishing the request is retried according to the retry policy.  Once the server has
    /// accepted the request, the returned stream is never retried or resumed: a drop surfaces
    /// as [`Error::StreamInterrupted`].
    pub async fn chat(&self, model: &str, conversation: &[Message]) -> Result<FragmentStream> {
        if model.trim().is_empty() {
            return Err(Error::validation(
                "model identifier must not be empty",
                Some("model".to_string()),
            ));
        }
        let url = self.config.endpoint("api/chat")?;
        let body = ChatRequest::streaming(model, conversation);
        debug!(%url, model, messages = conversation.len(), "sending chat request");

        let response = self
            .execute(&url, || {
                self.client
                    .post(url.clone())
                    .header(header::ACCEPT, "application/x-ndjson")
                    .json(&body)
            })
            .await?;

        Ok(fragment_stream(
            Box::pin(response.bytes_stream()),
            self.config.timeouts.idle,
        ))
    }

    /// Query the server version.  Used as a connectivity check.
    pub async fn version(&self) -> Result<VersionInfo> {
        let url = self.config.endpoint("api/version")?;
        self.get_json(&url).await
    }

    /// List the models installed on the server.
    pub async fn list_models(&self) -> Result<ModelList> {
        let url = self.config.endpoint("api/tags")?;
        self.get_json(&url).await
    }

    /// Download `model` to the server, streaming progress.
    ///
    /// The stream ends after the `success` status.  An error reported by the server ends the
    /// stream with [`Error::Server`].
    pub async fn pull(&self, model: &str) -> Result<PullStream> {
        if model.trim().is_empty() {
            return Err(Error::validation(
                "model identifier must not be empty",
                Some("model".to_string()),
            ));
        }
        let url = self.config.endpoint("api/pull")?;
        let body = PullRequest::streaming(model);
        debug!(%url, model, "pulling model");

        let response = self
            .execute(&url, || self.client.post(url.clone()).json(&body))
            .await?;

        Ok(json_lines(
            Box::pin(response.bytes_stream()),
            self.config.timeouts.idle,
            |progress: &PullProgress| match &progress.error {
                Some(error) => Err(Error::server(error.clone())),
                None => Ok(progress.is_success()),
            },
        ))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let request_timeout = self.config.timeouts.request;
        retry(&self.config.retry, self.sleeper.as_ref(), |_| async move {
            let response = self
                .send_once(url, self.client.get(url.clone()).timeout(request_timeout))
                .await?;
            response.json::<T>().await.map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Reading response timed out: {e}"),
                        Some(request_timeout.as_secs_f64()),
                    )
                } else {
                    Error::decode(
                        format!("Failed to parse response from {url}: {e}"),
                        None,
                        Some(Box::new(e)),
                    )
                }
            })
        })
        .await
    }

    /// Run the request built by `build` until the server accepts it or the retry policy gives up.
    async fn execute<F>(&self, url: &Url, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        retry(&self.config.retry, self.sleeper.as_ref(), |attempt| {
            let request = build();
            async move {
                debug!(%url, attempt, "opening stream");
                self.send_once(url, request).await
            }
        })
        .await
    }

    /// Send a single request and check its status.
    async fn send_once(&self, url: &Url, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = request.send().await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            if e.is_timeout() {
                Error::timeout(
                    format!("Request to {url} timed out: {e}"),
                    Some(self.config.timeouts.request.as_secs_f64()),
                )
            } else if e.is_connect() || e.is_request() {
                Error::connection(
                    format!("Could not reach {url}: {e}"),
                    Some(Box::new(e)),
                )
            } else {
                Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Process API response errors and convert to our Error type.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response (HTTP {status_code}): {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| {
                let trimmed = error_body.trim();
                if trimmed.is_empty() {
                    format!("HTTP {status_code}")
                } else {
                    trimmed.to_string()
                }
            });

        match status_code {
            404 => Error::not_found(message),
            _ => Error::api(status_code, message),
        }
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(concat!("ollama-chat/", env!("CARGO_PKG_VERSION"))),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn client_creation() {
        let config = RequestConfig::new("localhost", "llama2").unwrap();
        let client = Ollama::new(config.clone()).unwrap();
        assert_eq!(client.config(), &config);
        assert!(format!("{client:?}").contains("llama2"));
    }

    #[tokio::test]
    async fn empty_model_is_rejected_before_any_request() {
        let config = RequestConfig::new("localhost", "llama2").unwrap();
        let client = Ollama::new(config).unwrap();
        let err = client.chat(" ", &[Message::user("hi")]).await.err().unwrap();
        assert!(err.is_validation());
        let err = client.pull("").await.err().unwrap();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        // Port 9 (discard) on localhost is essentially never listening.
        let config = RequestConfig::new("http://127.0.0.1:9", "llama2")
            .unwrap()
            .with_retry(crate::RetryPolicy::new(2).with_base_delay(Duration::from_millis(1)));
        let client = Ollama::new(config).unwrap();
        let err = client.version().await.unwrap_err();
        assert!(err.is_connection(), "{err}");
        assert_eq!(err.attempts(), Some(2));
    }
}
