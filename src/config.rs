//! Resolved connection settings for the inference endpoint.
//!
//! A [`RequestConfig`] is built once at startup from the command line and the environment and is
//! read-only afterwards.  Nothing in the crate consults the environment after that point.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Environment variable naming the server, e.g. `localhost:11434` or `https://gpu-box/ollama`.
pub const HOST_ENV: &str = "OLLAMA_HOST";

/// Environment variable naming the default model.
pub const MODEL_ENV: &str = "OLLAMA_MODEL";

/// Server used when neither the command line nor the environment names one.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Port assumed when the host does not name one.
pub const DEFAULT_PORT: u16 = 11434;

/// Model used when neither the command line nor the environment names one.
pub const DEFAULT_MODEL: &str = "deepseek-r1";

/// Default time allowed to establish a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for a non-streaming request to complete.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default longest silence tolerated between two reads of a stream.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeouts applied by the transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Time allowed to establish a TCP connection.
    pub connect: Duration,

    /// Time allowed for a non-streaming request, body included.
    pub request: Duration,

    /// Longest silence tolerated between two reads of a streaming body.
    pub idle: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
            idle: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Everything the transport client needs to know about the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    /// Base URL of the server.  Always ends with `/` so endpoints join beneath it.
    pub host: Url,

    /// Model identifier used for new sessions.
    pub model: String,

    /// Timeouts.
    pub timeouts: TimeoutPolicy,

    /// Retry policy for establishing requests.
    pub retry: RetryPolicy,
}

impl RequestConfig {
    /// Create a configuration for `host` and `model` with default timeouts and retries.
    pub fn new(host: &str, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(Error::validation(
                "model identifier must not be empty",
                Some("model".to_string()),
            ));
        }
        Ok(Self {
            host: normalize_host(host)?,
            model: model.trim().to_string(),
            timeouts: TimeoutPolicy::default(),
            retry: RetryPolicy::default(),
        })
    }

    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from `lookup`, which maps variable names to values.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let host = non_empty(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let model = non_empty(MODEL_ENV).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(&host, model)
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(Error::validation(
                "model identifier must not be empty",
                Some("model".to_string()),
            ));
        }
        self.model = model.trim().to_string();
        Ok(self)
    }

    /// Sets the timeouts.
    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// URL of the endpoint at `path` (for example `api/chat`) beneath the host.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.host.join(path.trim_start_matches('/'))?)
    }
}

/// Normalize a user-supplied host into a base URL.
///
/// A missing scheme becomes `http://`, a missing port becomes [`DEFAULT_PORT`], and the path
/// always ends with `/`.  An explicitly written port is kept even when it is the scheme default.
pub fn normalize_host(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_HOST } else { raw };
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let mut url = Url::parse(&with_scheme)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::url(
            format!("unsupported scheme '{}' in host '{raw}'", url.scheme()),
            None,
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::url(format!("host '{raw}' has no hostname"), None));
    }
    if !authority_has_port(&with_scheme) {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|_| Error::url(format!("cannot set a port on host '{raw}'"), None))?;
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn authority_has_port(url: &str) -> bool {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority
        .rsplit_once('@')
        .map(|(_, hp)| hp)
        .unwrap_or(authority);
    match host_port.rsplit_once(']') {
        Some((_, rest)) => rest.starts_with(':'),
        None => host_port.contains(':'),
    }
}
