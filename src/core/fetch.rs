// src/core/fetch.rs

//! Timeout-bounded, cancellable HTTP GET and the retry helper used for
//! long-lived archive downloads.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;

/// A streamed response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Per-request knobs. Both are optional; a request without either runs unbounded.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl FetchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancelled_by(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// The network seam of the crate. Any non-2xx status is an error.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetches `url` and buffers the whole body.
    async fn get(&self, url: &str, options: &FetchOptions) -> Result<Bytes, FetchError>;

    /// Fetches `url` and hands back the body as a stream of chunks.
    async fn stream(&self, url: &str) -> Result<ByteStream, FetchError>;

    /// Fetches `url` and decodes the body as UTF-8, lossily.
    async fn text(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let body = self.get(url, options).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// `HttpFetcher` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    stream_idle_timeout: Duration,
}

impl ReqwestFetcher {
    /// Streamed bodies fail with [`FetchError::Timeout`] once no chunk has
    /// arrived for `stream_idle_timeout`.
    pub fn new(
        user_agent: &str,
        accept_invalid_certs: bool,
        stream_idle_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            stream_idle_timeout,
        })
    }

    async fn send(&self, url: &str, timeout: Option<Duration>) -> Result<reqwest::Response, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let mut request = self.client.get(parsed);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, status = %status, "Non-success response.");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str, options: &FetchOptions) -> Result<Bytes, FetchError> {
        let request = async {
            let response = self.send(url, options.timeout).await?;
            response
                .bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(url, options.timeout, e))
        };

        match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(FetchError::Cancelled(url.to_string())),
                result = request => result,
            },
            None => request.await,
        }
    }

    async fn stream(&self, url: &str) -> Result<ByteStream, FetchError> {
        let idle = self.stream_idle_timeout;
        let response = tokio::time::timeout(idle, self.send(url, None))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                after: idle,
            })??;
        let owned_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map_err(move |e| FetchError::from_reqwest(&owned_url, None, e));
        Ok(with_idle_timeout(stream.boxed(), url, idle))
    }
}

/// Ends `body` with a [`FetchError::Timeout`] when a chunk takes longer than `idle`.
pub fn with_idle_timeout(body: ByteStream, url: &str, idle: Duration) -> ByteStream {
    let url = url.to_string();
    stream::unfold(Some(body), move |state| {
        let url = url.clone();
        async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(chunk)) => Some((chunk, Some(body))),
                Ok(None) => None,
                Err(_) => {
                    warn!(url = %url, idle_ms = idle.as_millis() as u64, "Stream stalled.");
                    Some((Err(FetchError::Timeout { url, after: idle }), None))
                }
            }
        }
    })
    .boxed()
}

/// How often, and how patiently, a flaky operation is retried.
///
/// The delay before attempt `n + 1` is `base_delay * n`, so waits grow linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` is exhausted.
///
/// The closure receives the 1-based attempt number. The last error is returned
/// when every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(label, attempt, error = %err, delay_ms = delay.as_millis() as u64, "Attempt failed, retrying.");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
