use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the retry that follows failed attempt `attempt_index` (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Outcome of a single attempt as seen by [`RetryPolicy::run`].
#[derive(Debug)]
pub enum Attempt<E> {
    Retry(E),
    Fail(E),
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Fatal(E),
}

/// Bounded retry for idempotent reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::Fixed(Duration::from_secs(5)),
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    pub async fn run<T, E, F, Fut>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Fail(err)) => return Err(RetryError::Fatal(err)),
                Err(Attempt::Retry(err)) => {
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, last: err });
                    }
                    let delay = self.backoff.delay_for_attempt(attempt - 1);
                    debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Clock seam for backoff delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{url} unavailable after {attempts} attempts: {last}")]
    Unavailable {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Status of the final HTTP response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Unavailable { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// GET-only client that applies a [`RetryPolicy`] to every request.
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(config: HttpClientConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            retry: config.retry,
            sleeper,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch the body of `url`, retrying retryable statuses and transport errors.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let span = info_span!("upstream_fetch", url);
        let result = self
            .retry
            .run(self.sleeper.as_ref(), |attempt| self.attempt(url, attempt))
            .instrument(span)
            .await;
        match result {
            Ok(body) => Ok(body),
            Err(RetryError::Fatal(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(url, attempts, "retries exhausted");
                Err(FetchError::Unavailable {
                    url: url.to_string(),
                    attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.fetch_bytes(url).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::EmptyBody { url: url.to_string() });
        }
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Result<Vec<u8>, Attempt<FetchError>> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                return Err(match classify_reqwest_error(&err) {
                    RetryDisposition::Retryable => Attempt::Retry(FetchError::Request(err)),
                    RetryDisposition::NonRetryable => Attempt::Fail(FetchError::Request(err)),
                })
            }
        };

        let status = resp.status();
        if status.is_success() {
            return resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|err| Attempt::Retry(FetchError::Request(err)));
        }

        debug!(attempt, status = status.as_u16(), "non-success status");
        let err = FetchError::HttpStatus {
            status: status.as_u16(),
            url: resp.url().to_string(),
        };
        if self.retry.is_retryable_status(status) {
            Err(Attempt::Retry(err))
        } else {
            Err(Attempt::Fail(err))
        }
    }
}
