//! Inference backend client
//!
//! [`BackendClient`] wraps a single-attempt [`Transport`] with a per-attempt
//! timeout, one retry with backoff for transient failures, and cancellation.

mod analyze;
mod gemini;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use analyze::AnalyzeTransport;
pub use gemini::GeminiTransport;

use crate::config::{ApiKeys, BackendConfig, BackendKind};
use crate::retry::{RetryPolicy, delay_for_attempt, is_recoverable};
use crate::session::Request;
use crate::Result;

/// Why no answer was obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Timeouts or transport failures persisted through the retry
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request
    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Outcome of one failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Worth retrying: connection failure, 5xx, 408
    #[error("{0}")]
    Transient(String),

    /// Final: any other 4xx or a malformed response
    #[error("{0}")]
    Rejected(String),
}

impl AttemptError {
    /// Classify an HTTP error status
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        if is_recoverable(status) {
            Self::Transient(format!("HTTP {status}: {message}"))
        } else {
            Self::Rejected(format!("HTTP {status}: {message}"))
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Rejected(format!("malformed response: {e}"))
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// Sends one request attempt to an inference service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single attempt, returning the answer text
    ///
    /// # Errors
    ///
    /// Returns an `AttemptError` classifying the failure
    async fn send(&self, request: &Request) -> std::result::Result<String, AttemptError>;

    fn name(&self) -> &'static str;
}

/// Asks the backend with timeout, retry, and cancellation
pub struct BackendClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl BackendClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            transport,
            timeout,
            retry,
        }
    }

    /// Build the client for the configured backend kind
    ///
    /// # Errors
    ///
    /// Returns error if the backend needs a key that is missing
    pub fn from_config(config: &BackendConfig, keys: &ApiKeys) -> Result<Self> {
        let transport: Arc<dyn Transport> = match config.kind {
            BackendKind::Analyze => Arc::new(AnalyzeTransport::new(&config.url)?),
            BackendKind::Gemini => Arc::new(GeminiTransport::from_config(config, keys)?),
        };

        tracing::info!(
            backend = transport.name(),
            timeout_secs = config.timeout.as_secs(),
            "backend client ready"
        );

        Ok(Self::new(
            transport,
            config.timeout,
            RetryPolicy::once(config.retry_base),
        ))
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Ask the backend a question
    ///
    /// # Errors
    ///
    /// - `Unavailable` when every attempt timed out or failed transiently
    /// - `Rejected` when the backend refused the request or answered with nothing
    /// - `Cancelled` when `cancel` fires first
    pub async fn ask(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, BackendError> {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(seq = request.seq, "backend request cancelled");
                Err(BackendError::Cancelled)
            }
            result = self.ask_with_retry(request) => result,
        }
    }

    async fn ask_with_retry(&self, request: &Request) -> std::result::Result<String, BackendError> {
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.transport.send(request)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptError::Transient(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f32()
                ))),
            };

            match outcome {
                Ok(answer) => {
                    let answer = answer.trim();
                    if answer.is_empty() {
                        return Err(BackendError::Rejected("empty answer".to_string()));
                    }
                    tracing::debug!(seq = request.seq, attempt, "backend answered");
                    return Ok(answer.to_string());
                }
                Err(AttemptError::Rejected(reason)) => {
                    tracing::warn!(seq = request.seq, reason = %reason, "backend rejected request");
                    return Err(BackendError::Rejected(reason));
                }
                Err(AttemptError::Transient(reason)) if attempt < self.retry.max_retries => {
                    let delay = delay_for_attempt(&self.retry, attempt);
                    tracing::warn!(
                        seq = request.seq,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %reason,
                        "backend attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Transient(reason)) => {
                    tracing::warn!(seq = request.seq, reason = %reason, "backend unavailable");
                    return Err(BackendError::Unavailable(reason));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::session::Mode;

    fn request() -> Request {
        Request {
            seq: 1,
            mode: Mode::General,
            prompt: "p".to_string(),
            question: "q".to_string(),
            image: None,
            history: Vec::new(),
        }
    }

    /// Transport replaying scripted outcomes; `None` hangs forever
    struct Script {
        outcomes: Mutex<Vec<Option<std::result::Result<String, AttemptError>>>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(mut outcomes: Vec<Option<std::result::Result<String, AttemptError>>>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn send(&self, _request: &Request) -> std::result::Result<String, AttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop().flatten();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }

        fn name(&self) -> &'static str {
            "script"
        }
    }

    fn client(script: &Arc<Script>) -> BackendClient {
        BackendClient::new(
            script.clone(),
            Duration::from_millis(50),
            RetryPolicy::once(Duration::from_millis(1)),
        )
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            AttemptError::from_status(503, String::new()),
            AttemptError::Transient(_)
        ));
        assert!(matches!(
            AttemptError::from_status(429, String::new()),
            AttemptError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn retries_transient_failure_once() {
        let script = Script::new(vec![
            Some(Err(AttemptError::Transient("reset".to_string()))),
            Some(Ok("A wooden table.".to_string())),
        ]);
        let answer = client(&script)
            .ask(&request(), &CancellationToken::new())
            .await;

        assert_eq!(answer, Ok("A wooden table.".to_string()));
        assert_eq!(script.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_timeouts_make_backend_unavailable() {
        let script = Script::new(vec![None, None]);
        let result = client(&script)
            .ask(&request(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(script.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let script = Script::new(vec![Some(Err(AttemptError::Rejected("quota".to_string())))]);
        let result = client(&script)
            .ask(&request(), &CancellationToken::new())
            .await;

        assert_eq!(result, Err(BackendError::Rejected("quota".to_string())));
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_answer_is_rejected() {
        let script = Script::new(vec![Some(Ok("   ".to_string()))]);
        let result = client(&script)
            .ask(&request(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn cancel_drops_outstanding_call() {
        let script = Script::new(vec![None]);
        let client = BackendClient::new(
            script.clone(),
            Duration::from_secs(30),
            RetryPolicy::once(Duration::from_millis(1)),
        );
        let cancel = CancellationToken::new();

        let req = request();
        let ask = client.ask(&req, &cancel);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(ask, trigger);

        assert_eq!(result, Err(BackendError::Cancelled));
    }
}
