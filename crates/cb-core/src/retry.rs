//! Retry policy engine.
//!
//! Every outbound remote call goes through [`Retrier::run`]. The engine only
//! inspects the raised error; it knows nothing about the wrapped operation's
//! arguments. No other layer retries.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{errors::RemoteError, ports::Sleeper, Error, Result};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts per logical call, including the first. Always >= 1.
    pub max_attempts: u32,
    /// Fixed delay before retrying a transient server/transport failure.
    pub server_error_delay: Duration,
    /// Upper-case API reason codes meaning "the effect already happened".
    pub benign_api_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            server_error_delay: Duration::from_secs(60),
            benign_api_errors: ["ALREADY_DONE", "DELETED_COMMENT", "DELETED_LINK", "THREAD_LOCKED"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn is_benign(&self, reason: &str) -> bool {
        self.benign_api_errors
            .iter()
            .any(|r| r.eq_ignore_ascii_case(reason))
    }
}

/// Classification of a failed remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited(Duration),
    TransientServer,
    PermanentClient(u16),
    Application { benign: bool },
    Unclassified,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::TransientServer)
    }

    /// Short human label used in replies and alerts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate limited",
            Self::TransientServer => "service unavailable",
            Self::PermanentClient(401) | Self::PermanentClient(403) => "access denied",
            Self::PermanentClient(_) => "request rejected",
            Self::Application { .. } => "application error",
            Self::Unclassified => "unexpected error",
        }
    }
}

pub fn classify(err: &Error, policy: &RetryPolicy) -> FailureClass {
    let Error::Remote(remote) = err else {
        return FailureClass::Unclassified;
    };

    match remote {
        RemoteError::RateLimited { retry_after, .. } => FailureClass::RateLimited(*retry_after),
        RemoteError::Http { status: None, .. } => FailureClass::TransientServer,
        RemoteError::Http {
            status: Some(s), ..
        } if *s >= 500 => FailureClass::TransientServer,
        RemoteError::Http {
            status: Some(s), ..
        } if (400..500).contains(s) => FailureClass::PermanentClient(*s),
        RemoteError::Http { .. } => FailureClass::Unclassified,
        RemoteError::Api { reason, .. } => FailureClass::Application {
            benign: policy.is_benign(reason),
        },
    }
}

/// Wraps remote operations with the configured retry policy.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds or fails terminally.
    ///
    /// Returns `Ok(None)` when the call failed with a benign application error
    /// (the intended effect already exists). On a fatal or exhausted failure the
    /// last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, op: &str, mut call: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match call().await {
                Ok(v) => {
                    if attempt > 1 {
                        debug!(op, attempt, "remote call succeeded after retry");
                    }
                    return Ok(Some(v));
                }
                Err(e) => e,
            };

            let class = classify(&err, &self.policy);
            let delay = match class {
                FailureClass::RateLimited(d) => d,
                FailureClass::TransientServer => self.policy.server_error_delay,
                FailureClass::Application { benign: true } => {
                    info!(op, error = %err, "ignoring benign api error");
                    return Ok(None);
                }
                FailureClass::PermanentClient(_)
                | FailureClass::Application { benign: false }
                | FailureClass::Unclassified => {
                    warn!(op, attempt, class = class.label(), error = %err, "remote call failed");
                    return Err(err);
                }
            };

            if attempt >= max_attempts {
                warn!(op, attempt, class = class.label(), error = %err, "retries exhausted");
                return Err(err);
            }

            warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying remote call"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// [`Retrier::run`] for calls whose value is required; a swallowed benign
    /// error becomes `Error::External`.
    pub async fn run_required<T, F, Fut>(&self, op: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.run(op, call)
            .await?
            .ok_or_else(|| Error::External(format!("{op}: no result (benign api error)")))
    }

    /// [`Retrier::run`] for calls whose value is not needed.
    pub async fn run_unit<F, Fut>(&self, op: &str, call: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.run(op, call).await.map(|_| ())
    }
}
