use std::time::Duration;

/// Core error type for the bot.
///
/// Adapter crates map their transport errors into `Error::Remote` so the retry
/// engine can decide per failure kind; every other variant is unclassified and
/// is never retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("external error: {0}")]
    External(String),
}

/// Failure raised by a remote service, discriminated by kind.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The service asked us to back off for `retry_after`.
    #[error("rate limited: {message} (retry after {}s)", .retry_after.as_secs())]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    /// Transport or HTTP failure. `status` is `None` when no response arrived.
    #[error("http error ({}): {message}", .status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// Application-level rejection carrying a machine-readable reason code.
    #[error("api error {reason}: {message}")]
    Api { reason: String, message: String },
}

impl RemoteError {
    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn api(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
