use thiserror::Error;

/// Failure talking to the target index.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Worth retrying: connection refused/reset, timeout, 429, 5xx.
    #[error("Target index temporarily unavailable: {0}")]
    Transient(String),

    /// Retrying will not help: bad credentials, invalid index name, malformed
    /// response.
    #[error("Target index error: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, context: impl std::fmt::Display) -> Self {
        if is_retryable_status(status) {
            SinkError::Transient(format!("{context}: HTTP {status}"))
        } else {
            SinkError::Fatal(format!("{context}: HTTP {status}"))
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            SinkError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            SinkError::from_status(status.as_u16(), e)
        } else {
            SinkError::Fatal(e.to_string())
        }
    }
}

/// 429 and every 5xx are worth another attempt.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}
