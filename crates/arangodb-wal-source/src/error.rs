use thiserror::Error;

/// Failure talking to the source database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Worth retrying: connection refused/reset, timeout, 503 and other 5xx.
    #[error("Source temporarily unavailable: {0}")]
    Transient(String),

    /// Retrying will not help: missing collection or database, rejected
    /// credentials, malformed response.
    #[error("Source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, context: impl std::fmt::Display) -> Self {
        if status == 429 || status >= 500 {
            SourceError::Transient(format!("{context}: HTTP {status}"))
        } else {
            SourceError::Fatal(format!("{context}: HTTP {status}"))
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            SourceError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::from_status(status.as_u16(), e)
        } else {
            SourceError::Fatal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(SourceError::from_status(503, "tail").is_transient());
        assert!(SourceError::from_status(500, "tail").is_transient());
        assert!(!SourceError::from_status(404, "tail").is_transient());
        assert!(!SourceError::from_status(401, "tail").is_transient());
    }
}
