use thiserror::Error;

/// Error code the pipeline returns for documents with no text layer.
pub const CODE_NO_EXTRACTABLE_TEXT: &str = "NO_EXTRACTABLE_TEXT";

/// Errors crossing the remote API boundary.
///
/// All variants carry plain strings so they stay cheap to clone into events
/// and session diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Network-level failure: DNS, connect, TLS, timeout.
    #[error("request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status without a structured error body.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Structured rejection from the pipeline or billing provider.
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when retrying the same call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ApiError::Rejected { .. } => false,
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(ApiError::Transport("connection reset".to_string()).is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = ApiError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_rate_limit_and_timeout_statuses_are_transient() {
        for status in [408, 429] {
            let err = ApiError::Status {
                status,
                message: String::new(),
            };
            assert!(err.is_transient(), "status {} should be transient", status);
        }
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        let err = ApiError::Status {
            status: 404,
            message: "not found".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejections_are_not_transient() {
        let err = ApiError::Rejected {
            code: CODE_NO_EXTRACTABLE_TEXT.to_string(),
            message: "no text layer".to_string(),
        };
        assert!(!err.is_transient());
    }
}
