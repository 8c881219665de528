//! Error types for Pullman core

use thiserror::Error;

/// Errors that can occur in Pullman core
#[derive(Debug, Error)]
pub enum PullmanError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error: {status}")]
    Server { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Download was cancelled without producing resume data")]
    ResumeTokenUnavailable,

    #[error("Invalid resume token: {0}")]
    InvalidResumeToken(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PullmanError {
    /// Cooperative cancellation signal, expected after `cancel()` or `pause()`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PullmanError::Cancelled)
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PullmanError::Network(e) => e.is_timeout() || e.is_connect(),
            PullmanError::Server { status } => *status >= 500,
            _ => false,
        }
    }
}

impl From<url::ParseError> for PullmanError {
    fn from(error: url::ParseError) -> Self {
        PullmanError::InvalidUrl(error.to_string())
    }
}

impl From<serde_json::Error> for PullmanError {
    fn from(error: serde_json::Error) -> Self {
        PullmanError::Serialization(error.to_string())
    }
}
