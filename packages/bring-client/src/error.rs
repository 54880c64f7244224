//! Error types for the Bring client.

use thiserror::Error;

/// Result type for Bring client operations.
pub type Result<T> = std::result::Result<T, BringError>;

/// Bring client errors.
#[derive(Debug, Error)]
pub enum BringError {
    /// The request could not be sent or no response arrived.
    #[error("request for {identifier} failed: {source}")]
    Transport {
        identifier: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response arrived but its body could not be read.
    #[error("reading body for {identifier} failed: {source}")]
    Read {
        identifier: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not finish within the client timeout.
    #[error("request for {identifier} timed out")]
    Timeout { identifier: String },

    /// Invalid base URL or client settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BringError {
    pub(crate) fn from_send(identifier: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return BringError::Timeout {
                identifier: identifier.to_string(),
            };
        }
        BringError::Transport {
            identifier: identifier.to_string(),
            source,
        }
    }

    pub(crate) fn from_read(identifier: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return BringError::Timeout {
                identifier: identifier.to_string(),
            };
        }
        BringError::Read {
            identifier: identifier.to_string(),
            source,
        }
    }
}
