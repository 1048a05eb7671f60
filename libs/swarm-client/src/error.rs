//! Error types for control-plane calls.

use thiserror::Error;

/// Errors returned by [`SwarmClient`](crate::SwarmClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client could not be configured.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request did not reach the engine or the connection failed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The referenced object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The engine answered with a body that could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Create an API error from response details.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the failure might go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
