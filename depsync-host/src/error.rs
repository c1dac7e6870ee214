//! Error types for depsync-host.

use thiserror::Error;

/// A failed hosting-platform request.
#[derive(Debug, Error)]
pub enum HostError {
    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded the agent timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The platform answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Parse(String),
}

impl HostError {
    /// Status code of an [`HostError::Api`] failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HostError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}
