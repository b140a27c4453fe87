//! Publisher and subscriber errors.

use thiserror::Error;

/// Result type alias using [`PubSubError`].
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Errors raised by publishers, subscribers and broker adapters.
///
/// `Clone` so a subscriber's terminal error can be read any number of times
/// and one ack batch failure can be handed to every message in the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PubSubError {
    /// The adapter does not implement the operation.
    #[error("operation not supported")]
    NotSupported,

    /// `start` was called twice.
    #[error("subscriber already started")]
    AlreadyStarted,

    /// `stop` was called twice, or `start` after `stop`.
    #[error("subscriber already stopped")]
    AlreadyStopped,

    /// `done` was called twice on one message.
    #[error("message already acknowledged")]
    AlreadyAcknowledged,

    /// The ack pipeline has shut down.
    #[error("ack pipeline closed")]
    AckPipelineClosed,

    /// `publish_multi` got different numbers of keys and messages.
    #[error("{keys} key(s) for {messages} message(s)")]
    LengthMismatch {
        /// Number of keys.
        keys: usize,
        /// Number of messages.
        messages: usize,
    },

    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The broker rejected or failed a call.
    #[error("broker error: {0}")]
    Broker(String),

    /// The HTTP endpoint answered with a non-success status.
    #[error("publish endpoint returned {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// A subscriber was started outside a Tokio runtime.
    #[error("no async runtime: {0}")]
    Runtime(String),
}

impl PubSubError {
    /// Creates a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Whether this is the "not supported" sentinel.
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported)
    }
}

impl From<serde_json::Error> for PubSubError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<reqwest::Error> for PubSubError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PubSubError::NotSupported.to_string(), "operation not supported");
        assert_eq!(
            PubSubError::LengthMismatch { keys: 2, messages: 3 }.to_string(),
            "2 key(s) for 3 message(s)"
        );
        assert_eq!(PubSubError::broker("down").to_string(), "broker error: down");
    }

    #[test]
    fn test_not_supported_sentinel() {
        assert!(PubSubError::NotSupported.is_not_supported());
        assert!(!PubSubError::AlreadyStopped.is_not_supported());
    }
}
