//! Server lifecycle errors.

use std::time::Duration;

use gizmo_config::ConfigError;
use gizmo_telemetry::TelemetryError;
use thiserror::Error;

/// Result type alias using [`ServerError`].
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while building, starting or stopping a server.
///
/// Request-level failures never show up here: they are rendered as
/// responses. This type is `Clone` so the outcome of the first `stop` can be
/// replayed to later callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("failed to bind {addr}: {message}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// Operating system message.
        message: String,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// `start` was called on a running or stopped server.
    #[error("server already started")]
    AlreadyStarted,

    /// `stop` was called before `start`.
    #[error("server not started")]
    NotStarted,

    /// `stop` was called again after a graceful stop.
    #[error("server already stopped")]
    AlreadyStopped,

    /// Draining did not finish in time; listeners were closed anyway.
    #[error("shutdown timed out after {timeout:?} with {active} request(s) in flight")]
    ShutdownTimeout {
        /// The configured shutdown timeout.
        timeout: Duration,
        /// In-flight requests when the deadline passed.
        active: u64,
    },

    /// A service, route or RPC option was rejected.
    #[error("registration rejected: {0}")]
    Registration(String),

    /// Certificate or key material could not be loaded.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging or metrics could not be initialised.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// A listener stopped accepting connections on its own.
    #[error("listener failed: {0}")]
    Accept(String),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            message: source.to_string(),
        }
    }

    /// Creates a registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    /// Returns true for the hard-timeout shutdown outcome.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<TelemetryError> for ServerError {
    fn from(err: TelemetryError) -> Self {
        Self::Telemetry(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_message() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = ServerError::bind("0.0.0.0:8080", &io);
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:8080: address in use");
    }

    #[test]
    fn test_timeout_is_timeout() {
        let err = ServerError::ShutdownTimeout {
            timeout: Duration::from_secs(5),
            active: 1,
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("1 request(s) in flight"));
        assert!(!ServerError::AlreadyStopped.is_timeout());
    }

    #[test]
    fn test_clone_replays() {
        let err = ServerError::registration("second interceptor");
        assert_eq!(err.clone(), err);
    }
}
