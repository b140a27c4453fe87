//! Error types for Gizmo endpoints.
//!
//! [`ServiceError`] is what decoders, business functions and encoders
//! return. Every variant knows the HTTP status it maps to and the headers it
//! contributes, exposed through the [`StatusCoder`] and [`Headerer`] hooks.
//!
//! | Variant | Status |
//! |---|---|
//! | `Decode` | 400 unless overridden (always 4xx) |
//! | `Status` | whatever the caller chose |
//! | `Internal` | 500 |
//!
//! Clients always receive either the JSON envelope `{"error": "..."}` or,
//! for `Status` errors built from a value, that value encoded as JSON.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`ServiceError`].
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Hook letting a value choose the HTTP status of the response it becomes.
pub trait StatusCoder {
    /// The status to respond with.
    fn status_code(&self) -> StatusCode;
}

/// Hook letting a value contribute response headers.
pub trait Headerer {
    /// Headers merged into the response.
    fn headers(&self) -> HeaderMap;
}

/// Standard error type for endpoint code.
///
/// ```
/// use gizmo_core::{ServiceError, StatusCoder};
/// use http::StatusCode;
///
/// fn find(id: u32) -> Result<&'static str, ServiceError> {
///     match id {
///         1 => Ok("one"),
///         _ => Err(ServiceError::not_found(format!("no widget {id}"))),
///     }
/// }
///
/// let err = find(2).unwrap_err();
/// assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
/// assert_eq!(err.to_string(), "no widget 2");
/// ```
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request could not be decoded. The business function never ran.
    #[error("{message}")]
    Decode {
        /// Human-readable error message.
        message: String,
        /// A 4xx status.
        status: StatusCode,
    },

    /// An error carrying an explicit status, optional headers and body.
    #[error("{message}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// Human-readable error message.
        message: String,
        /// Headers merged into the response.
        headers: HeaderMap,
        /// Replaces the default envelope when set.
        body: Option<serde_json::Value>,
    },

    /// Anything else; always a 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Creates a 400 decode error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Creates a decode error with a specific 4xx status.
    ///
    /// Statuses outside the 4xx range are coerced to 400.
    #[must_use]
    pub fn decode(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_client_error() {
            status
        } else {
            StatusCode::BAD_REQUEST
        };
        Self::Decode {
            message: message.into(),
            status,
        }
    }

    /// Creates an error with an explicit status.
    #[must_use]
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a 404 error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    /// Creates a 503 error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::status(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// Creates a 500 error from a message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::Error::msg(message.into()))
    }

    /// Builds an error from a value that carries its own status.
    ///
    /// The value is serialized as the response body. If it also implements
    /// [`Headerer`], use [`ServiceError::with_headers_from`] afterwards.
    pub fn from_value<T>(value: &T) -> Self
    where
        T: Serialize + StatusCoder + std::fmt::Display,
    {
        match serde_json::to_value(value) {
            Ok(body) => Self::Status {
                status: value.status_code(),
                message: value.to_string(),
                headers: HeaderMap::new(),
                body: Some(body),
            },
            Err(e) => Self::Internal(anyhow::Error::new(e)),
        }
    }

    /// Adds one response header.
    ///
    /// Decode and internal errors are converted to `Status` errors with the
    /// same status and message.
    #[must_use]
    pub fn with_header(self, name: HeaderName, value: HeaderValue) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        self.merge_headers(headers)
    }

    /// Merges the headers declared by a [`Headerer`].
    #[must_use]
    pub fn with_headers_from(self, source: &impl Headerer) -> Self {
        self.merge_headers(source.headers())
    }

    fn merge_headers(self, extra: HeaderMap) -> Self {
        match self {
            Self::Status {
                status,
                message,
                mut headers,
                body,
            } => {
                headers.extend(extra);
                Self::Status {
                    status,
                    message,
                    headers,
                    body,
                }
            }
            other => Self::Status {
                status: other.status_code(),
                message: other.to_string(),
                headers: extra,
                body: None,
            },
        }
    }

    /// Returns true for decode errors.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns the JSON body clients receive for this error.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::Status {
                body: Some(body), ..
            } => body.clone(),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

impl StatusCoder for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode { status, .. } | Self::Status { status, .. } => *status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Headerer for ServiceError {
    fn headers(&self) -> HeaderMap {
        match self {
            Self::Status { headers, .. } => headers.clone(),
            _ => HeaderMap::new(),
        }
    }
}

/// The JSON error envelope: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable error message.
    pub error: String,
}

impl ErrorEnvelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Throttled {
        retry_in: u32,
    }

    impl StatusCoder for Throttled {
        fn status_code(&self) -> StatusCode {
            StatusCode::TOO_MANY_REQUESTS
        }
    }

    impl Headerer for Throttled {
        fn headers(&self) -> HeaderMap {
            let mut h = HeaderMap::new();
            h.insert("retry-after", HeaderValue::from_static("5"));
            h
        }
    }

    impl std::fmt::Display for Throttled {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "throttled for {}s", self.retry_in)
        }
    }

    #[test]
    fn test_bad_request() {
        let err = ServiceError::bad_request("missing field");
        assert!(err.is_decode());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), serde_json::json!({"error": "missing field"}));
    }

    #[test]
    fn test_decode_coerces_non_client_status() {
        let err = ServiceError::decode(StatusCode::BAD_GATEWAY, "x");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = ServiceError::decode(StatusCode::UNSUPPORTED_MEDIA_TYPE, "x");
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_internal_from_anyhow() {
        fn fails() -> ServiceResult<()> {
            let result: anyhow::Result<()> = Err(anyhow::anyhow!("database unreachable"));
            result?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "database unreachable");
        assert!(err.headers().is_empty());
    }

    #[test]
    fn test_from_value_uses_hooks() {
        let value = Throttled { retry_in: 5 };
        let err = ServiceError::from_value(&value).with_headers_from(&value);

        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body(), serde_json::json!({"retry_in": 5}));
        assert_eq!(err.headers()["retry-after"], "5");
        assert_eq!(err.to_string(), "throttled for 5s");
    }

    #[test]
    fn test_with_header_keeps_status() {
        let err = ServiceError::bad_request("nope")
            .with_header(HeaderName::from_static("x-reason"), HeaderValue::from_static("bad"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.headers()["x-reason"], "bad");
        assert_eq!(err.body(), serde_json::json!({"error": "nope"}));
    }

    #[test]
    fn test_envelope_serialization() {
        let json = serde_json::to_string(&ErrorEnvelope::new("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
