//! Route registration errors.

use thiserror::Error;

/// Errors raised while registering a route.
///
/// Matching never fails; only malformed templates and method names are
/// rejected, and always at registration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The path template does not start with `/`.
    #[error("route path must start with '/': {path}")]
    InvalidPath {
        /// The rejected path
        path: String,
    },

    /// A segment mixes literal text and braces, or braces are unbalanced.
    #[error("invalid route segment '{segment}' in {path}")]
    InvalidSegment {
        /// The full template
        path: String,
        /// The offending segment
        segment: String,
    },

    /// A `{name:pattern}` segment carries a regular expression that does not compile.
    #[error("invalid pattern '{pattern}' for variable '{name}': {reason}")]
    InvalidPattern {
        /// Variable name
        name: String,
        /// Pattern source
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// The method name is not a valid HTTP token.
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
}
