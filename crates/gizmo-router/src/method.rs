//! Method filters shared by both route tables.

use std::fmt;
use std::str::FromStr;

use http::Method;

use crate::error::RouteError;

/// Sentinel method name matching every HTTP method.
pub const ANY: MethodFilter = MethodFilter::Any;

/// The method half of a route key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    /// Matches any method.
    Any,
    /// Matches exactly one method.
    Only(Method),
}

impl MethodFilter {
    /// Returns true if a request with `method` satisfies this filter.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(m) => m == method,
        }
    }

    /// Parses a method name; `"ANY"` yields [`MethodFilter::Any`].
    pub fn parse(name: &str) -> Result<Self, RouteError> {
        if name == "ANY" {
            return Ok(Self::Any);
        }
        Method::from_bytes(name.as_bytes())
            .map(Self::Only)
            .map_err(|_| RouteError::InvalidMethod(name.to_string()))
    }
}

impl FromStr for MethodFilter {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

impl From<&Method> for MethodFilter {
    fn from(method: &Method) -> Self {
        Self::Only(method.clone())
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Only(m) => f.write_str(m.as_str()),
        }
    }
}
