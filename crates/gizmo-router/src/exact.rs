//! Exact-path route table.

use std::collections::HashMap;

use http::Method;

use crate::error::RouteError;
use crate::method::MethodFilter;
use crate::vars::RouteVars;
use crate::RouteMatch;

/// A route table matching paths by exact string comparison.
///
/// Each path keeps its method entries in registration order; [`crate::ANY`]
/// accepts every method. No route variables are ever extracted.
///
/// ```rust
/// use gizmo_router::{ExactRouter, ANY};
/// use http::Method;
///
/// let mut router = ExactRouter::new();
/// router.insert(Method::GET, "/status", "status").unwrap();
/// router.insert(ANY, "/hook", "hook").unwrap();
///
/// assert!(router.match_route(&Method::POST, "/status").is_none());
/// assert_eq!(*router.match_route(&Method::POST, "/hook").unwrap().value, "hook");
/// ```
#[derive(Debug, Clone)]
pub struct ExactRouter<T> {
    routes: HashMap<String, Vec<(MethodFilter, T)>>,
    route_count: usize,
}

impl<T> Default for ExactRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExactRouter<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            route_count: 0,
        }
    }

    /// Registers `value` for `method` on exactly `path`.
    pub fn insert(
        &mut self,
        method: impl Into<MethodFilter>,
        path: &str,
        value: T,
    ) -> Result<(), RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath {
                path: path.to_string(),
            });
        }
        self.routes
            .entry(path.to_string())
            .or_default()
            .push((method.into(), value));
        self.route_count += 1;
        Ok(())
    }

    /// Looks up `path` and picks the first entry accepting `method`.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        self.routes
            .get(path)?
            .iter()
            .find(|(filter, _)| filter.matches(method))
            .map(|(_, value)| RouteMatch::new(value, RouteVars::new()))
    }

    /// Returns true if `path` is registered under any method.
    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Returns the number of routes registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }
}
