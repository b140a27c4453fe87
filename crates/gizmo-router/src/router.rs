//! Parameterised route table.

use http::Method;

use crate::error::RouteError;
use crate::method::MethodFilter;
use crate::node::Node;
use crate::RouteMatch;

/// A radix tree router supporting `{name}` and `{name:pattern}` segments.
///
/// Both method and path take part in matching. When more than one
/// registration matches a request, the one registered first wins, whether it
/// is a literal or a variable route.
///
/// # Example
///
/// ```rust
/// use gizmo_router::PatternRouter;
/// use http::Method;
///
/// let mut router = PatternRouter::new();
/// router.insert(Method::GET, "/users", "listUsers").unwrap();
/// router.insert(Method::PUT, "/users/{id}", "updateUser").unwrap();
///
/// let m = router.match_route(&Method::PUT, "/users/123").unwrap();
/// assert_eq!(*m.value, "updateUser");
/// assert_eq!(m.vars.get("id"), Some("123"));
/// assert!(router.match_route(&Method::DELETE, "/users/123").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PatternRouter<T> {
    root: Node<T>,
    route_count: usize,
}

impl<T> Default for PatternRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PatternRouter<T> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            route_count: 0,
        }
    }

    /// Registers `value` for `method` and the path template `path`.
    pub fn insert(
        &mut self,
        method: impl Into<MethodFilter>,
        path: &str,
        value: T,
    ) -> Result<(), RouteError> {
        self.root
            .insert(path, method.into(), self.route_count, value)?;
        self.route_count += 1;
        Ok(())
    }

    /// Matches a request against the table.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        let (value, vars) = self.root.match_path(method, path)?;
        Some(RouteMatch::new(value, vars))
    }

    /// Returns true if some route matches `path` under any method.
    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.root.matches_any_method(path)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ANY;
    use proptest::prelude::*;

    #[test]
    fn test_router_new() {
        let router: PatternRouter<()> = PatternRouter::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn test_insert_counts_routes() {
        let mut router = PatternRouter::new();
        router.insert(Method::GET, "/a", 1).unwrap();
        router.insert(Method::POST, "/a", 2).unwrap();
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_failed_insert_is_not_counted() {
        let mut router = PatternRouter::new();
        assert!(router.insert(Method::GET, "no-slash", 1).is_err());
        assert!(router.is_empty());
    }

    #[test]
    fn test_method_table_per_path() {
        let mut router = PatternRouter::new();
        router.insert(Method::GET, "/users", "list").unwrap();
        router.insert(Method::POST, "/users", "create").unwrap();

        assert_eq!(*router.match_route(&Method::GET, "/users").unwrap().value, "list");
        assert_eq!(*router.match_route(&Method::POST, "/users").unwrap().value, "create");
        assert!(router.match_route(&Method::DELETE, "/users").is_none());
        assert!(router.has_path("/users"));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut router = PatternRouter::new();
        router.insert(Method::GET, "/dup", "first").unwrap();
        router.insert(Method::GET, "/dup", "second").unwrap();
        assert_eq!(*router.match_route(&Method::GET, "/dup").unwrap().value, "first");
    }

    #[test]
    fn test_any_registered_after_specific() {
        let mut router = PatternRouter::new();
        router.insert(Method::GET, "/x", "get").unwrap();
        router.insert(ANY, "/x", "any").unwrap();

        assert_eq!(*router.match_route(&Method::GET, "/x").unwrap().value, "get");
        assert_eq!(*router.match_route(&Method::HEAD, "/x").unwrap().value, "any");
    }

    proptest! {
        #[test]
        fn prop_var_route_captures_segment(segment in "[a-zA-Z0-9_-]{1,24}") {
            let mut router = PatternRouter::new();
            router.insert(Method::GET, "/items/{item}", ()).unwrap();
            let path = format!("/items/{segment}");
            let m = router.match_route(&Method::GET, &path).unwrap();
            prop_assert_eq!(m.vars.get("item"), Some(segment.as_str()));
        }

        #[test]
        fn prop_numeric_pattern_rejects_letters(segment in "[a-z]{1,12}") {
            let mut router = PatternRouter::new();
            router.insert(Method::GET, "/n/{n:[0-9]+}", ()).unwrap();
            let path = format!("/n/{segment}");
            prop_assert!(router.match_route(&Method::GET, &path).is_none());
        }
    }
}
