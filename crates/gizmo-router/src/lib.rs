//! Route tables for Gizmo.
//!
//! This crate holds the two route tables the server can dispatch through.
//! Both are plain data structures: they never perform I/O or logging, and
//! they are generic over the value stored per route so the server can keep
//! whatever handler type it likes.
//!
//! - [`PatternRouter`]: a radix tree supporting `/prefix/{name}` and
//!   `/prefix/{name:pattern}` segments. Both method and path must match.
//!   When several routes match a request, the one registered first wins.
//! - [`ExactRouter`]: exact path lookup only. Each path keeps a small table of
//!   method entries where [`ANY`] matches every method.
//!
//! # Example
//!
//! ```rust
//! use gizmo_router::{PatternRouter, ANY};
//! use http::Method;
//!
//! let mut router = PatternRouter::new();
//! router.insert(Method::GET, "/users/{id:[0-9]+}", "getUser").unwrap();
//! router.insert(ANY, "/users/{name}", "byName").unwrap();
//!
//! let m = router.match_route(&Method::GET, "/users/42").unwrap();
//! assert_eq!(*m.value, "getUser");
//! assert_eq!(m.vars.get("id"), Some("42"));
//!
//! let m = router.match_route(&Method::DELETE, "/users/alice").unwrap();
//! assert_eq!(*m.value, "byName");
//! ```
//!
//! # Tree layout
//!
//! ```text
//!                    (root)
//!                      │
//!              ┌───────┴───────┐
//!              │               │
//!            "users"        "files"
//!              │               │
//!        ┌─────┴─────┐    "{path:.*}"
//!        │           │
//!   "{id:[0-9]+}" "{name}"
//! ```

mod error;
mod exact;
mod method;
mod node;
mod router;
mod vars;

pub use error::RouteError;
pub use exact::ExactRouter;
pub use method::{MethodFilter, ANY};
pub use node::{Node, Pattern, SegmentKind};
pub use router::PatternRouter;
pub use vars::RouteVars;

/// A matched route with its stored value and extracted route variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The value registered for the route
    pub value: &'a T,
    /// Variables extracted from the path
    pub vars: RouteVars,
}

impl<'a, T> RouteMatch<'a, T> {
    /// Creates a new route match.
    #[must_use]
    pub fn new(value: &'a T, vars: RouteVars) -> Self {
        Self { value, vars }
    }
}
