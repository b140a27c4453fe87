//! Radix tree node implementation.
//!
//! Each node represents one path segment. Static children are kept sorted for
//! binary search; variable children are kept in insertion order. Every route
//! entry carries its registration sequence number so that, when several
//! branches match the same request, the earliest registration wins.

use http::Method;
use regex::Regex;

use crate::error::RouteError;
use crate::method::MethodFilter;
use crate::vars::RouteVars;

/// A compiled `{name:pattern}` constraint.
///
/// The pattern is anchored on both ends, so `{id:[0-9]+}` only accepts a
/// segment made entirely of digits.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern for the variable `name`.
    pub fn new(name: &str, source: &str) -> Result<Self, RouteError> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            RouteError::InvalidPattern {
                name: name.to_string(),
                pattern: source.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written in the template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if `value` satisfies the pattern.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Type of path segment in the radix tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    /// Literal segment (e.g. "users")
    Static(String),
    /// Variable segment (e.g. "{id}" or "{id:[0-9]+}")
    Var {
        /// Variable name
        name: String,
        /// Optional constraint
        pattern: Option<Pattern>,
    },
}

impl SegmentKind {
    /// Parses one template segment.
    fn parse(path: &str, segment: &str) -> Result<Self, RouteError> {
        let invalid = || RouteError::InvalidSegment {
            path: path.to_string(),
            segment: segment.to_string(),
        };

        let Some(inner) = segment.strip_prefix('{') else {
            if segment.contains(['{', '}']) {
                return Err(invalid());
            }
            return Ok(Self::Static(segment.to_string()));
        };
        let inner = inner.strip_suffix('}').ok_or_else(invalid)?;

        let (name, pattern) = match inner.split_once(':') {
            Some((name, pattern)) => (name, Some(pattern)),
            None => (inner, None),
        };
        if name.is_empty() || name.contains(['{', '}']) {
            return Err(invalid());
        }
        let pattern = pattern.map(|p| Pattern::new(name, p)).transpose()?;
        Ok(Self::Var {
            name: name.to_string(),
            pattern,
        })
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    seq: usize,
    method: MethodFilter,
    value: T,
}

/// Best candidate found while walking the tree.
struct Found<'a, T> {
    seq: usize,
    value: &'a T,
    vars: RouteVars,
}

/// A node in the radix tree.
#[derive(Debug, Clone)]
pub struct Node<T> {
    kind: SegmentKind,
    entries: Vec<Entry<T>>,
    static_children: Vec<Node<T>>,
    var_children: Vec<Node<T>>,
}

impl<T> Node<T> {
    fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            static_children: Vec::new(),
            var_children: Vec::new(),
        }
    }

    /// Creates a root node for the tree.
    #[must_use]
    pub fn root() -> Self {
        Self::new(SegmentKind::Static(String::new()))
    }

    /// The segment this node represents.
    #[must_use]
    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    /// Splits and validates a path template.
    pub fn parse_path(path: &str) -> Result<Vec<SegmentKind>, RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath {
                path: path.to_string(),
            });
        }
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| SegmentKind::parse(path, s))
            .collect()
    }

    /// Inserts a route with the given registration sequence number.
    pub fn insert(
        &mut self,
        path: &str,
        method: MethodFilter,
        seq: usize,
        value: T,
    ) -> Result<(), RouteError> {
        let segments = Self::parse_path(path)?;
        self.insert_segments(segments.into_iter(), Entry { seq, method, value });
        Ok(())
    }

    fn insert_segments(
        &mut self,
        mut segments: impl Iterator<Item = SegmentKind>,
        entry: Entry<T>,
    ) {
        let Some(kind) = segments.next() else {
            self.entries.push(entry);
            return;
        };

        let child = match kind {
            SegmentKind::Static(segment) => {
                let i = match self
                    .static_children
                    .binary_search_by(|c| c.static_segment().cmp(segment.as_str()))
                {
                    Ok(i) => i,
                    Err(i) => {
                        self.static_children
                            .insert(i, Node::new(SegmentKind::Static(segment)));
                        i
                    }
                };
                &mut self.static_children[i]
            }
            kind @ SegmentKind::Var { .. } => {
                if let Some(i) = self.var_children.iter().position(|c| c.kind == kind) {
                    &mut self.var_children[i]
                } else {
                    self.var_children.push(Node::new(kind));
                    let last = self.var_children.len() - 1;
                    &mut self.var_children[last]
                }
            }
        };
        child.insert_segments(segments, entry);
    }

    fn static_segment(&self) -> &str {
        match &self.kind {
            SegmentKind::Static(s) => s,
            SegmentKind::Var { .. } => "",
        }
    }

    /// Matches a request against the tree.
    ///
    /// Every branch that could match is visited and the entry with the lowest
    /// registration sequence wins.
    #[must_use]
    pub fn match_path(&self, method: &Method, path: &str) -> Option<(&T, RouteVars)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut vars = RouteVars::new();
        let mut best = None;
        self.match_segments(method, &segments, &mut vars, &mut best);
        best.map(|found| (found.value, found.vars))
    }

    /// Returns true if any route matches `path`, regardless of method.
    #[must_use]
    pub fn matches_any_method(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.has_path(&segments)
    }

    fn has_path(&self, segments: &[&str]) -> bool {
        let Some((segment, remaining)) = segments.split_first() else {
            return !self.entries.is_empty();
        };
        if let Some(child) = self.find_static_child(segment) {
            if child.has_path(remaining) {
                return true;
            }
        }
        self.var_children.iter().any(|child| {
            (child.accepts(segment) && child.has_path(remaining))
                || (!remaining.is_empty()
                    && !child.entries.is_empty()
                    && child.accepts_tail(segments))
        })
    }

    fn offer<'a>(&'a self, method: &Method, vars: &RouteVars, best: &mut Option<Found<'a, T>>) {
        // Entries are stored in registration order, so the first match is
        // this node's earliest.
        let Some(entry) = self.entries.iter().find(|e| e.method.matches(method)) else {
            return;
        };
        if best.as_ref().map_or(true, |b| entry.seq < b.seq) {
            *best = Some(Found {
                seq: entry.seq,
                value: &entry.value,
                vars: vars.clone(),
            });
        }
    }

    fn match_segments<'a>(
        &'a self,
        method: &Method,
        segments: &[&str],
        vars: &mut RouteVars,
        best: &mut Option<Found<'a, T>>,
    ) {
        let Some((segment, remaining)) = segments.split_first() else {
            self.offer(method, vars, best);
            return;
        };

        if let Some(child) = self.find_static_child(segment) {
            child.match_segments(method, remaining, vars, best);
        }

        for child in &self.var_children {
            let SegmentKind::Var { name, .. } = &child.kind else {
                continue;
            };
            let mark = vars.len();

            if child.accepts(segment) {
                vars.push(name.clone(), *segment);
                child.match_segments(method, remaining, vars, best);
                vars.truncate(mark);
            }

            // A terminal pattern such as `{path:.*}` may span several segments.
            if !remaining.is_empty() && !child.entries.is_empty() && child.accepts_tail(segments) {
                vars.push(name.clone(), segments.join("/"));
                child.offer(method, vars, best);
                vars.truncate(mark);
            }
        }
    }

    fn accepts(&self, segment: &str) -> bool {
        match &self.kind {
            SegmentKind::Var { pattern, .. } => {
                pattern.as_ref().map_or(true, |p| p.is_match(segment))
            }
            SegmentKind::Static(s) => s == segment,
        }
    }

    fn accepts_tail(&self, segments: &[&str]) -> bool {
        match &self.kind {
            SegmentKind::Var {
                pattern: Some(p), ..
            } => p.is_match(&segments.join("/")),
            _ => false,
        }
    }

    fn find_static_child(&self, segment: &str) -> Option<&Node<T>> {
        self.static_children
            .binary_search_by(|c| c.static_segment().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ANY;

    fn insert(
        root: &mut Node<&'static str>,
        seq: usize,
        method: Method,
        path: &str,
        v: &'static str,
    ) {
        root.insert(path, MethodFilter::Only(method), seq, v).unwrap();
    }

    #[test]
    fn test_parse_path_static() {
        let segments = Node::<()>::parse_path("/users/list").unwrap();
        assert_eq!(
            segments,
            vec![
                SegmentKind::Static("users".to_string()),
                SegmentKind::Static("list".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_path_var_with_pattern() {
        let segments = Node::<()>::parse_path("/users/{id:[0-9]+}").unwrap();
        match &segments[1] {
            SegmentKind::Var { name, pattern } => {
                assert_eq!(name, "id");
                assert_eq!(pattern.as_ref().unwrap().as_str(), "[0-9]+");
            }
            SegmentKind::Static(_) => panic!("expected variable"),
        }
    }

    #[test]
    fn test_parse_path_rejects_bad_templates() {
        assert!(matches!(
            Node::<()>::parse_path("users"),
            Err(RouteError::InvalidPath { .. })
        ));
        assert!(matches!(
            Node::<()>::parse_path("/users/{id"),
            Err(RouteError::InvalidSegment { .. })
        ));
        assert!(matches!(
            Node::<()>::parse_path("/file.{ext}"),
            Err(RouteError::InvalidSegment { .. })
        ));
        assert!(matches!(
            Node::<()>::parse_path("/users/{}"),
            Err(RouteError::InvalidSegment { .. })
        ));
        assert!(matches!(
            Node::<()>::parse_path("/users/{id:[0-9}"),
            Err(RouteError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_insert_and_match_var() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/users/{id}", "getUser");

        let (value, vars) = root.match_path(&Method::GET, "/users/123").unwrap();
        assert_eq!(*value, "getUser");
        assert_eq!(vars.get("id"), Some("123"));
        assert!(root.match_path(&Method::POST, "/users/123").is_none());
    }

    #[test]
    fn test_pattern_constrains_segment() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/users/{id:[0-9]+}", "numeric");

        assert!(root.match_path(&Method::GET, "/users/42").is_some());
        assert!(root.match_path(&Method::GET, "/users/alice").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/users/{id}", "var");
        insert(&mut root, 1, Method::GET, "/users/me", "static");

        let (value, vars) = root.match_path(&Method::GET, "/users/me").unwrap();
        assert_eq!(*value, "var");
        assert_eq!(vars.get("id"), Some("me"));
    }

    #[test]
    fn test_static_registered_first_wins() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/users/me", "static");
        insert(&mut root, 1, Method::GET, "/users/{id}", "var");

        let (value, vars) = root.match_path(&Method::GET, "/users/me").unwrap();
        assert_eq!(*value, "static");
        assert!(vars.is_empty());
    }

    #[test]
    fn test_method_mismatch_falls_through_to_later_route() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::POST, "/users/{id}", "post");
        root.insert("/users/{name}", ANY, 1, "any").unwrap();

        let (value, vars) = root.match_path(&Method::GET, "/users/bob").unwrap();
        assert_eq!(*value, "any");
        assert_eq!(vars.get("name"), Some("bob"));
    }

    #[test]
    fn test_tail_pattern_spans_segments() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/files/{path:.*}", "files");

        let (value, vars) = root
            .match_path(&Method::GET, "/files/images/logo.png")
            .unwrap();
        assert_eq!(*value, "files");
        assert_eq!(vars.get("path"), Some("images/logo.png"));
    }

    #[test]
    fn test_multiple_vars() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/orgs/{org}/users/{user}", "orgUser");

        let (_, vars) = root
            .match_path(&Method::GET, "/orgs/acme/users/123")
            .unwrap();
        assert_eq!(vars.get("org"), Some("acme"));
        assert_eq!(vars.get("user"), Some("123"));
    }

    #[test]
    fn test_backtracking_does_not_leak_vars() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/a/{x}/b", "first");
        insert(&mut root, 1, Method::GET, "/a/{y:[0-9]+}/c", "second");

        let (value, vars) = root.match_path(&Method::GET, "/a/7/c").unwrap();
        assert_eq!(*value, "second");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("y"), Some("7"));
    }

    #[test]
    fn test_matches_any_method() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::PUT, "/echo", "echo");
        assert!(root.matches_any_method("/echo"));
        assert!(!root.matches_any_method("/other"));
    }

    #[test]
    fn test_no_match() {
        let mut root = Node::root();
        insert(&mut root, 0, Method::GET, "/users", "list");
        assert!(root.match_path(&Method::GET, "/posts").is_none());
        assert!(root.match_path(&Method::GET, "/users/1").is_none());
    }
}
