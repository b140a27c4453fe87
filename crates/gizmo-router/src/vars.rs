//! Route variable storage.
//!
//! Variables are kept in a small vector so the common case of a handful of
//! path variables stays on the stack.

use std::collections::HashMap;

use smallvec::SmallVec;

/// Maximum number of variables stored inline (stack allocated).
const INLINE_VARS: usize = 4;

/// Variables extracted from a matched path, in template order.
///
/// # Example
///
/// ```rust
/// use gizmo_router::RouteVars;
///
/// let mut vars = RouteVars::new();
/// vars.push("userId", "123");
/// vars.push("action", "view");
///
/// assert_eq!(vars.get("userId"), Some("123"));
/// assert_eq!(vars.get("unknown"), None);
/// assert_eq!(vars.to_map().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteVars {
    inner: SmallVec<[(String, String); INLINE_VARS]>,
}

impl RouteVars {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the value for a variable by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if no variables were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns an iterator over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Copies the variables into a map. Later duplicates overwrite earlier ones.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.inner.iter().cloned().collect()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.inner.truncate(len);
    }
}

impl<'a> IntoIterator for &'a RouteVars {
    type Item = (&'a str, &'a str);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, String)>,
        fn(&'a (String, String)) -> (&'a str, &'a str),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for RouteVars {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_push_and_get() {
        let mut vars = RouteVars::new();
        vars.push("id", "123");
        vars.push("name", "alice");

        assert_eq!(vars.get("id"), Some("123"));
        assert_eq!(vars.get("name"), Some("alice"));
        assert_eq!(vars.get("unknown"), None);
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_vars_iter_keeps_order() {
        let vars: RouteVars = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();

        let pairs: Vec<_> = vars.iter().collect();
        assert_eq!(pairs, vec![("b", "2"), ("a", "1")]);
    }

    #[test]
    fn test_vars_truncate() {
        let mut vars = RouteVars::new();
        vars.push("a", "1");
        vars.push("b", "2");
        vars.truncate(1);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("b"), None);
    }

    #[test]
    fn test_vars_many() {
        let mut vars = RouteVars::new();
        for i in 0..10 {
            vars.push(format!("key{i}"), format!("value{i}"));
        }
        assert_eq!(vars.len(), 10);
        assert_eq!(vars.to_map()["key5"], "value5");
    }

    #[test]
    fn test_empty_map() {
        assert!(RouteVars::new().to_map().is_empty());
    }
}
