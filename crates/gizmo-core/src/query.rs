//! Query string lookups.

use http::Uri;

/// Returns the first value of `name` in the URI's query string, decoded.
///
/// ```
/// use gizmo_core::query_param;
///
/// let uri: http::Uri = "/widgets?callback=cb&deployer=ci%20bot".parse().unwrap();
/// assert_eq!(query_param(&uri, "callback").as_deref(), Some("cb"));
/// assert_eq!(query_param(&uri, "deployer").as_deref(), Some("ci bot"));
/// assert_eq!(query_param(&uri, "missing"), None);
/// ```
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs
        .into_iter()
        .find_map(|(key, value)| (key == name).then_some(value))
}

/// Whether `name` appears in the query string at all, with or without a value.
pub fn has_query_param(uri: &Uri, name: &str) -> bool {
    uri.query().is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(name))
    })
}
