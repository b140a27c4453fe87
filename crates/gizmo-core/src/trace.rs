//! Inbound `X-Cloud-Trace-Context` header.

use std::fmt;

/// Header carrying the platform trace context.
pub const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";

/// Parsed form of `TRACE_ID/SPAN_ID;o=OPTIONS`.
///
/// ```
/// use gizmo_core::CloudTraceContext;
///
/// let ctx = CloudTraceContext::parse("105445aa7843bc8bf206b12000100000/1;o=1").unwrap();
/// assert_eq!(ctx.trace_id, "105445aa7843bc8bf206b12000100000");
/// assert_eq!(ctx.span_id, Some(1));
/// assert!(ctx.sampled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTraceContext {
    /// 32-character hex trace id
    pub trace_id: String,
    /// Decimal span id, when present
    pub span_id: Option<u64>,
    /// Whether the `o=1` trace flag was set
    pub sampled: bool,
}

impl CloudTraceContext {
    /// Parses a header value. Returns `None` for malformed input.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (ids, options) = match value.split_once(';') {
            Some((ids, options)) => (ids, Some(options)),
            None => (value, None),
        };
        let (trace_id, span) = match ids.split_once('/') {
            Some((trace, span)) => (trace, Some(span)),
            None => (ids, None),
        };

        let trace_id = trace_id.trim();
        if trace_id.is_empty() || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let span_id = match span.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(s.parse().ok()?),
            None => None,
        };
        let sampled = options.is_some_and(|o| o.trim() == "o=1");

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id,
            sampled,
        })
    }
}

impl fmt::Display for CloudTraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace_id)?;
        if let Some(span) = self.span_id {
            write!(f, "/{span}")?;
        }
        write!(f, ";o={}", u8::from(self.sampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_only() {
        let ctx = CloudTraceContext::parse("ABCDEF").unwrap();
        assert_eq!(ctx.trace_id, "abcdef");
        assert_eq!(ctx.span_id, None);
        assert!(!ctx.sampled);
    }

    #[test]
    fn test_parse_unsampled() {
        let ctx = CloudTraceContext::parse("abc/42;o=0").unwrap();
        assert_eq!(ctx.span_id, Some(42));
        assert!(!ctx.sampled);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CloudTraceContext::parse("").is_none());
        assert!(CloudTraceContext::parse("not-hex/1").is_none());
        assert!(CloudTraceContext::parse("abc/span").is_none());
    }

    #[test]
    fn test_display_round_trips() {
        let raw = "105445aa7843bc8bf206b12000100000/7;o=1";
        assert_eq!(CloudTraceContext::parse(raw).unwrap().to_string(), raw);
    }
}
