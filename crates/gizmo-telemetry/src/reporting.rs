//! Error reporting sink.
//!
//! When a handler panics the server recovers, answers 500 and hands an
//! [`ErrorReport`] to the configured [`ErrorReporter`]. [`TracingReporter`]
//! is the default sink; services that ship errors elsewhere plug in their
//! own implementation.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// A recovered failure with the request it happened on.
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    /// Panic payload or error message.
    pub message: String,
    /// Backtrace captured at the recovery site.
    pub backtrace: String,
    /// Request id of the failed request.
    pub request_id: Option<String>,
    /// HTTP method or RPC method name.
    pub method: Option<String>,
    /// Request path.
    pub path: Option<String>,
}

impl ErrorReport {
    /// Creates a report with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attaches the backtrace.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = backtrace.into();
        self
    }

    /// Attaches request details.
    #[must_use]
    pub fn with_request(
        mut self,
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.request_id = Some(request_id.into());
        self.method = Some(method.into());
        self.path = Some(path.into());
        self
    }
}

/// Receives recovered errors.
pub trait ErrorReporter: Send + Sync + 'static {
    /// Delivers a report.
    fn report(&self, report: ErrorReport) -> BoxFuture<'_, ()>;
}

/// Logs reports at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: ErrorReport) -> BoxFuture<'_, ()> {
        async move {
            tracing::error!(
                request_id = report.request_id.as_deref().unwrap_or(""),
                method = report.method.as_deref().unwrap_or(""),
                path = report.path.as_deref().unwrap_or(""),
                backtrace = %report.backtrace,
                "recovered from panic: {}",
                report.message
            );
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collect(Arc<Mutex<Vec<ErrorReport>>>);

    impl ErrorReporter for Collect {
        fn report(&self, report: ErrorReport) -> BoxFuture<'_, ()> {
            self.0.lock().unwrap().push(report);
            futures_util::future::ready(()).boxed()
        }
    }

    #[test]
    fn test_report_builder() {
        let report = ErrorReport::new("boom")
            .with_backtrace("frame 0")
            .with_request("req-1", "GET", "/widgets");
        assert_eq!(report.message, "boom");
        assert_eq!(report.backtrace, "frame 0");
        assert_eq!(report.method.as_deref(), Some("GET"));
        assert_eq!(report.path.as_deref(), Some("/widgets"));
    }

    #[tokio::test]
    async fn test_reporter_trait_object() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reporters: Vec<Box<dyn ErrorReporter>> =
            vec![Box::new(TracingReporter), Box::new(Collect(seen.clone()))];
        for reporter in &reporters {
            reporter.report(ErrorReport::new("boom")).await;
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
