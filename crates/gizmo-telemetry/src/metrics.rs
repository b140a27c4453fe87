//! Prometheus metrics.
//!
//! A [`MetricsRegistry`] installs a Prometheus recorder behind the `metrics`
//! facade and records the standard server metrics under a
//! `<namespace>_<subsystem>_` prefix. The server owns the registry and serves
//! [`MetricsRegistry::render`] on its metrics path.
//!
//! # Example
//!
//! ```rust,ignore
//! use gizmo_telemetry::metrics::{MetricsConfig, MetricsRegistry};
//!
//! let registry = MetricsRegistry::install(&MetricsConfig::new("shop", "widgets"))?;
//! registry.record_request("GET", "/widgets", 200, Duration::from_millis(12));
//! // shop_widgets_http_requests_total{method="GET",path="/widgets",status="200"} 1
//! ```

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix applied before the subsystem.
    pub namespace: String,

    /// Second prefix component.
    pub subsystem: String,

    /// Path the server exposes the metrics on.
    pub path: String,

    /// Histogram buckets for request durations (in seconds).
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            subsystem: String::new(),
            path: "/metrics".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Creates a config with the given prefix components.
    #[must_use]
    pub fn new(namespace: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subsystem: subsystem.into(),
            ..Self::default()
        }
    }

    /// Sets the exposition path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// The metric name prefix, `namespace_subsystem_` with empty parts skipped.
    #[must_use]
    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        for part in [&self.namespace, &self.subsystem] {
            if !part.is_empty() {
                prefix.push_str(part);
                prefix.push('_');
            }
        }
        prefix
    }
}

/// Handle to the Prometheus recorder plus the metric names derived from the
/// configured prefix.
#[derive(Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
    path: String,
    requests_total: String,
    request_duration: String,
    in_flight: String,
    panics_total: String,
    rpc_requests_total: String,
    rpc_request_duration: String,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("path", &self.path)
            .field("requests_total", &self.requests_total)
            .finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Builds a Prometheus recorder and installs it as the global `metrics`
    /// recorder.
    ///
    /// Only one recorder can be global per process. When another registry
    /// already claimed that slot the returned registry still renders, but
    /// only what its own recorder saw, which is nothing.
    pub fn install(config: &MetricsConfig) -> TelemetryResult<Self> {
        let prefix = config.prefix();
        let request_duration = format!("{prefix}http_request_duration_seconds");
        let rpc_request_duration = format!("{prefix}rpc_request_duration_seconds");

        let builder = PrometheusBuilder::new()
            .set_buckets(&config.duration_buckets)
            .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => tracing::debug!(prefix = %prefix, "metrics recorder installed"),
            Err(e) => tracing::debug!(error = %e, "metrics recorder already installed"),
        }

        let registry = Self {
            handle,
            path: config.path.clone(),
            requests_total: format!("{prefix}http_requests_total"),
            request_duration,
            in_flight: format!("{prefix}http_in_flight_requests"),
            panics_total: format!("{prefix}http_panics_total"),
            rpc_requests_total: format!("{prefix}rpc_requests_total"),
            rpc_request_duration,
        };
        registry.describe();
        Ok(registry)
    }

    fn describe(&self) {
        describe_counter!(
            self.requests_total.clone(),
            "Total number of HTTP requests served"
        );
        describe_histogram!(
            self.request_duration.clone(),
            metrics::Unit::Seconds,
            "HTTP request latency in seconds"
        );
        describe_gauge!(
            self.in_flight.clone(),
            "Number of HTTP requests currently being served"
        );
        describe_counter!(
            self.panics_total.clone(),
            "Handler panics recovered by the server"
        );
        describe_counter!(
            self.rpc_requests_total.clone(),
            "Total number of RPC calls served"
        );
        describe_histogram!(
            self.rpc_request_duration.clone(),
            metrics::Unit::Seconds,
            "RPC latency in seconds"
        );
    }

    /// Path the metrics are exposed on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Records a completed HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        counter!(
            self.requests_total.clone(),
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            self.request_duration.clone(),
            "method" => method.to_string(),
            "path" => path.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Adjusts the in-flight gauge; the guard decrements on drop.
    #[must_use]
    pub fn in_flight(&self) -> InFlightGuard {
        gauge!(self.in_flight.clone()).increment(1.0);
        InFlightGuard {
            name: self.in_flight.clone(),
        }
    }

    /// Counts a recovered handler panic.
    pub fn record_panic(&self) {
        counter!(self.panics_total.clone()).increment(1);
    }

    /// Records a completed RPC call. `code` is the numeric gRPC status.
    pub fn record_rpc(&self, method: &str, code: u32, duration: Duration) {
        counter!(
            self.rpc_requests_total.clone(),
            "method" => method.to_string(),
            "code" => code.to_string()
        )
        .increment(1);

        histogram!(
            self.rpc_request_duration.clone(),
            "method" => method.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Renders the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Decrements the in-flight gauge on drop.
pub struct InFlightGuard {
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(self.name.clone()).decrement(1.0);
    }
}
