//! Observability for Gizmo services.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output and an
//!   `EnvFilter` ([`logging`])
//! - **Metrics**: Prometheus exposition through the `metrics` facade, with
//!   a namespace/subsystem prefix ([`metrics`])
//! - **Error reporting**: a sink that receives recovered panics
//!   ([`reporting`])
//!
//! # Standard Metrics
//!
//! Names below omit the `<namespace>_<subsystem>_` prefix.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `http_requests_total` | Counter | `method`, `path`, `status` |
//! | `http_request_duration_seconds` | Histogram | `method`, `path` |
//! | `http_in_flight_requests` | Gauge | - |
//! | `http_panics_total` | Counter | - |
//! | `rpc_requests_total` | Counter | `method`, `code` |
//! | `rpc_request_duration_seconds` | Histogram | `method` |
//!
//! # Example
//!
//! ```rust,ignore
//! use gizmo_telemetry::{init_logging, LogConfig, MetricsConfig, MetricsRegistry};
//!
//! init_logging(&LogConfig::production())?;
//! let metrics = MetricsRegistry::install(&MetricsConfig::default())?;
//! metrics.record_request("GET", "/widgets", 200, std::time::Duration::from_millis(3));
//! println!("{}", metrics.render());
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;
pub mod reporting;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogStyle};
pub use metrics::{MetricsConfig, MetricsRegistry};
pub use reporting::{ErrorReport, ErrorReporter, TracingReporter};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
