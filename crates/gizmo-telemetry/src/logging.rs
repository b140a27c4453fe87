//! Subscriber installation.
//!
//! There is no process-wide gizmo logger. Each request runs in a `tracing`
//! span holding its request id, method, path and trace id, and handlers log
//! through that span; this module decides how the events are rendered.
//!
//! ```rust,ignore
//! use gizmo_telemetry::logging::{init_logging, LogConfig, LogStyle};
//!
//! init_logging(&LogConfig::new(LogStyle::Json).with_level("info,hyper=warn"))?;
//! ```

use std::fmt;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStyle {
    /// One JSON object per line, with the current request span attached.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Nothing is installed.
    Off,
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Off => "off",
        })
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Renderer.
    pub style: LogStyle,
    /// `EnvFilter` directive such as `info,gizmo_server=debug`.
    pub level: String,
    /// Emit span open and close events.
    pub span_lifecycle: bool,
    /// Attach file and line to each event.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// `style` at info level with no extras.
    #[must_use]
    pub fn new(style: LogStyle) -> Self {
        Self {
            style,
            level: "info".to_string(),
            span_lifecycle: false,
            source_location: false,
        }
    }

    /// JSON at info level.
    #[must_use]
    pub fn production() -> Self {
        Self::new(LogStyle::Json)
    }

    /// Pretty output at debug level, with span events and source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            span_lifecycle: true,
            source_location: true,
            ..Self::new(LogStyle::Pretty)
        }
    }

    /// Replaces the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Installs the global subscriber described by `config`.
///
/// Fails with [`TelemetryError::LoggingInit`] on a bad directive or when a
/// global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let Some(layer) = fmt_layer(config) else {
        return Ok(());
    };
    let filter = create_env_filter(&config.level)?;
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn fmt_layer<S>(config: &LogConfig) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let spans = if config.span_lifecycle {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = tracing_subscriber::fmt::layer()
        .with_span_events(spans)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    match config.style {
        LogStyle::Off => None,
        LogStyle::Json => Some(
            base.json()
                .with_current_span(true)
                .with_span_list(false)
                .boxed(),
        ),
        LogStyle::Pretty => Some(base.pretty().boxed()),
    }
}

/// Parses a filter directive.
pub fn create_env_filter(directive: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid filter {directive:?}: {e}")))
}

/// Field names shared by request spans and access logging.
pub mod fields {
    /// `X-Request-Id` value.
    pub const REQUEST_ID: &str = "request_id";
    /// Trace id from `X-Cloud-Trace-Context`.
    pub const TRACE_ID: &str = "trace_id";
    /// HTTP method.
    pub const HTTP_METHOD: &str = "method";
    /// Request path.
    pub const HTTP_PATH: &str = "path";
    /// Response status.
    pub const HTTP_STATUS: &str = "status";
    /// Handler latency.
    pub const DURATION_MS: &str = "duration_ms";
    /// Caller address after forwarded-for resolution.
    pub const CALLER_IP: &str = "caller_ip";
    /// Error text.
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let prod = LogConfig::default();
        assert_eq!(prod.style, LogStyle::Json);
        assert_eq!(prod.level, "info");
        assert!(!prod.span_lifecycle);

        let dev = LogConfig::development().with_level("trace");
        assert_eq!(dev.style, LogStyle::Pretty);
        assert!(dev.source_location);
        assert_eq!(dev.level, "trace");
    }

    #[test]
    fn test_filter_directives() {
        assert!(create_env_filter("info,gizmo_server=debug").is_ok());
        let err = create_env_filter("gizmo=notalevel").unwrap_err();
        assert!(err.to_string().contains("notalevel"));
    }

    #[test]
    fn test_off_installs_nothing() {
        assert!(init_logging(&LogConfig::new(LogStyle::Off)).is_ok());
        assert_eq!(LogStyle::Off.to_string(), "off");
    }
}
