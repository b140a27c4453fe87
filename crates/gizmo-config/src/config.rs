//! Server configuration types.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use gizmo_telemetry::{LogConfig, MetricsConfig};
use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::ConfigError;

/// Which health check the server installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// Always ok; readiness only.
    Simple,
    /// Goes not-ready on stop and waits for load balancers to notice.
    #[default]
    #[serde(alias = "loadbalancer")]
    Lb,
    /// Supplied by the application.
    Custom,
}

impl HealthCheckKind {
    /// Default probe path for this kind.
    pub fn default_path(self) -> &'static str {
        match self {
            Self::Lb => "/status.txt",
            Self::Simple | Self::Custom => "/healthz",
        }
    }
}

impl FromStr for HealthCheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "lb" | "loadbalancer" => Ok(Self::Lb),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown health check type: {other}")),
        }
    }
}

/// Where access log lines go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessLogTarget {
    /// No access log.
    #[default]
    Disabled,
    /// Standard output.
    Stdout,
    /// A file, rotated daily.
    File(PathBuf),
}

impl AccessLogTarget {
    /// Whether any line is written.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl From<String> for AccessLogTarget {
    fn from(value: String) -> Self {
        match value.trim() {
            "" => Self::Disabled,
            "stdout" => Self::Stdout,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

impl From<AccessLogTarget> for String {
    fn from(value: AccessLogTarget) -> Self {
        match value {
            AccessLogTarget::Disabled => String::new(),
            AccessLogTarget::Stdout => "stdout".to_string(),
            AccessLogTarget::File(path) => path.display().to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Certificate and key for serving TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings<'a> {
    /// PEM certificate chain.
    pub cert: &'a Path,
    /// PEM private key.
    pub key: &'a Path,
}

/// Server configuration.
///
/// Every field maps to one environment variable, listed on the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// `GIZMO_SERVER_NAME`: identity reported by the health check.
    pub server_name: String,

    /// `HTTP_ADDR`: bind address; empty binds all interfaces.
    pub http_addr: String,

    /// `HTTP_PORT`.
    pub http_port: u16,

    /// `RPC_PORT`.
    pub rpc_port: u16,

    /// `GIZMO_HEALTH_CHECK_TYPE`.
    pub health_check_type: HealthCheckKind,

    /// `GIZMO_HEALTH_CHECK_PATH`; falls back to the kind's default.
    pub health_check_path: Option<String>,

    /// `GIZMO_MAX_HEADER_BYTES`.
    pub max_header_bytes: usize,

    /// `GIZMO_READ_TIMEOUT`.
    #[serde(with = "serde_str")]
    pub read_timeout: Duration,

    /// `GIZMO_WRITE_TIMEOUT`.
    #[serde(with = "serde_str")]
    pub write_timeout: Duration,

    /// `GIZMO_IDLE_TIMEOUT`.
    #[serde(with = "serde_str")]
    pub idle_timeout: Duration,

    /// `GIZMO_SHUTDOWN_TIMEOUT`.
    #[serde(with = "serde_str")]
    pub shutdown_timeout: Duration,

    /// `GIZMO_POLL_INTERVAL`: how often shutdown re-checks drain state.
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,

    /// `GIZMO_LB_GRACE_DURATION`.
    #[serde(with = "serde_str")]
    pub lb_grace_duration: Duration,

    /// `GIZMO_GOMAXPROCS`: worker threads when positive.
    pub gomaxprocs: usize,

    /// `ENABLE_PPROF`.
    pub enable_pprof: bool,

    /// `METRICS_NAMESPACE`.
    pub metrics_namespace: String,

    /// `METRICS_SUBSYSTEM`.
    pub metrics_subsystem: String,

    /// `METRICS_PATH`.
    pub metrics_path: String,

    /// `HTTP_ACCESS_LOG`.
    pub http_access_log: AccessLogTarget,

    /// `RPC_ACCESS_LOG`.
    pub rpc_access_log: AccessLogTarget,

    /// `TLS_CERT`.
    pub tls_cert: Option<PathBuf>,

    /// `TLS_KEY`.
    pub tls_key: Option<PathBuf>,

    /// `LOG_LEVEL`: an `EnvFilter` directive.
    pub log_level: String,

    /// `LOG_FORMAT`.
    pub log_format: LogFormat,

    /// `CORS_ORIGIN_SUFFIX`: origins ending with this are allowed.
    pub cors_origin_suffix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "gizmo".to_string(),
            http_addr: String::new(),
            http_port: 8080,
            rpc_port: 8081,
            health_check_type: HealthCheckKind::default(),
            health_check_path: None,
            max_header_bytes: 1 << 20,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
            lb_grace_duration: Duration::from_secs(15),
            gomaxprocs: 0,
            enable_pprof: false,
            metrics_namespace: String::new(),
            metrics_subsystem: String::new(),
            metrics_path: "/metrics".to_string(),
            http_access_log: AccessLogTarget::Disabled,
            rpc_access_log: AccessLogTarget::Disabled,
            tls_cert: None,
            tls_key: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            cors_origin_suffix: None,
        }
    }
}

impl ServerConfig {
    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Health check path in effect.
    pub fn health_check_path(&self) -> &str {
        self.health_check_path
            .as_deref()
            .unwrap_or_else(|| self.health_check_type.default_path())
    }

    /// `host:port` for the HTTP listener.
    pub fn http_bind_addr(&self) -> String {
        bind_addr(&self.http_addr, self.http_port)
    }

    /// `host:port` for the RPC listener.
    pub fn rpc_bind_addr(&self) -> String {
        bind_addr(&self.http_addr, self.rpc_port)
    }

    /// Runtime worker threads, `None` to use the runtime default.
    pub fn worker_threads(&self) -> Option<usize> {
        (self.gomaxprocs > 0).then_some(self.gomaxprocs)
    }

    /// TLS material when both halves are configured.
    pub fn tls(&self) -> Option<TlsSettings<'_>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsSettings { cert, key }),
            _ => None,
        }
    }

    /// Logging settings derived from `LOG_LEVEL` and `LOG_FORMAT`.
    pub fn log_config(&self) -> LogConfig {
        let base = match self.log_format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        base.with_level(self.log_level.clone())
    }

    /// Metrics settings derived from the `METRICS_*` variables.
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig::new(self.metrics_namespace.clone(), self.metrics_subsystem.clone())
            .with_path(self.metrics_path.clone())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::invalid(
                "tls",
                "TLS_CERT and TLS_KEY must be set together",
            ));
        }
        if self.http_port != 0 && self.http_port == self.rpc_port {
            return Err(ConfigError::invalid(
                "rpc_port",
                format!("RPC_PORT must differ from HTTP_PORT ({})", self.http_port),
            ));
        }
        if !self.health_check_path().starts_with('/') {
            return Err(ConfigError::invalid(
                "health_check_path",
                "must start with '/'",
            ));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "metrics_path",
                "must start with '/'",
            ));
        }
        if self.max_header_bytes == 0 {
            return Err(ConfigError::invalid(
                "max_header_bytes",
                "must be positive",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "poll_interval",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn bind_addr(host: &str, port: u16) -> String {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} http={} rpc={} health={:?}@{}",
            self.server_name,
            self.http_bind_addr(),
            self.rpc_bind_addr(),
            self.health_check_type,
            self.health_check_path()
        )
    }
}

/// Programmatic construction of a [`ServerConfig`].
///
/// ```
/// use std::time::Duration;
/// use gizmo_config::{HealthCheckKind, ServerConfig};
///
/// let config = ServerConfig::builder()
///     .http_port(0)
///     .rpc_port(0)
///     .health_check_type(HealthCheckKind::Simple)
///     .shutdown_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.health_check_path(), "/healthz");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

macro_rules! setter {
    ($(#[$doc:meta] $name:ident: $ty:ty),* $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name(mut self, value: $ty) -> Self {
                self.config.$name = value;
                self
            }
        )*
    };
}

macro_rules! setter_into {
    ($(#[$doc:meta] $name:ident: $ty:ty),* $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name(mut self, value: impl Into<$ty>) -> Self {
                self.config.$name = value.into();
                self
            }
        )*
    };
}

impl ServerConfigBuilder {
    setter_into! {
        /// Sets the server name.
        server_name: String,
        /// Sets the bind address.
        http_addr: String,
        /// Sets the metrics namespace.
        metrics_namespace: String,
        /// Sets the metrics subsystem.
        metrics_subsystem: String,
        /// Sets the metrics path.
        metrics_path: String,
        /// Sets the log filter.
        log_level: String,
    }

    setter! {
        /// Sets the HTTP port.
        http_port: u16,
        /// Sets the RPC port.
        rpc_port: u16,
        /// Sets the health check kind.
        health_check_type: HealthCheckKind,
        /// Sets the maximum header size.
        max_header_bytes: usize,
        /// Sets the read timeout.
        read_timeout: Duration,
        /// Sets the write timeout.
        write_timeout: Duration,
        /// Sets the idle timeout.
        idle_timeout: Duration,
        /// Sets the shutdown timeout.
        shutdown_timeout: Duration,
        /// Sets the shutdown poll interval.
        poll_interval: Duration,
        /// Sets the load balancer grace duration.
        lb_grace_duration: Duration,
        /// Sets the worker thread count.
        gomaxprocs: usize,
        /// Enables the profiler endpoints.
        enable_pprof: bool,
        /// Sets the HTTP access log target.
        http_access_log: AccessLogTarget,
        /// Sets the RPC access log target.
        rpc_access_log: AccessLogTarget,
        /// Sets the log format.
        log_format: LogFormat,
    }

    /// Sets the health check path.
    #[must_use]
    pub fn health_check_path(mut self, path: impl Into<String>) -> Self {
        self.config.health_check_path = Some(path.into());
        self
    }

    /// Sets the TLS certificate and key.
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.config.tls_cert = Some(cert.into());
        self.config.tls_key = Some(key.into());
        self
    }

    /// Sets the allowed CORS origin suffix.
    #[must_use]
    pub fn cors_origin_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.cors_origin_suffix = Some(suffix.into());
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
