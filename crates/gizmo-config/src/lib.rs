//! Environment-driven configuration for Gizmo servers.
//!
//! [`ServerConfig`] holds every setting the server reads. It is usually
//! built by [`ConfigLoader`] from defaults, an optional TOML or JSON file
//! and the process environment, or programmatically via
//! [`ServerConfig::builder`].
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HTTP_ADDR` | all interfaces |
//! | `HTTP_PORT` / `RPC_PORT` | `8080` / `8081` |
//! | `GIZMO_SERVER_NAME` | `gizmo` |
//! | `GIZMO_HEALTH_CHECK_TYPE` | `lb` (`simple`, `lb`, `custom`) |
//! | `GIZMO_HEALTH_CHECK_PATH` | `/status.txt` for `lb`, `/healthz` otherwise |
//! | `GIZMO_MAX_HEADER_BYTES` | 1 MiB |
//! | `GIZMO_READ_TIMEOUT` / `GIZMO_WRITE_TIMEOUT` / `GIZMO_IDLE_TIMEOUT` | `10s` / `10s` / `120s` |
//! | `GIZMO_SHUTDOWN_TIMEOUT` | `180s` |
//! | `GIZMO_POLL_INTERVAL` | `1s` |
//! | `GIZMO_LB_GRACE_DURATION` | `15s` |
//! | `GIZMO_GOMAXPROCS` | runtime default |
//! | `ENABLE_PPROF` | `false` |
//! | `METRICS_NAMESPACE` / `METRICS_SUBSYSTEM` / `METRICS_PATH` | empty / empty / `/metrics` |
//! | `HTTP_ACCESS_LOG` / `RPC_ACCESS_LOG` | disabled (`stdout` or a file path) |
//! | `TLS_CERT` / `TLS_KEY` | unset (both required for TLS) |
//! | `LOG_LEVEL` / `LOG_FORMAT` | `info` / `json` |
//! | `CORS_ORIGIN_SUFFIX` | unset |
//!
//! Durations are strings such as `300ms`, `10s` or `1m30s`; a bare integer
//! is seconds.

#![doc(html_root_url = "https://docs.rs/gizmo-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod duration;
mod error;
mod loader;

pub use config::{
    AccessLogTarget, HealthCheckKind, LogFormat, ServerConfig, ServerConfigBuilder, TlsSettings,
};
pub use duration::{format_duration, parse_duration, serde_str, ParseDurationError};
pub use error::ConfigError;
pub use loader::ConfigLoader;
