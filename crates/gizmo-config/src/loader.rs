//! Layered configuration loading.
//!
//! Later layers override earlier ones:
//! 1. Defaults
//! 2. An optional TOML or JSON file
//! 3. Environment variables (after an optional `.env` file is loaded into
//!    the process environment)

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::{AccessLogTarget, ServerConfig};
use crate::duration::parse_duration;
use crate::ConfigError;

/// Configuration loader.
///
/// ```no_run
/// use gizmo_config::ConfigLoader;
///
/// # fn main() -> Result<(), gizmo_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_dotenv()
///     .with_optional_file("gizmo.toml")?
///     .with_env()?
///     .load()?;
/// println!("listening on {}", config.http_bind_addr());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: ServerConfig,
}

impl ConfigLoader {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    #[must_use]
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Loads a `.env` file into the process environment if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // Missing .env is not an error
        let _ = dotenvy::dotenv();
        self
    }

    /// Loads `path` if it exists. The extension selects the format.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads `path`, replacing the current configuration. Fields missing
    /// from the file take their defaults.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        self.config = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        Ok(self)
    }

    /// Applies the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(env::vars())
    }

    /// Applies variables from an iterator, as [`with_env`](Self::with_env)
    /// does for the process environment. Unrecognised names are ignored.
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            apply_var(&mut self.config, key.as_ref(), value.as_ref())?;
        }
        Ok(self)
    }

    /// Validates and returns the configuration.
    pub fn load(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn apply_var(config: &mut ServerConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "GIZMO_SERVER_NAME" => config.server_name = value.to_string(),
        "HTTP_ADDR" => config.http_addr = value.to_string(),
        "HTTP_PORT" => config.http_port = parse(key, value)?,
        "RPC_PORT" => config.rpc_port = parse(key, value)?,
        "GIZMO_HEALTH_CHECK_TYPE" => config.health_check_type = parse(key, value)?,
        "GIZMO_HEALTH_CHECK_PATH" => {
            config.health_check_path = non_empty(value);
        }
        "GIZMO_MAX_HEADER_BYTES" => config.max_header_bytes = parse(key, value)?,
        "GIZMO_READ_TIMEOUT" => config.read_timeout = duration(key, value)?,
        "GIZMO_WRITE_TIMEOUT" => config.write_timeout = duration(key, value)?,
        "GIZMO_IDLE_TIMEOUT" => config.idle_timeout = duration(key, value)?,
        "GIZMO_SHUTDOWN_TIMEOUT" => config.shutdown_timeout = duration(key, value)?,
        "GIZMO_POLL_INTERVAL" => config.poll_interval = duration(key, value)?,
        "GIZMO_LB_GRACE_DURATION" => config.lb_grace_duration = duration(key, value)?,
        "GIZMO_GOMAXPROCS" => config.gomaxprocs = parse(key, value)?,
        "ENABLE_PPROF" => {
            config.enable_pprof = parse_bool(value)
                .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
        }
        "METRICS_NAMESPACE" => config.metrics_namespace = value.to_string(),
        "METRICS_SUBSYSTEM" => config.metrics_subsystem = value.to_string(),
        "METRICS_PATH" => config.metrics_path = value.to_string(),
        "HTTP_ACCESS_LOG" => config.http_access_log = AccessLogTarget::from(value.to_string()),
        "RPC_ACCESS_LOG" => config.rpc_access_log = AccessLogTarget::from(value.to_string()),
        "TLS_CERT" => config.tls_cert = non_empty(value).map(Into::into),
        "TLS_KEY" => config.tls_key = non_empty(value).map(Into::into),
        "LOG_LEVEL" => config.log_level = value.to_string(),
        "LOG_FORMAT" => config.log_format = parse(key, value)?,
        "CORS_ORIGIN_SUFFIX" => config.cors_origin_suffix = non_empty(value),
        _ => {}
    }
    Ok(())
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::env(key, e.to_string()))
}

fn duration(key: &str, value: &str) -> Result<std::time::Duration, ConfigError> {
    parse_duration(value).map_err(|e| ConfigError::env(key, e.to_string()))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "" => Some(false),
        _ => None,
    }
}
