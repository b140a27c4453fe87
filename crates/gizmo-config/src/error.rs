//! Loader and validation failures.

use std::path::PathBuf;

use thiserror::Error;

/// Why a [`ServerConfig`](crate::ServerConfig) could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file content does not deserialize into the config.
    #[error("malformed {format} config: {reason}")]
    Parse {
        /// `toml` or `json`.
        format: &'static str,
        /// Deserializer message.
        reason: String,
    },

    /// Only `.toml` and `.json` files are understood.
    #[error("unsupported config file {}", path.display())]
    UnsupportedFormat {
        /// Offending file.
        path: PathBuf,
    },

    /// An environment variable holds an unparseable value.
    #[error("{var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// Fields are individually valid but inconsistent.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: String,
        /// Constraint that failed.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn env(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse {
            format: "toml",
            reason: err.message().to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            format: "json",
            reason: err.to_string(),
        }
    }
}
