//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a pool configuration.
///
/// These are fatal: a pool is never constructed from an invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid engine debug level {0:?}; expected one of 0, 10, 20, 30, 40, 50, DEBUG, INFO, WARN, ERROR, CRITICAL")]
    InvalidDebugLevel(String),

    #[error("multiple storage access schemes are not yet supported (got {0})")]
    MultipleStorageAccess(usize),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
