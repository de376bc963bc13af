//! Shared types used across enginepool crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Opaque identifier for a block, assigned by the provider at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id is what a provider returns when it could not allocate.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Provider-reported state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    Pending,
    Running,
    Failed,
    Cancelled,
    Completed,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Pending => "PENDING",
            BlockStatus::Running => "RUNNING",
            BlockStatus::Failed => "FAILED",
            BlockStatus::Cancelled => "CANCELLED",
            BlockStatus::Completed => "COMPLETED",
        }
    }

    /// Whether the block can no longer host engines.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Failed | BlockStatus::Cancelled | BlockStatus::Completed
        )
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine log verbosity passed through as `--log-level=<level>`.
///
/// Accepts the numeric logging levels and their names; anything else is
/// rejected when the pool config is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    Numeric(u8),
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl DebugLevel {
    const NUMERIC: [u8; 6] = [0, 10, 20, 30, 40, 50];

    pub fn from_number(n: i64) -> Result<Self, ConfigError> {
        u8::try_from(n)
            .ok()
            .filter(|n| Self::NUMERIC.contains(n))
            .map(DebugLevel::Numeric)
            .ok_or_else(|| ConfigError::InvalidDebugLevel(n.to_string()))
    }

    /// The flag appended to the engine command line.
    pub fn engine_flag(&self) -> String {
        format!("--log-level={self}")
    }
}

impl FromStr for DebugLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DEBUG" => Ok(DebugLevel::Debug),
            "INFO" => Ok(DebugLevel::Info),
            "WARN" => Ok(DebugLevel::Warn),
            "ERROR" => Ok(DebugLevel::Error),
            "CRITICAL" => Ok(DebugLevel::Critical),
            other => match other.parse::<i64>() {
                Ok(n) => Self::from_number(n),
                Err(_) => Err(ConfigError::InvalidDebugLevel(s.to_string())),
            },
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugLevel::Numeric(n) => write!(f, "{n}"),
            DebugLevel::Debug => f.write_str("DEBUG"),
            DebugLevel::Info => f.write_str("INFO"),
            DebugLevel::Warn => f.write_str("WARN"),
            DebugLevel::Error => f.write_str("ERROR"),
            DebugLevel::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Raw debug level as written in `pool.toml`: either `20` or `"INFO"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DebugLevelValue {
    Number(i64),
    Name(String),
}

impl DebugLevelValue {
    pub fn resolve(&self) -> Result<DebugLevel, ConfigError> {
        match self {
            DebugLevelValue::Number(n) => DebugLevel::from_number(*n),
            DebugLevelValue::Name(s) => s.parse(),
        }
    }
}
