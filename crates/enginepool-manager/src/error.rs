//! Pool manager error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use enginepool_core::ConfigError;

use crate::manager::PoolPhase;

/// Errors that can occur while managing an engine pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("connection file {} still missing after waiting {}s", path.display(), waited.as_secs())]
    StartupTimeout { path: PathBuf, waited: Duration },

    #[error("cannot read engine connection file {}: {source}", path.display())]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scaling failed for provider {label}: {reason}")]
    ScalingFailed { label: String, reason: String },

    #[error("provider {label}: {source}")]
    Provider {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection broker error: {0}")]
    Broker(#[source] anyhow::Error),

    #[error("task channel error: {0}")]
    Channel(#[source] anyhow::Error),

    #[error("cannot {op} while pool is {phase}")]
    InvalidState { op: &'static str, phase: PoolPhase },
}

pub type PoolResult<T> = Result<T, PoolError>;
