//! enginepool-core: shared types and `pool.toml` configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrokerConfig, LocalProviderConfig, PoolConfig, ProviderConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
