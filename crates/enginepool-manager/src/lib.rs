//! enginepool-manager: elastic block-lifecycle management.
//!
//! Turns scaling requests into provider submissions, composes the shell
//! command each block runs, and keeps the block → status table in sync
//! with what the provider reports.
//!
//! # Architecture
//!
//! ```text
//! ElasticPoolManager
//!   ├── ConnectionBroker (connection files; closed on shutdown)
//!   ├── TaskChannel (opaque work submission, via ChannelConnector)
//!   ├── LaunchCommand (composed once at start, reused per block)
//!   ├── ProviderGateway (optional; submit / status / cancel)
//!   └── BlockRegistry (block id → last reported status, insertion order)
//! ```
//!
//! All mutating operations share one async mutex. `status()` and the task
//! facade only take the registry/channel read locks.

pub mod error;
pub mod gateway;
pub mod launch;
pub mod manager;
pub mod registry;

pub use error::{PoolError, PoolResult};
pub use gateway::ProviderGateway;
pub use launch::{LaunchCommand, LaunchSettings, LaunchVariant};
pub use manager::{ElasticPoolManager, PoolPhase};
pub use registry::{BlockRecord, BlockRegistry};
