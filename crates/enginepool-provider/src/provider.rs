//! The provider seam consumed by the pool manager.

use std::collections::HashMap;
use std::sync::Arc;

use enginepool_core::{BlockId, BlockStatus, ProviderConfig};

use crate::local::LocalProvider;

/// A source of compute allocations.
///
/// Calls may block on real I/O (process spawn, batch-system commands,
/// cloud APIs). Implementations own their timeout policy; the manager
/// imposes none and never retries.
#[async_trait::async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Label used to tag errors and log lines.
    fn label(&self) -> &str;

    /// Whether an outer strategy may scale this provider elastically.
    fn scaling_enabled(&self) -> bool {
        true
    }

    /// Number of blocks to request when the pool starts.
    fn init_blocks(&self) -> Option<u32> {
        None
    }

    /// Request one block running `command` with `workers_per_block` copies.
    ///
    /// `Ok(None)` means the provider declined without raising.
    async fn submit(
        &self,
        command: &str,
        workers_per_block: u32,
    ) -> anyhow::Result<Option<BlockId>>;

    /// Current status of the given blocks.
    ///
    /// Blocks the provider knows nothing about are omitted from the result.
    async fn status(&self, block_ids: &[BlockId]) -> anyhow::Result<HashMap<BlockId, BlockStatus>>;

    /// Cancel the given blocks.
    async fn cancel(&self, block_ids: &[BlockId]) -> anyhow::Result<()>;
}

/// Build the provider selected in `pool.toml`.
pub fn from_config(config: &ProviderConfig) -> Arc<dyn ExecutionProvider> {
    match config {
        ProviderConfig::Local(local) => Arc::new(LocalProvider::new(local.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginepool_core::LocalProviderConfig;

    #[test]
    fn from_config_builds_local_provider() {
        let config = ProviderConfig::Local(LocalProviderConfig {
            label: "laptop".to_string(),
            init_blocks: Some(3),
            scaling_enabled: false,
            shell: "sh".to_string(),
        });
        let provider = from_config(&config);
        assert_eq!(provider.label(), "laptop");
        assert_eq!(provider.init_blocks(), Some(3));
        assert!(!provider.scaling_enabled());
    }
}
