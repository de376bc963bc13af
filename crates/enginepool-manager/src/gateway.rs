//! Provider gateway: the manager's only path to the execution provider.
//!
//! No retries here. Provider errors pass through unchanged, wrapped in
//! [`PoolError::Provider`] with the provider's label attached.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use enginepool_core::{BlockId, BlockStatus};
use enginepool_provider::ExecutionProvider;

use crate::error::{PoolError, PoolResult};

#[derive(Clone)]
pub struct ProviderGateway {
    provider: Arc<dyn ExecutionProvider>,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn ExecutionProvider>) -> Self {
        Self { provider }
    }

    pub fn label(&self) -> &str {
        self.provider.label()
    }

    pub fn scaling_enabled(&self) -> bool {
        self.provider.scaling_enabled()
    }

    pub fn init_blocks(&self) -> Option<u32> {
        self.provider.init_blocks()
    }

    /// Submit one block. An empty id from the provider counts as no block.
    pub async fn submit(&self, command: &str, workers_per_block: u32) -> PoolResult<Option<BlockId>> {
        let block = self
            .provider
            .submit(command, workers_per_block)
            .await
            .map_err(|source| self.tag(source))?;
        Ok(block.filter(|id| !id.is_empty()))
    }

    pub async fn status(&self, block_ids: &[BlockId]) -> PoolResult<HashMap<BlockId, BlockStatus>> {
        let statuses = self
            .provider
            .status(block_ids)
            .await
            .map_err(|source| self.tag(source))?;
        debug!(provider = %self.label(), queried = block_ids.len(), reported = statuses.len(), "provider status");
        Ok(statuses)
    }

    pub async fn cancel(&self, block_ids: &[BlockId]) -> PoolResult<()> {
        self.provider
            .cancel(block_ids)
            .await
            .map_err(|source| self.tag(source))
    }

    fn tag(&self, source: anyhow::Error) -> PoolError {
        PoolError::Provider {
            label: self.label().to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("label", &self.label())
            .finish()
    }
}
