//! Elastic pool manager: the block lifecycle state machine.
//!
//! ```text
//! Unstarted ──start()──▶ Starting ──▶ Active ──shutdown()──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! `start()`, `scale_out()`, `scale_in()` and `shutdown()` are serialized
//! on one async mutex; provider calls inside them run sequentially and may
//! block for as long as the provider takes. `status()` and the task facade
//! never take that mutex.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use enginepool_broker::{
    ChannelConnector, ConnectionBroker, Task, TaskChannel, TaskHandle, wait_for_files,
};
use enginepool_core::{BlockId, BlockStatus, DebugLevel, PoolConfig};
use enginepool_provider::ExecutionProvider;

use crate::error::{PoolError, PoolResult};
use crate::gateway::ProviderGateway;
use crate::launch::{self, LaunchCommand, LaunchSettings};
use crate::registry::{BlockRecord, BlockRegistry};

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Unstarted,
    Starting,
    Active,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolPhase::Unstarted => "unstarted",
            PoolPhase::Starting => "starting",
            PoolPhase::Active => "active",
            PoolPhase::ShuttingDown => "shutting down",
            PoolPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Manages the blocks backing one engine pool.
pub struct ElasticPoolManager {
    config: PoolConfig,
    debug_level: Option<DebugLevel>,
    gateway: Option<ProviderGateway>,
    broker: Arc<dyn ConnectionBroker>,
    connector: Arc<dyn ChannelConnector>,
    /// Serializes every state-changing operation.
    ops: Mutex<()>,
    phase: RwLock<PoolPhase>,
    registry: RwLock<BlockRegistry>,
    launch: RwLock<Option<LaunchCommand>>,
    channel: RwLock<Option<Arc<dyn TaskChannel>>>,
    scaling_enabled: AtomicBool,
}

impl ElasticPoolManager {
    /// Create a pool without a provider. Fails on invalid configuration.
    pub fn new(
        config: PoolConfig,
        broker: Arc<dyn ConnectionBroker>,
        connector: Arc<dyn ChannelConnector>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let debug_level = config.debug_level()?;

        Ok(Self {
            config,
            debug_level,
            gateway: None,
            broker,
            connector,
            ops: Mutex::new(()),
            phase: RwLock::new(PoolPhase::Unstarted),
            registry: RwLock::new(BlockRegistry::new()),
            launch: RwLock::new(None),
            channel: RwLock::new(None),
            scaling_enabled: AtomicBool::new(false),
        })
    }

    /// Attach the execution provider blocks are requested from.
    pub fn with_provider(mut self, provider: Arc<dyn ExecutionProvider>) -> Self {
        self.gateway = Some(ProviderGateway::new(provider));
        self
    }

    /// Start the broker, compose the launch command, connect the task
    /// channel and request the provider's initial blocks.
    ///
    /// On failure the pool stays in `Starting`; call `shutdown()` to release
    /// the broker and any blocks already submitted.
    pub async fn start(&self) -> PoolResult<()> {
        let _ops = self.ops.lock().await;
        self.require_phase("start", &[PoolPhase::Unstarted]).await?;
        self.set_phase(PoolPhase::Starting).await;

        self.broker.start().await.map_err(PoolError::Broker)?;
        let client_file = self.broker.client_file();
        let engine_file = self.broker.engine_file();

        let wait = self.config.artifact_wait();
        debug!(client_file = %client_file.display(), wait_secs = wait.as_secs(), "waiting for connection files");
        if !wait_for_files(&[client_file.as_path(), engine_file.as_path()], wait).await {
            debug!("connection file wait expired");
        }
        for path in [&client_file, &engine_file] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                error!(path = %path.display(), "connection file is missing");
                return Err(PoolError::StartupTimeout {
                    path: path.clone(),
                    waited: wait,
                });
            }
        }

        let launch = launch::compose(
            &engine_file,
            &self.config.engine_dir(),
            self.config.container_image.as_deref(),
            &self.launch_settings(),
        )?;
        if let Some(image) = &self.config.container_image {
            info!(label = %self.config.label, %image, "launching engines in container image");
        }
        *self.launch.write().await = Some(launch.clone());

        let channel = self
            .connector
            .connect(&client_file)
            .await
            .map_err(PoolError::Channel)?;
        *self.channel.write().await = Some(channel);

        match &self.gateway {
            Some(gateway) => {
                self.scaling_enabled
                    .store(gateway.scaling_enabled(), Ordering::SeqCst);
                debug!(label = %self.config.label, provider = %gateway.label(), "starting pool with provider");
                if let Some(init_blocks) = gateway.init_blocks()
                    && let Err(e) = self.submit_blocks(gateway, &launch, init_blocks).await
                {
                    error!(provider = %gateway.label(), error = %e, "initial scale out failed");
                    return Err(e);
                }
            }
            None => {
                self.scaling_enabled.store(false, Ordering::SeqCst);
                debug!(label = %self.config.label, "starting pool with no provider");
            }
        }

        self.set_phase(PoolPhase::Active).await;
        info!(
            label = %self.config.label,
            blocks = self.registry.read().await.len(),
            "engine pool active"
        );
        Ok(())
    }

    /// Request `blocks` more blocks from the provider, one at a time.
    ///
    /// The first submission that yields no block id fails the call with
    /// `ScalingFailed`. Blocks submitted before it stay registered.
    pub async fn scale_out(&self, blocks: u32) -> PoolResult<()> {
        let _ops = self.ops.lock().await;
        self.require_phase("scale out", &[PoolPhase::Active]).await?;

        let Some(gateway) = &self.gateway else {
            error!(label = %self.config.label, "no execution provider available");
            return Ok(());
        };
        let Some(launch) = self.launch.read().await.clone() else {
            return Err(PoolError::InvalidState {
                op: "scale out",
                phase: self.phase().await,
            });
        };

        self.submit_blocks(gateway, &launch, blocks).await
    }

    /// Cancel up to `blocks` running blocks, oldest first.
    pub async fn scale_in(&self, blocks: u32) -> PoolResult<()> {
        let _ops = self.ops.lock().await;
        self.require_phase("scale in", &[PoolPhase::Active]).await?;

        let Some(gateway) = &self.gateway else {
            error!(label = %self.config.label, "no execution provider available");
            return Ok(());
        };

        let ids = self.registry.read().await.ids();
        if !ids.is_empty() {
            let statuses = gateway.status(&ids).await?;
            self.registry.write().await.refresh(&statuses);
        }

        let to_kill = self
            .registry
            .read()
            .await
            .select_cancellable(blocks as usize);
        if to_kill.is_empty() {
            debug!(requested = blocks, "no running blocks selected for scale in");
            return Ok(());
        }

        gateway.cancel(&to_kill).await?;

        let mut registry = self.registry.write().await;
        for id in &to_kill {
            registry.remove(id);
        }
        info!(
            provider = %gateway.label(),
            requested = blocks,
            cancelled = to_kill.len(),
            remaining = registry.len(),
            running = registry.count(BlockStatus::Running),
            "scaled in"
        );
        Ok(())
    }

    /// Ask the provider for the status of every known block.
    ///
    /// Empty when no provider is configured.
    pub async fn status(&self) -> PoolResult<HashMap<BlockId, BlockStatus>> {
        let Some(gateway) = &self.gateway else {
            return Ok(HashMap::new());
        };

        let ids = self.registry.read().await.ids();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let reported = gateway.status(&ids).await?;
        let mut registry = self.registry.write().await;
        registry.refresh(&reported);
        Ok(registry
            .snapshot()
            .into_iter()
            .map(|record| (record.id, record.status))
            .collect())
    }

    /// Tear the pool down. Always succeeds and may be called repeatedly.
    ///
    /// The broker is killed rather than asking the task channel to drain:
    /// a graceful channel shutdown can hang even when told not to block.
    /// Outstanding tasks are abandoned. Live blocks are cancelled on a
    /// best-effort basis.
    pub async fn shutdown(&self, block: bool) -> bool {
        let _ops = self.ops.lock().await;
        if self.phase().await == PoolPhase::Stopped {
            debug!(label = %self.config.label, "pool already stopped");
            return true;
        }
        self.set_phase(PoolPhase::ShuttingDown).await;
        debug!(label = %self.config.label, block, "shutdown sequence started");

        let records = self.registry.write().await.clear();
        let live: Vec<BlockId> = records
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id)
            .collect();
        if let Some(gateway) = &self.gateway
            && !live.is_empty()
        {
            match gateway.cancel(&live).await {
                Ok(()) => info!(provider = %gateway.label(), blocks = live.len(), "cancelled blocks"),
                Err(e) => warn!(provider = %gateway.label(), error = %e, "failed to cancel blocks on shutdown"),
            }
        }

        debug!(label = %self.config.label, "closing connection broker");
        if let Err(e) = self.broker.close().await {
            error!(label = %self.config.label, error = %e, "failed to close connection broker");
        }
        *self.channel.write().await = None;

        self.set_phase(PoolPhase::Stopped).await;
        info!(label = %self.config.label, "engine pool stopped");
        true
    }

    // ── Task facade ─────────────────────────────────────────────────

    /// Forward a task to the connected engines.
    pub async fn submit(&self, task: Task) -> PoolResult<TaskHandle> {
        let channel = self.channel("submit").await?;
        channel.submit(task).await.map_err(PoolError::Channel)
    }

    /// Tasks submitted and not yet completed.
    pub async fn outstanding(&self) -> PoolResult<usize> {
        Ok(self.channel("count outstanding tasks").await?.outstanding_count())
    }

    /// Engines currently connected to the task channel.
    pub async fn connected_workers(&self) -> PoolResult<usize> {
        Ok(self
            .channel("count connected workers")
            .await?
            .connected_worker_count())
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Whether scale operations reach a provider. False without one.
    pub fn scaling_enabled(&self) -> bool {
        self.scaling_enabled.load(Ordering::SeqCst)
    }

    /// Whether an outer strategy is expected to drive scaling.
    pub fn is_managed(&self) -> bool {
        self.config.managed
    }

    pub async fn phase(&self) -> PoolPhase {
        *self.phase.read().await
    }

    pub async fn launch_command(&self) -> Option<LaunchCommand> {
        self.launch.read().await.clone()
    }

    /// Registered blocks with their last known status, oldest first.
    pub async fn blocks(&self) -> Vec<BlockRecord> {
        self.registry.read().await.snapshot()
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn submit_blocks(
        &self,
        gateway: &ProviderGateway,
        launch: &LaunchCommand,
        blocks: u32,
    ) -> PoolResult<()> {
        for i in 0..blocks {
            let block = gateway
                .submit(launch.as_str(), self.config.workers_per_block)
                .await?;
            debug!(provider = %gateway.label(), index = i, block = ?block, "launched block");

            let Some(id) = block else {
                return Err(PoolError::ScalingFailed {
                    label: gateway.label().to_string(),
                    reason: format!(
                        "attempt to provision block {} of {blocks} via provider failed",
                        i + 1
                    ),
                });
            };
            self.registry.write().await.record(id);
        }

        if blocks > 0 {
            info!(provider = %gateway.label(), added = blocks, "scaled out");
        }
        Ok(())
    }

    fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            engine_program: self.config.engine_program.clone(),
            debug_level: self.debug_level,
        }
    }

    async fn channel(&self, op: &'static str) -> PoolResult<Arc<dyn TaskChannel>> {
        let channel = self.channel.read().await.clone();
        match channel {
            Some(channel) => Ok(channel),
            None => Err(PoolError::InvalidState {
                op,
                phase: self.phase().await,
            }),
        }
    }

    async fn require_phase(&self, op: &'static str, allowed: &[PoolPhase]) -> PoolResult<()> {
        let phase = self.phase().await;
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(PoolError::InvalidState { op, phase })
        }
    }

    async fn set_phase(&self, phase: PoolPhase) {
        let mut current = self.phase.write().await;
        let from = *current;
        debug!(label = %self.config.label, %from, to = %phase, "pool phase change");
        *current = phase;
    }
}
