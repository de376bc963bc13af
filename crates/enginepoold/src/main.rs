//! enginepoold: the enginepool daemon.
//!
//! Runs one elastic engine pool described by a `pool.toml`:
//! - Controller broker (connection files)
//! - Execution provider (blocks)
//! - Elastic pool manager
//!
//! # Usage
//!
//! ```text
//! enginepoold run --config pool.toml --blocks 4
//! enginepoold compose --config pool.toml --artifact ~/.ipython/profile_ipp/security/ipcontroller-engine.json
//! ```

mod detached;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use enginepool_broker::ControllerBroker;
use enginepool_core::{BlockStatus, PoolConfig};
use enginepool_manager::{ElasticPoolManager, LaunchSettings, launch};

use crate::detached::DetachedConnector;

#[derive(Parser)]
#[command(name = "enginepoold", about = "enginepool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the pool and keep it running until Ctrl-C.
    Run {
        /// Pool configuration file.
        #[arg(long, default_value = "pool.toml")]
        config: PathBuf,

        /// Total number of blocks to hold once started.
        #[arg(long)]
        blocks: Option<u32>,

        /// Block status log interval in seconds.
        #[arg(long, default_value = "30")]
        status_interval: u64,
    },
    /// Print the launch command a block would run.
    Compose {
        /// Pool configuration file.
        #[arg(long, default_value = "pool.toml")]
        config: PathBuf,

        /// Engine connection file to embed.
        #[arg(long)]
        artifact: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,enginepool=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            blocks,
            status_interval,
        } => run(config, blocks, status_interval).await,
        Command::Compose { config, artifact } => compose(config, artifact),
    }
}

fn load_config(path: &Path) -> anyhow::Result<PoolConfig> {
    let config = PoolConfig::from_file(path)
        .with_context(|| format!("loading pool config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn compose(config_path: PathBuf, artifact: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let settings = LaunchSettings {
        engine_program: config.engine_program.clone(),
        debug_level: config.debug_level()?,
    };
    let command = launch::compose(
        &artifact,
        &config.engine_dir(),
        config.container_image.as_deref(),
        &settings,
    )?;
    print!("{}", command.as_str());
    Ok(())
}

async fn run(config_path: PathBuf, blocks: Option<u32>, status_interval: u64) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    info!(label = %config.label, config = %config_path.display(), "enginepool daemon starting");

    std::fs::create_dir_all(&config.run_dir)
        .with_context(|| format!("creating run dir {}", config.run_dir.display()))?;

    // ── Assemble the pool ──────────────────────────────────────

    let broker = Arc::new(ControllerBroker::from_config(&config));
    let provider = config.provider.as_ref().map(enginepool_provider::from_config);
    if provider.is_none() {
        warn!("no [provider] configured; pool will not scale");
    }

    let mut pool = ElasticPoolManager::new(config, broker, Arc::new(DetachedConnector))?;
    if let Some(provider) = provider {
        info!(provider = %provider.label(), "execution provider configured");
        pool = pool.with_provider(provider);
    }

    if let Err(e) = pool.start().await {
        pool.shutdown(false).await;
        return Err(e.into());
    }

    if let Some(target) = blocks {
        let current = pool.blocks().await.len() as u32;
        let result = if target > current {
            pool.scale_out(target - current).await
        } else {
            pool.scale_in(current - target).await
        };
        if let Err(e) = result {
            warn!(target, current, error = %e, "could not reach block target");
        }
    }

    // ── Steady state ───────────────────────────────────────────

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&pool).await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    pool.shutdown(false).await;
    info!("enginepool daemon stopped");
    Ok(())
}

async fn log_status(pool: &ElasticPoolManager) {
    match pool.status().await {
        Ok(statuses) => {
            let count = |s: BlockStatus| statuses.values().filter(|v| **v == s).count();
            info!(
                label = %pool.label(),
                blocks = statuses.len(),
                running = count(BlockStatus::Running),
                pending = count(BlockStatus::Pending),
                failed = count(BlockStatus::Failed),
                "pool status"
            );
        }
        Err(e) => warn!(label = %pool.label(), error = %e, "status query failed"),
    }
}
