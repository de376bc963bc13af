//! Local provider: runs each block as a child process group on this host.
//!
//! Every block is one `<shell> -c <script>` invocation in its own process
//! group. The script starts `workers_per_block` copies of the launch
//! command and waits for them, so cancelling the group stops every engine
//! in the block. Cancelled blocks are reaped and forgotten.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use enginepool_core::{BlockId, BlockStatus, LocalProviderConfig};

use crate::provider::ExecutionProvider;

/// How long a cancelled block may take to exit before it is killed.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// A block launched by this provider.
struct LocalBlock {
    child: Child,
    job_name: String,
}

pub struct LocalProvider {
    config: LocalProviderConfig,
    blocks: Mutex<HashMap<BlockId, LocalBlock>>,
    next_id: AtomicU64,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self {
            config,
            blocks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of blocks launched and not yet cancelled.
    pub async fn live_blocks(&self) -> usize {
        self.blocks.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ExecutionProvider for LocalProvider {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn scaling_enabled(&self) -> bool {
        self.config.scaling_enabled
    }

    fn init_blocks(&self) -> Option<u32> {
        self.config.init_blocks
    }

    async fn submit(
        &self,
        command: &str,
        workers_per_block: u32,
    ) -> anyhow::Result<Option<BlockId>> {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let block_id = BlockId::new(seq.to_string());
        let job_name = format!("{}.{}", self.config.label, seq);
        let script = wrap_workers(command, workers_per_block);

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&script)
            .env("JOBNAME", &job_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!("failed to spawn {} for {job_name}: {e}", self.config.shell)
        })?;

        info!(
            provider = %self.config.label,
            block = %block_id,
            %job_name,
            pid = child.id(),
            workers = workers_per_block,
            "launched local block"
        );

        self.blocks.lock().await.insert(
            block_id.clone(),
            LocalBlock { child, job_name },
        );
        Ok(Some(block_id))
    }

    async fn status(&self, block_ids: &[BlockId]) -> anyhow::Result<HashMap<BlockId, BlockStatus>> {
        let mut blocks = self.blocks.lock().await;
        let mut statuses = HashMap::with_capacity(block_ids.len());

        for id in block_ids {
            let Some(block) = blocks.get_mut(id) else {
                continue;
            };
            let status = match block.child.try_wait() {
                Ok(None) => BlockStatus::Running,
                Ok(Some(exit)) if exit.success() => BlockStatus::Completed,
                Ok(Some(exit)) => {
                    debug!(block = %id, job_name = %block.job_name, %exit, "local block exited");
                    BlockStatus::Failed
                }
                Err(e) => {
                    warn!(block = %id, error = %e, "failed to poll local block");
                    BlockStatus::Failed
                }
            };
            statuses.insert(id.clone(), status);
        }

        Ok(statuses)
    }

    async fn cancel(&self, block_ids: &[BlockId]) -> anyhow::Result<()> {
        for id in block_ids {
            let Some(mut block) = self.blocks.lock().await.remove(id) else {
                warn!(block = %id, "cancel requested for unknown local block");
                continue;
            };
            if let Err(e) = terminate(&mut block.child) {
                self.blocks.lock().await.insert(id.clone(), block);
                return Err(e);
            }
            reap(&mut block).await;
            info!(provider = %self.config.label, block = %id, job_name = %block.job_name, "cancelled local block");
        }

        Ok(())
    }
}

/// Send SIGTERM to the block's process group, or kill the shell directly
/// when it has already been reaped or on non-unix hosts.
fn terminate(child: &mut Child) -> anyhow::Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; the group id is the child's pid
        // because it was spawned with process_group(0).
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(anyhow::anyhow!("failed to signal process group {pid}: {err}"));
        }
        return Ok(());
    }

    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Wait for a signalled block to exit, killing its shell if it outlives
/// the grace period.
async fn reap(block: &mut LocalBlock) {
    match tokio::time::timeout(CANCEL_GRACE, block.child.wait()).await {
        Ok(Ok(exit)) => debug!(job_name = %block.job_name, %exit, "reaped local block"),
        Ok(Err(e)) => warn!(job_name = %block.job_name, error = %e, "failed to reap local block"),
        Err(_) => {
            warn!(job_name = %block.job_name, "local block ignored SIGTERM, killing");
            if let Err(e) = block.child.kill().await {
                warn!(job_name = %block.job_name, error = %e, "failed to kill local block");
            }
        }
    }
}

/// Wrap a launch command so that one block runs `workers` copies of it.
fn wrap_workers(command: &str, workers: u32) -> String {
    if workers <= 1 {
        return command.to_string();
    }
    format!(
        "launch_engine() {{\n{command}\n}}\n\nfor _ in $(seq 1 {workers}); do\n  launch_engine &\ndone\nwait\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider() -> LocalProvider {
        LocalProvider::new(LocalProviderConfig {
            label: "local-test".to_string(),
            init_blocks: None,
            scaling_enabled: true,
            shell: "sh".to_string(),
        })
    }

    async fn wait_for_status(
        provider: &LocalProvider,
        id: &BlockId,
        expected: BlockStatus,
    ) -> BlockStatus {
        let mut last = BlockStatus::Pending;
        for _ in 0..100 {
            let statuses = provider.status(std::slice::from_ref(id)).await.unwrap();
            last = statuses[id];
            if last == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        last
    }

    #[test]
    fn single_worker_command_is_unchanged() {
        assert_eq!(wrap_workers("echo hi", 1), "echo hi");
    }

    #[test]
    fn multi_worker_command_backgrounds_copies() {
        let script = wrap_workers("echo hi", 3);
        assert!(script.contains("launch_engine() {\necho hi\n}"));
        assert!(script.contains("$(seq 1 3)"));
        assert!(script.trim_end().ends_with("wait"));
    }

    #[tokio::test]
    async fn submitted_blocks_get_distinct_ids() {
        let provider = provider();
        let a = provider.submit("sleep 30", 1).await.unwrap().unwrap();
        let b = provider.submit("sleep 30", 1).await.unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(provider.live_blocks().await, 2);
        provider.cancel(&[a, b]).await.unwrap();
        assert_eq!(provider.live_blocks().await, 0);
    }

    #[tokio::test]
    async fn running_block_can_be_cancelled() {
        let provider = provider();
        let id = provider.submit("sleep 30", 1).await.unwrap().unwrap();

        let statuses = provider.status(std::slice::from_ref(&id)).await.unwrap();
        assert_eq!(statuses[&id], BlockStatus::Running);

        provider.cancel(std::slice::from_ref(&id)).await.unwrap();
        let statuses = provider.status(std::slice::from_ref(&id)).await.unwrap();
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn cancelled_block_is_reaped_and_forgotten() {
        let provider = provider();
        let id = provider.submit("sleep 30", 1).await.unwrap().unwrap();
        let pid = {
            let blocks = provider.blocks.lock().await;
            blocks[&id].child.id().unwrap()
        };

        provider.cancel(std::slice::from_ref(&id)).await.unwrap();

        // Reaped: no zombie is left holding the pid.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        assert_eq!(rc, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ESRCH)
        );
        assert_eq!(provider.live_blocks().await, 0);

        // A second cancel of the same block is a no-op.
        provider.cancel(std::slice::from_ref(&id)).await.unwrap();
    }

    #[tokio::test]
    async fn exit_codes_map_to_terminal_states() {
        let provider = provider();
        let ok = provider.submit("exit 0", 1).await.unwrap().unwrap();
        let bad = provider.submit("exit 3", 1).await.unwrap().unwrap();

        assert_eq!(
            wait_for_status(&provider, &ok, BlockStatus::Completed).await,
            BlockStatus::Completed
        );
        assert_eq!(
            wait_for_status(&provider, &bad, BlockStatus::Failed).await,
            BlockStatus::Failed
        );
    }

    #[tokio::test]
    async fn jobname_is_exported_to_the_block() {
        let provider = provider();
        let id = provider
            .submit("test \"$JOBNAME\" = \"local-test.0\"", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            wait_for_status(&provider, &id, BlockStatus::Completed).await,
            BlockStatus::Completed
        );
    }

    #[tokio::test]
    async fn unknown_blocks_are_omitted_from_status() {
        let provider = provider();
        let statuses = provider.status(&[BlockId::new("nope")]).await.unwrap();
        assert!(statuses.is_empty());
        provider.cancel(&[BlockId::new("nope")]).await.unwrap();
    }
}
