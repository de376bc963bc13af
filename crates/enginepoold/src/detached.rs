//! Task channel for a pool run without a client attached.
//!
//! The daemon only manages blocks; tasks are submitted by clients that
//! connect to the controller with its client file. Submissions through the
//! daemon are refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use enginepool_broker::{ChannelConnector, Task, TaskChannel, TaskHandle};

pub struct DetachedConnector;

#[async_trait::async_trait]
impl ChannelConnector for DetachedConnector {
    async fn connect(&self, client_file: &Path) -> anyhow::Result<Arc<dyn TaskChannel>> {
        debug!(client_file = %client_file.display(), "pool running detached from clients");
        Ok(Arc::new(DetachedChannel {
            client_file: client_file.to_path_buf(),
        }))
    }
}

struct DetachedChannel {
    client_file: PathBuf,
}

#[async_trait::async_trait]
impl TaskChannel for DetachedChannel {
    async fn submit(&self, task: Task) -> anyhow::Result<TaskHandle> {
        anyhow::bail!(
            "cannot submit task '{}': enginepoold accepts no tasks, connect a client using {}",
            task.name,
            self.client_file.display()
        )
    }

    fn outstanding_count(&self) -> usize {
        0
    }

    fn connected_worker_count(&self) -> usize {
        0
    }
}
