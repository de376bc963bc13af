//! Task-submission channel seam.
//!
//! The channel is the transport that carries work to connected engines.
//! The pool treats it as opaque: submit a task, get back a handle that
//! resolves once some engine has produced a result.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A unit of work forwarded to the engine pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub payload: serde_json::Value,
}

impl Task {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

pub type TaskResult = anyhow::Result<serde_json::Value>;

/// Future-like handle for a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: u64,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    /// Create a handle and the sender a channel completes it through.
    pub fn pair(task_id: u64) -> (oneshot::Sender<TaskResult>, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        (tx, TaskHandle { task_id, rx })
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = self.task_id;
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(anyhow::anyhow!("task {task_id} dropped by channel")))
        })
    }
}

/// Connected task channel.
#[async_trait::async_trait]
pub trait TaskChannel: Send + Sync {
    async fn submit(&self, task: Task) -> anyhow::Result<TaskHandle>;

    /// Tasks submitted and not yet completed.
    fn outstanding_count(&self) -> usize;

    /// Engines currently registered with the channel.
    fn connected_worker_count(&self) -> usize;
}

/// Opens a [`TaskChannel`] from the broker's client connection file.
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, client_file: &Path) -> anyhow::Result<Arc<dyn TaskChannel>>;
}
