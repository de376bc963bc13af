//! The connection broker seam.

use std::path::{Path, PathBuf};

/// A broker producing the connection files engines and clients use.
#[async_trait::async_trait]
pub trait ConnectionBroker: Send + Sync {
    fn profile(&self) -> &str;

    fn metadata_dir(&self) -> &Path;

    /// Descriptor clients use to connect to the task channel.
    fn client_file(&self) -> PathBuf;

    /// Descriptor engines use to register; embedded in launch commands.
    fn engine_file(&self) -> PathBuf;

    async fn start(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}
