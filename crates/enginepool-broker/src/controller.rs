//! Controller broker: runs the connection broker as a local process.
//!
//! The controller runs as `<program> [args..] --profile=<profile>
//! --ipython-dir=<metadata_dir>` and writes its connection files to
//! `<metadata_dir>/profile_<profile>/security/`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use enginepool_core::PoolConfig;

use crate::broker::ConnectionBroker;

const CLIENT_FILE: &str = "ipcontroller-client.json";
const ENGINE_FILE: &str = "ipcontroller-engine.json";

pub struct ControllerBroker {
    profile: String,
    metadata_dir: PathBuf,
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ControllerBroker {
    pub fn new(profile: impl Into<String>, metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            metadata_dir: metadata_dir.into(),
            program: "ipcontroller".to_string(),
            args: Vec::new(),
            child: Mutex::new(None),
        }
    }

    /// Build the broker described by a pool config.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.broker_profile(), config.broker_metadata_dir())
            .with_program(&config.broker.program, config.broker.args.clone())
    }

    /// Override the controller executable and the arguments placed
    /// before the profile flags.
    pub fn with_program(mut self, program: &str, args: Vec<String>) -> Self {
        self.program = program.to_string();
        self.args = args;
        self
    }

    fn security_dir(&self) -> PathBuf {
        self.metadata_dir
            .join(format!("profile_{}", self.profile))
            .join("security")
    }

    /// Whether the controller process is currently running.
    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionBroker for ControllerBroker {
    fn profile(&self) -> &str {
        &self.profile
    }

    fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    fn client_file(&self) -> PathBuf {
        self.security_dir().join(CLIENT_FILE)
    }

    fn engine_file(&self) -> PathBuf {
        self.security_dir().join(ENGINE_FILE)
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            warn!(profile = %self.profile, "controller already started");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.metadata_dir).await?;

        // Stale connection files from a previous run would satisfy the
        // startup wait before the new controller has written its own.
        for stale in [self.client_file(), self.engine_file()] {
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => debug!(path = %stale.display(), "removed stale connection file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("--profile={}", self.profile))
            .arg(format!("--ipython-dir={}", self.metadata_dir.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn controller {}: {e}", self.program))?;

        info!(
            profile = %self.profile,
            program = %self.program,
            pid = child.id(),
            "controller started"
        );
        *slot = Some(child);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            debug!(profile = %self.profile, "controller not running, nothing to close");
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            info!(profile = %self.profile, %status, "controller had already exited");
            return Ok(());
        }

        child.kill().await?;
        info!(profile = %self.profile, "controller killed");
        Ok(())
    }
}
