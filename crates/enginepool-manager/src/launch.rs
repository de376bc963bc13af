//! Launch command composition.
//!
//! Builds the shell script every block runs to bring up its engines. The
//! engine connection file is read once and inlined into the script as a
//! heredoc, so the compute side needs no shared filesystem with the broker.
//!
//! ```text
//! bare:           mkdir → write ipengine.<token>.json → <engine> --file=… >> engine_logs/$JOBNAME.log
//! containerized:  mkdir/cd → write json → docker create/cp/start → trap SIGTERM/SIGINT → wait forever
//! ```
//!
//! `$JOBNAME` is left for the provider's shell to expand at launch time.

use std::path::{Path, PathBuf};

use tracing::{debug, error};
use uuid::Uuid;

use enginepool_core::DebugLevel;

use crate::error::{PoolError, PoolResult};

/// Which template a launch command was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchVariant {
    Bare,
    Containerized,
}

/// A composed launch script, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    script: String,
    variant: LaunchVariant,
    token: String,
}

impl LaunchCommand {
    pub fn as_str(&self) -> &str {
        &self.script
    }

    pub fn variant(&self) -> LaunchVariant {
        self.variant
    }

    /// Unique token naming this command's copy of the connection file.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Engine invocation settings shared by both variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub engine_program: String,
    pub debug_level: Option<DebugLevel>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            engine_program: "ipengine".to_string(),
            debug_level: None,
        }
    }
}

impl LaunchSettings {
    fn debug_option(&self) -> String {
        self.debug_level
            .map(|level| format!(" {}", level.engine_flag()))
            .unwrap_or_default()
    }
}

/// Compose the launch command, containerized when an image is given.
pub fn compose(
    artifact_path: &Path,
    engine_dir: &Path,
    container_image: Option<&str>,
    settings: &LaunchSettings,
) -> PoolResult<LaunchCommand> {
    match container_image {
        Some(image) => compose_containerized(artifact_path, engine_dir, image, settings),
        None => compose_bare(artifact_path, engine_dir, settings),
    }
}

/// Engines run directly on the block, logging to `engine_logs/$JOBNAME.log`.
pub fn compose_bare(
    artifact_path: &Path,
    engine_dir: &Path,
    settings: &LaunchSettings,
) -> PoolResult<LaunchCommand> {
    let engine_json = read_artifact(artifact_path)?;
    let token = Uuid::new_v4().to_string();
    let dir = engine_dir.display();

    let script = format!(
        "mkdir -p {dir}
cat <<'EOF' > {dir}/ipengine.{token}.json
{engine_json}
EOF

mkdir -p '{dir}/engine_logs'
{engine} --file={dir}/ipengine.{token}.json{debug} >> {dir}/engine_logs/$JOBNAME.log 2>&1
",
        engine = settings.engine_program,
        debug = settings.debug_option(),
    );

    debug!(%token, engine_dir = %dir, "composed bare launch command");
    Ok(LaunchCommand {
        script,
        variant: LaunchVariant::Bare,
        token,
    })
}

/// Engines run inside a detached container that the block's shell keeps
/// alive and stops on SIGTERM/SIGINT.
pub fn compose_containerized(
    artifact_path: &Path,
    engine_dir: &Path,
    container_image: &str,
    settings: &LaunchSettings,
) -> PoolResult<LaunchCommand> {
    let engine_json = read_artifact(artifact_path)?;
    let token = Uuid::new_v4().to_string();
    let dir = engine_dir.display();

    let script = format!(
        "mkdir -p {dir}
cd {dir}
cat <<'EOF' > ipengine.{token}.json
{engine_json}
EOF

DOCKER_ID=$(docker create --network host {image} {engine} --file=/tmp/ipengine.{token}.json{debug})
docker cp ipengine.{token}.json $DOCKER_ID:/tmp/ipengine.{token}.json

# Copy current dir to the working directory
DOCKER_CWD=$(docker image inspect --format='{{{{.Config.WorkingDir}}}}' {image})
docker cp -a . $DOCKER_ID:$DOCKER_CWD
docker start $DOCKER_ID

at_exit() {{
  echo \"Caught SIGTERM/SIGINT signal!\"
  docker stop $DOCKER_ID
}}

trap at_exit SIGTERM SIGINT
sleep infinity &
wait $!
",
        image = container_image,
        engine = settings.engine_program,
        debug = settings.debug_option(),
    );

    debug!(%token, image = %container_image, "composed containerized launch command");
    Ok(LaunchCommand {
        script,
        variant: LaunchVariant::Containerized,
        token,
    })
}

fn read_artifact(path: &Path) -> PoolResult<String> {
    let path = expand_home(path);
    std::fs::read_to_string(&path).map_err(|source| {
        error!(path = %path.display(), error = %source, "could not open engine connection file");
        PoolError::ArtifactUnreadable { path, source }
    })
}

/// Expand a leading `~` to `$HOME`.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_JSON: &str = r#"{"url": "tcp://10.0.0.1:55123", "key": "abc$def"}"#;

    fn artifact() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipcontroller-engine.json");
        std::fs::write(&path, ENGINE_JSON).unwrap();
        (dir, path)
    }

    #[test]
    fn bare_command_runs_engine_directly() {
        let (_dir, path) = artifact();
        let cmd = compose(&path, Path::new("runinfo/000"), None, &LaunchSettings::default()).unwrap();

        assert_eq!(cmd.variant(), LaunchVariant::Bare);
        let script = cmd.as_str();
        assert!(script.starts_with("mkdir -p runinfo/000\n"));
        assert!(script.contains(ENGINE_JSON));
        assert!(script.contains(&format!(
            "ipengine --file=runinfo/000/ipengine.{}.json >> runinfo/000/engine_logs/$JOBNAME.log 2>&1",
            cmd.token()
        )));
        assert!(script.contains("mkdir -p 'runinfo/000/engine_logs'"));
        assert!(!script.contains("docker"));
        assert!(!script.contains("trap"));
    }

    #[test]
    fn containerized_command_wraps_engine_in_docker() {
        let (_dir, path) = artifact();
        let cmd = compose(
            &path,
            Path::new("/scratch/engines"),
            Some("python:3.12"),
            &LaunchSettings::default(),
        )
        .unwrap();

        assert_eq!(cmd.variant(), LaunchVariant::Containerized);
        let script = cmd.as_str();
        assert!(script.contains(&format!(
            "docker create --network host python:3.12 ipengine --file=/tmp/ipengine.{}.json)",
            cmd.token()
        )));
        assert!(script.contains("trap at_exit SIGTERM SIGINT"));
        assert!(script.contains("docker stop $DOCKER_ID"));
        assert!(script.contains("--format='{{.Config.WorkingDir}}'"));
        assert!(script.contains("docker cp -a . $DOCKER_ID:$DOCKER_CWD"));
        assert!(script.contains("sleep infinity"));
        assert!(script.contains(ENGINE_JSON));
    }

    #[test]
    fn debug_flag_is_appended() {
        let (_dir, path) = artifact();
        let settings = LaunchSettings {
            engine_program: "/opt/bin/ipengine".to_string(),
            debug_level: Some(DebugLevel::Debug),
        };

        let bare = compose(&path, Path::new("e"), None, &settings).unwrap();
        assert!(bare.as_str().contains(&format!(
            "/opt/bin/ipengine --file=e/ipengine.{}.json --log-level=DEBUG >>",
            bare.token()
        )));

        let boxed = compose(&path, Path::new("e"), Some("img"), &settings).unwrap();
        assert!(boxed.as_str().contains(&format!(
            "--file=/tmp/ipengine.{}.json --log-level=DEBUG)",
            boxed.token()
        )));
    }

    #[test]
    fn consecutive_commands_differ_only_by_token() {
        let (_dir, path) = artifact();
        let settings = LaunchSettings::default();
        let a = compose(&path, Path::new("e"), None, &settings).unwrap();
        let b = compose(&path, Path::new("e"), None, &settings).unwrap();

        assert_ne!(a.token(), b.token());
        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(
            a.as_str().replace(a.token(), "TOKEN"),
            b.as_str().replace(b.token(), "TOKEN")
        );
    }

    #[test]
    fn missing_artifact_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let result = compose(&missing, Path::new("e"), None, &LaunchSettings::default());
        assert!(matches!(
            result,
            Err(PoolError::ArtifactUnreadable { ref path, .. }) if *path == missing
        ));
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_home(Path::new("~/.ipython/engine.json"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expanded, PathBuf::from(home).join(".ipython/engine.json"));
        }
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
