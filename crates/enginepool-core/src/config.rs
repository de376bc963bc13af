//! pool.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{DebugLevel, DebugLevelValue};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Label for this pool; also the default broker profile.
    #[serde(default = "default_label")]
    pub label: String,
    /// Run directory holding broker metadata.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Directory for engine logs and artifact copies on the compute side.
    pub engine_dir: Option<PathBuf>,
    /// Launch engines inside this docker image when set.
    pub container_image: Option<String>,
    pub engine_debug_level: Option<DebugLevelValue>,
    #[serde(default = "default_workers_per_block")]
    pub workers_per_block: u32,
    #[serde(default)]
    pub storage_access: Vec<String>,
    /// Whether an outer scaling strategy controls this pool.
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_artifact_wait_secs")]
    pub artifact_wait_secs: u64,
    #[serde(default = "default_engine_program")]
    pub engine_program: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    pub provider: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub profile: Option<String>,
    pub metadata_dir: Option<PathBuf>,
    #[serde(default = "default_broker_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            profile: None,
            metadata_dir: None,
            program: default_broker_program(),
            args: Vec::new(),
        }
    }
}

/// Resource provider selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Local(LocalProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalProviderConfig {
    #[serde(default = "default_provider_label")]
    pub label: String,
    #[serde(default = "default_init_blocks")]
    pub init_blocks: Option<u32>,
    #[serde(default = "default_true")]
    pub scaling_enabled: bool,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            label: default_provider_label(),
            init_blocks: default_init_blocks(),
            scaling_enabled: true,
            shell: default_shell(),
        }
    }
}

fn default_label() -> String {
    "ipp".to_string()
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("runinfo")
}

fn default_workers_per_block() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_artifact_wait_secs() -> u64 {
    120
}

fn default_engine_program() -> String {
    "ipengine".to_string()
}

fn default_broker_program() -> String {
    "ipcontroller".to_string()
}

fn default_provider_label() -> String {
    "local".to_string()
}

fn default_init_blocks() -> Option<u32> {
    Some(1)
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            run_dir: default_run_dir(),
            engine_dir: None,
            container_image: None,
            engine_debug_level: None,
            workers_per_block: default_workers_per_block(),
            storage_access: Vec::new(),
            managed: true,
            artifact_wait_secs: default_artifact_wait_secs(),
            engine_program: default_engine_program(),
            broker: BrokerConfig::default(),
            provider: None,
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check the settings that cannot be expressed in the type system.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.storage_access.len() > 1 {
            return Err(ConfigError::MultipleStorageAccess(self.storage_access.len()));
        }
        if self.workers_per_block == 0 {
            return Err(ConfigError::Invalid {
                field: "workers_per_block",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "label",
                reason: "must not be empty".to_string(),
            });
        }
        self.debug_level()?;
        Ok(())
    }

    pub fn debug_level(&self) -> ConfigResult<Option<DebugLevel>> {
        self.engine_debug_level
            .as_ref()
            .map(DebugLevelValue::resolve)
            .transpose()
    }

    /// Engine directory, defaulting to the last two components of `run_dir`.
    pub fn engine_dir(&self) -> PathBuf {
        if let Some(dir) = &self.engine_dir {
            return dir.clone();
        }
        let tail: Vec<_> = self.run_dir.components().rev().take(2).collect();
        if tail.len() < 2 {
            return self.run_dir.clone();
        }
        tail.into_iter().rev().collect()
    }

    pub fn broker_profile(&self) -> String {
        self.broker
            .profile
            .clone()
            .unwrap_or_else(|| self.label.clone())
    }

    pub fn broker_metadata_dir(&self) -> PathBuf {
        self.broker
            .metadata_dir
            .clone()
            .unwrap_or_else(|| self.run_dir.clone())
    }

    pub fn artifact_wait(&self) -> Duration {
        Duration::from_secs(self.artifact_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config = PoolConfig::from_toml_str("").unwrap();
        assert_eq!(config.label, "ipp");
        assert_eq!(config.workers_per_block, 1);
        assert_eq!(config.artifact_wait(), Duration::from_secs(120));
        assert!(config.managed);
        assert!(config.provider.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
label = "htex"
run_dir = "/tmp/runinfo/000"
container_image = "python:3.12"
engine_debug_level = "DEBUG"
workers_per_block = 4

[broker]
profile = "custom"

[provider]
kind = "local"
init_blocks = 2
"#;
        let config = PoolConfig::from_toml_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.container_image.as_deref(), Some("python:3.12"));
        assert_eq!(config.debug_level().unwrap(), Some(DebugLevel::Debug));
        assert_eq!(config.broker_profile(), "custom");
        assert_eq!(config.broker_metadata_dir(), PathBuf::from("/tmp/runinfo/000"));
        let Some(ProviderConfig::Local(local)) = &config.provider else {
            panic!("expected local provider");
        };
        assert_eq!(local.init_blocks, Some(2));
        assert_eq!(local.shell, "bash");
    }

    #[test]
    fn numeric_debug_level() {
        let config = PoolConfig::from_toml_str("engine_debug_level = 20").unwrap();
        assert_eq!(config.debug_level().unwrap(), Some(DebugLevel::Numeric(20)));
    }

    #[test]
    fn invalid_debug_level_fails_validation() {
        let config = PoolConfig::from_toml_str("engine_debug_level = 25").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDebugLevel(_))
        ));
    }

    #[test]
    fn multiple_storage_access_is_rejected() {
        let config = PoolConfig {
            storage_access: vec!["globus".to_string(), "http".to_string()],
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleStorageAccess(2))
        ));
    }

    #[test]
    fn zero_workers_per_block_is_rejected() {
        let config = PoolConfig {
            workers_per_block: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn engine_dir_defaults_to_run_dir_tail() {
        let config = PoolConfig {
            run_dir: PathBuf::from("/home/user/runinfo/003"),
            ..PoolConfig::default()
        };
        assert_eq!(config.engine_dir(), PathBuf::from("runinfo/003"));

        let config = PoolConfig {
            engine_dir: Some(PathBuf::from("/scratch/engines")),
            ..PoolConfig::default()
        };
        assert_eq!(config.engine_dir(), PathBuf::from("/scratch/engines"));
    }

    #[test]
    fn broker_defaults_follow_pool() {
        let config = PoolConfig::default();
        assert_eq!(config.broker_profile(), "ipp");
        assert_eq!(config.broker_metadata_dir(), PathBuf::from("runinfo"));
        assert_eq!(config.broker.program, "ipcontroller");
    }

    #[test]
    fn from_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = PoolConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn unrecognised_keys_are_ignored() {
        let config = PoolConfig::from_toml_str("working_dir = \"/scratch\"\nlabel = \"x\"").unwrap();
        assert_eq!(config.label, "x");
        config.validate().unwrap();
    }
}
