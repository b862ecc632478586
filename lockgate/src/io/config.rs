//! lockgate configuration stored in `lockgate.toml` at the repository root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::lock_service::LockBackend;
use crate::io::mutex::{DEFAULT_MUTEX_NAME, MutexLocation};

pub const CONFIG_FILE_NAME: &str = "lockgate.toml";

/// Repository-level configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the conventions
/// of the `Lock/` protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockgateConfig {
    /// Lock directory, relative to the repository root.
    pub lock_dir: String,

    pub mutex: MutexConfig,
    pub locks: LocksConfig,
    pub guard: GuardConfig,
    pub prune: PruneConfig,
    pub unlock: UnlockConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MutexConfig {
    pub enabled: bool,
    /// Mutex file relative to the repository root. Unset means
    /// `lockgate.lock` inside the worktree's git directory.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocksConfig {
    pub backend: LockBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    /// Path prefixes that ordinary commits must not touch.
    pub protected_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PruneConfig {
    /// Minimum age (days) before a released lock may be pruned.
    pub age_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UnlockConfig {
    /// Age (hours) after which `unlock-stale` releases a blocking lock.
    pub stale_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shell command used as the validation gate when `--test` is not given.
    pub validate_command: Option<String>,
    /// Remote the new branch is pushed to.
    pub remote: String,
    /// Base branch for the PR; the PR tool's default when unset.
    pub base: Option<String>,
    /// PR-creation tool invocation; `--title/--body/--head/--base` are appended.
    pub pr_command: Vec<String>,
}

impl Default for LockgateConfig {
    fn default() -> Self {
        Self {
            lock_dir: "Lock".to_string(),
            mutex: MutexConfig::default(),
            locks: LocksConfig::default(),
            guard: GuardConfig::default(),
            prune: PruneConfig::default(),
            unlock: UnlockConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["Lock/".to_string(), "tmp/".to_string()],
        }
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self { age_days: 30.0 }
    }
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self { stale_hours: 24.0 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validate_command: None,
            remote: "origin".to_string(),
            base: None,
            pr_command: vec!["gh".to_string(), "pr".to_string(), "create".to_string()],
        }
    }
}

impl LockgateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_dir.trim().is_empty() {
            return Err(anyhow!("lock_dir must not be empty"));
        }
        if self
            .guard
            .protected_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
        {
            return Err(anyhow!("guard.protected_prefixes must not contain empty entries"));
        }
        if !self.prune.age_days.is_finite() || self.prune.age_days < 0.0 {
            return Err(anyhow!("prune.age_days must be >= 0"));
        }
        if !self.unlock.stale_hours.is_finite() || self.unlock.stale_hours < 0.0 {
            return Err(anyhow!("unlock.stale_hours must be >= 0"));
        }
        if let Some(path) = &self.mutex.path
            && path.trim().is_empty()
        {
            return Err(anyhow!("mutex.path must not be empty when set"));
        }
        if self.pipeline.remote.trim().is_empty() {
            return Err(anyhow!("pipeline.remote must not be empty"));
        }
        if self.pipeline.pr_command.is_empty() || self.pipeline.pr_command[0].trim().is_empty() {
            return Err(anyhow!("pipeline.pr_command must be a non-empty array"));
        }
        if let Some(command) = &self.pipeline.validate_command
            && command.trim().is_empty()
        {
            return Err(anyhow!("pipeline.validate_command must not be empty when set"));
        }
        Ok(())
    }

    /// Absolute lock directory for `root`.
    pub fn lock_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.lock_dir)
    }

    /// Where the worktree mutex lives for `root`.
    pub fn worktree_mutex(&self, root: &Path) -> MutexLocation {
        if !self.mutex.enabled {
            return MutexLocation::Disabled;
        }
        match &self.mutex.path {
            Some(path) => MutexLocation::Path(root.join(path.trim())),
            None => MutexLocation::GitDir(DEFAULT_MUTEX_NAME.to_string()),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LockgateConfig::default()`.
pub fn load_config(path: &Path) -> Result<LockgateConfig> {
    if !path.exists() {
        let cfg = LockgateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LockgateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
