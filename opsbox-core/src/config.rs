//! Run configuration.
//!
//! A `RunConfig` is built fresh for every invocation and passed by value or
//! reference into every orchestrator and provider call. Layers, lowest
//! precedence first: defaults, `<home>/config.json`, the compose file's
//! `config:` section, then command-line flags.

use crate::error::{OpsboxError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Which instances `compose down` deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownScope {
    /// Only instances labelled with the compose fingerprint.
    #[default]
    Owned,
    /// Every instance the provider reports.
    All,
}

/// Configuration for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Provider target ("onprem", "digitalocean").
    pub target: String,
    /// Kernel image path. Empty means "resolve from the current toolchain".
    pub kernel: String,
    pub memory_mb: u32,
    pub cpus: u32,
    pub teardown: TeardownScope,
    pub log_level: String,
    /// State root. Not persisted; always taken from the invocation.
    #[serde(skip)]
    pub home: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: "onprem".to_string(),
            kernel: String::new(),
            memory_mb: 256,
            cpus: 1,
            teardown: TeardownScope::Owned,
            log_level: "info".to_string(),
            home: paths::home_dir(),
        }
    }
}

/// Optional overrides, used both for command-line flags and for the
/// `config:` section of a compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigOverrides {
    pub target: Option<String>,
    pub kernel: Option<String>,
    pub memory: Option<u32>,
    pub cpus: Option<u32>,
    #[serde(skip)]
    pub all_instances: bool,
}

impl RunConfig {
    /// Load the persisted configuration rooted at `home`.
    ///
    /// A missing file yields the defaults.
    pub fn load(home: &Path) -> Result<Self> {
        let path = paths::config_path(home);
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| OpsboxError::InvalidConfig {
                    reason: format!("Failed to read config: {}", e),
                })?;
            serde_json::from_str(&content).map_err(|e| OpsboxError::InvalidConfig {
                reason: format!("Failed to parse config: {}", e),
            })?
        } else {
            Self::default()
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    /// Save configuration to `<home>/config.json`.
    pub fn save(&self) -> Result<()> {
        let path = paths::config_path(&self.home);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OpsboxError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| OpsboxError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(&path, content).map_err(|e| OpsboxError::IoError { path, source: e })
    }

    /// Apply a layer of overrides on top of this configuration.
    pub fn merge(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(target) = &overrides.target {
            self.target = target.clone();
        }
        if let Some(kernel) = &overrides.kernel {
            self.kernel = kernel.clone();
        }
        if let Some(memory) = overrides.memory {
            self.memory_mb = memory;
        }
        if let Some(cpus) = overrides.cpus {
            self.cpus = cpus;
        }
        if overrides.all_instances {
            self.teardown = TeardownScope::All;
        }
        self
    }

    /// Fill in `kernel` from the current toolchain version when unpinned.
    ///
    /// A failure to read the version is logged and resolution proceeds with
    /// an empty version.
    #[instrument(skip(self), fields(home = %self.home.display()))]
    pub fn resolve_kernel(mut self) -> Self {
        if !self.kernel.is_empty() {
            return self;
        }

        let version = match current_version(&self.home) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to resolve current toolchain version");
                String::new()
            }
        };

        self.kernel = paths::kernel_path(&self.home, &version).to_string_lossy().to_string();
        debug!(kernel = %self.kernel, version = %version, "Resolved kernel");
        self
    }
}

/// Read the current toolchain version from `<home>/latest.txt`.
pub fn current_version(home: &Path) -> Result<String> {
    let path = paths::latest_version_path(home);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| OpsboxError::IoError { path: path.clone(), source: e })?;
    let version = content.trim();
    if version.is_empty() {
        return Err(OpsboxError::InvalidConfig {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(version.to_string())
}
