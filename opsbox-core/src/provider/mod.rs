//! Provider capability interface.
//!
//! Every virtualization or cloud backend implements two capability groups:
//! - `InstanceService`: create, list and delete running instances
//! - `VolumeService`: create, list, delete, attach and detach block volumes
//!
//! A backend without real block storage implements `VolumeService` as
//! unconditional no-ops that return success with zero values, and reports
//! `VolumeSupport::Unsupported` from `capabilities()`. A non-error
//! `create_volume` therefore does not guarantee a usable volume on every
//! backend; callers that need one must check the capability first.

use crate::config::RunConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

pub mod digitalocean;
mod factory;
pub mod onprem;

pub use digitalocean::DigitalOceanProvider;
pub use factory::{ProviderFactory, ProviderResolver};
pub use onprem::{OnPremProvider, QemuLauncher, VmmLauncher};

/// Per-invocation context handed to every provider call.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: RunConfig,
}

impl Context {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }
}

/// Observed state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Pending,
    #[default]
    Unknown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Pending => write!(f, "pending"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A provider-reported instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Name used to address the instance in `delete_instance`.
    pub name: String,
    /// Provider-side identifier (pid, droplet id, ...).
    pub id: String,
    pub image: String,
    pub status: InstanceStatus,
    pub ip: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: Option<SystemTime>,
}

impl Instance {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Request to create an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub kernel: String,
    pub memory_mb: u32,
    pub cpus: u32,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// TAP device to attach the instance's NIC to.
    pub tap: Option<String>,
}

/// Request to create a volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size_mb: u64,
    pub label: Option<String>,
}

/// A provider-reported volume. `Volume::default()` is the zero value
/// returned by backends without block storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub label: Option<String>,
    pub size_mb: u64,
    pub path: Option<PathBuf>,
    /// Instance the volume is attached to, if any.
    pub attached_to: Option<String>,
    pub attach_slot: Option<u32>,
    pub created_at: Option<SystemTime>,
}

/// Whether a backend materializes real volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSupport {
    Native,
    /// Volume calls are acknowledged no-ops.
    Unsupported,
}

/// Provider capabilities (for feature detection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub volumes: VolumeSupport,
}

/// Instance capability group.
#[async_trait]
pub trait InstanceService: Send + Sync {
    /// Create and boot an instance.
    async fn create_instance(&self, ctx: &Context, spec: &InstanceSpec) -> Result<Instance>;

    /// List every instance known to the backend.
    async fn list_instances(&self, ctx: &Context) -> Result<Vec<Instance>>;

    /// Delete an instance by name.
    ///
    /// Returns `OpsboxError::InstanceNotFound` when the instance is already gone.
    async fn delete_instance(&self, ctx: &Context, name: &str) -> Result<()>;
}

/// Volume capability group.
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// Create a volume. `data` optionally names a host path whose content
    /// seeds the volume; `provider` is the backend the volume is built for.
    async fn create_volume(
        &self,
        ctx: &Context,
        spec: &VolumeSpec,
        data: &str,
        provider: &str,
    ) -> Result<Volume>;

    async fn list_volumes(&self, ctx: &Context) -> Result<Vec<Volume>>;

    async fn delete_volume(&self, ctx: &Context, name: &str) -> Result<()>;

    async fn attach_volume(
        &self,
        ctx: &Context,
        instance: &str,
        volume: &str,
        slot: u32,
    ) -> Result<()>;

    async fn detach_volume(&self, ctx: &Context, instance: &str, volume: &str) -> Result<()>;
}

/// A complete backend: both capability groups plus identification.
pub trait Provider: InstanceService + VolumeService {
    /// Provider name (for logging and volume creation).
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;
}
