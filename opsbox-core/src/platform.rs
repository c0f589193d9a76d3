//! Platform gate for compose operations.
//!
//! Compose needs the VMM helper daemon on macOS hosts. Builds without it
//! must refuse before any provider, filesystem or network call happens.

use crate::error::{OpsboxError, Result};
use std::fmt;
use tracing::debug;

/// Host operating system, as far as compose cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Other,
}

impl HostPlatform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            _ => Self::Other,
        }
    }

    fn requires_vmm_daemon(self) -> bool {
        matches!(self, Self::MacOs)
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
            Self::Other => write!(f, "{}", std::env::consts::OS),
        }
    }
}

/// Optional components compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuiltComponents {
    pub vmm_daemon: bool,
}

impl BuiltComponents {
    pub fn current() -> Self {
        Self { vmm_daemon: cfg!(feature = "vmm-daemon") }
    }
}

/// What compose may do on this host once the gate has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSupport {
    /// Bridge and tap interconnect is created and reclaimed.
    pub bridge_networking: bool,
}

/// Host facts handed to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub platform: HostPlatform,
    pub components: BuiltComponents,
}

impl HostInfo {
    pub fn current() -> Self {
        Self { platform: HostPlatform::current(), components: BuiltComponents::current() }
    }
}

/// Check that compose can run on `host` with the `built` components.
pub fn check_available(host: HostPlatform, built: BuiltComponents) -> Result<PlatformSupport> {
    if host.requires_vmm_daemon() && !built.vmm_daemon {
        return Err(OpsboxError::ComponentMissing {
            feature: "compose".to_string(),
            component: "VMM daemon".to_string(),
            platform: host.to_string(),
        });
    }

    let support = PlatformSupport { bridge_networking: host == HostPlatform::Linux };
    debug!(platform = %host, ?support, "Platform gate passed");
    Ok(support)
}
