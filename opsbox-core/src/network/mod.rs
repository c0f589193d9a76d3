//! Private interconnect for compose sets.
//!
//! Each compose set gets one host bridge (`br-ops<N>`), and each member
//! instance gets a TAP device enslaved to it. The orchestrator only talks to
//! the [`Interconnect`] trait; [`IpRouteInterconnect`] drives iproute2.

#[cfg(target_os = "linux")]
mod iproute;

#[cfg(target_os = "linux")]
pub use iproute::IpRouteInterconnect;

use crate::error::Result;
use std::sync::Arc;
use tracing::{info, instrument};

/// Prefix of every bridge created for a compose set.
pub const BRIDGE_PREFIX: &str = "br-ops";

/// Linux interface names are limited to 15 bytes.
pub const MAX_IFNAME_LEN: usize = 15;

/// Host-side network plumbing for a compose set.
#[async_trait::async_trait]
pub trait Interconnect: Send + Sync {
    /// Pick a bridge name not currently present on the host.
    async fn allocate_bridge_name(&self) -> Result<String>;

    /// Create and bring up a bridge. Succeeds if it already exists.
    async fn create_bridge(&self, name: &str) -> Result<()>;

    /// Create a TAP device, bring it up and enslave it to `bridge`.
    async fn create_tap(&self, tap: &str, bridge: &str) -> Result<()>;

    /// Remove a bridge and every TAP device enslaved to it.
    ///
    /// Succeeds if the bridge no longer exists.
    async fn remove(&self, bridge: &str) -> Result<()>;
}

/// Lowest-numbered `br-ops<N>` not in `existing`.
pub fn next_bridge_name<S: AsRef<str>>(existing: &[S]) -> String {
    let taken: Vec<u32> = existing
        .iter()
        .filter_map(|name| name.as_ref().strip_prefix(BRIDGE_PREFIX))
        .filter_map(|n| n.parse().ok())
        .collect();

    let n = (0..).find(|n| !taken.contains(n)).unwrap_or_default();
    format!("{}{}", BRIDGE_PREFIX, n)
}

/// TAP device name for the `index`th member of a compose set.
///
/// Built from the first 8 hex characters of the fingerprint so devices of
/// different compose sets never collide.
pub fn tap_name(fingerprint_hex: &str, index: usize) -> String {
    let prefix: String = fingerprint_hex.chars().take(8).collect();
    format!("tap{}{}", prefix, index)
}

/// Create the interconnect for the current host.
///
/// Returns `None` where the host has no bridge networking.
#[instrument]
pub fn create_interconnect() -> Option<Arc<dyn Interconnect>> {
    #[cfg(target_os = "linux")]
    {
        info!("Creating iproute2 interconnect");
        Some(Arc::new(IpRouteInterconnect))
    }

    #[cfg(not(target_os = "linux"))]
    {
        info!("No interconnect on this platform");
        None
    }
}
