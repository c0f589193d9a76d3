//! Linux interconnect using the `ip` command.

use super::{next_bridge_name, Interconnect};
use crate::error::{OpsboxError, Result};
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

/// Bridges and TAP devices managed through iproute2.
#[derive(Debug, Clone, Copy)]
pub struct IpRouteInterconnect;

impl IpRouteInterconnect {
    /// Execute an ip command and check for errors.
    async fn exec_ip(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("ip").args(args).output().await.map_err(|e| {
            OpsboxError::NetworkSetupFailed {
                reason: format!("Failed to execute ip command: {}", e),
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("ip {} failed: {}", args.join(" "), stderr.trim());
            return Err(OpsboxError::NetworkSetupFailed { reason: stderr.trim().to_string() });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn link_exists(&self, name: &str) -> Result<bool> {
        let output = Command::new("ip").args(["link", "show", name]).output().await.map_err(
            |e| OpsboxError::NetworkSetupFailed {
                reason: format!("Failed to check link existence: {}", e),
            },
        )?;

        Ok(output.status.success())
    }

    async fn bridge_members(&self, bridge: &str) -> Result<Vec<String>> {
        let output = self.exec_ip(&["-o", "link", "show", "master", bridge]).await?;
        Ok(parse_link_names(&output))
    }
}

/// Interface names from `ip -o link show` output.
///
/// Lines look like `5: tap0@if4: <BROADCAST,...> mtu 1500 ...`.
fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait::async_trait]
impl Interconnect for IpRouteInterconnect {
    #[instrument(skip(self))]
    async fn allocate_bridge_name(&self) -> Result<String> {
        let output = self.exec_ip(&["-o", "link", "show", "type", "bridge"]).await?;
        let name = next_bridge_name(&parse_link_names(&output));
        info!(bridge = %name, "Allocated bridge name");
        Ok(name)
    }

    #[instrument(skip(self), fields(bridge = %name))]
    async fn create_bridge(&self, name: &str) -> Result<()> {
        if self.link_exists(name).await? {
            info!("Bridge {} already exists, skipping creation", name);
            return Ok(());
        }

        self.exec_ip(&["link", "add", "name", name, "type", "bridge"]).await.map_err(|e| {
            OpsboxError::NetworkSetupFailed { reason: format!("Failed to create bridge: {}", e) }
        })?;
        self.exec_ip(&["link", "set", name, "up"]).await.map_err(|e| {
            OpsboxError::NetworkSetupFailed {
                reason: format!("Failed to bring bridge up: {}", e),
            }
        })?;

        info!("Bridge {} created successfully", name);
        metrics::counter!("opsbox_bridge_created_total").increment(1);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_tap(&self, tap: &str, bridge: &str) -> Result<()> {
        self.exec_ip(&["tuntap", "add", "dev", tap, "mode", "tap"]).await.map_err(|e| {
            OpsboxError::TapDeviceError { reason: format!("{}: {}", tap, e) }
        })?;
        self.exec_ip(&["link", "set", "dev", tap, "up"]).await.map_err(|e| {
            OpsboxError::TapDeviceError { reason: format!("bring up {}: {}", tap, e) }
        })?;
        self.exec_ip(&["link", "set", tap, "master", bridge]).await.map_err(|e| {
            OpsboxError::TapDeviceError { reason: format!("attach {} to {}: {}", tap, bridge, e) }
        })?;

        info!("TAP device {} created and attached to {}", tap, bridge);
        metrics::counter!("opsbox_tap_created_total").increment(1);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, bridge: &str) -> Result<()> {
        if !self.link_exists(bridge).await? {
            info!("Bridge {} does not exist, skipping deletion", bridge);
            return Ok(());
        }

        for tap in self.bridge_members(bridge).await? {
            if let Err(e) = self.exec_ip(&["link", "delete", &tap]).await {
                warn!(tap = %tap, error = %e, "Failed to delete TAP device");
            }
        }

        self.exec_ip(&["link", "delete", bridge]).await.map_err(|e| {
            OpsboxError::NetworkSetupFailed { reason: format!("Failed to delete bridge: {}", e) }
        })?;

        info!("Bridge {} deleted successfully", bridge);
        metrics::counter!("opsbox_bridge_deleted_total").increment(1);
        Ok(())
    }
}
