//! Provider factory.
//!
//! Resolves the active backend once per invocation from the run
//! configuration's `target`.

use super::{DigitalOceanProvider, OnPremProvider, Provider, QemuLauncher};
use crate::config::RunConfig;
use crate::error::{OpsboxError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

const VALID_TARGETS: &str = "onprem, digitalocean";

/// Resolves the provider for a fully merged run configuration.
///
/// The compose `config:` section may change the target, so the orchestrator
/// resolves its provider only after the definition is loaded.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, config: &RunConfig) -> Result<Arc<dyn Provider>>;
}

/// Factory for creating providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderResolver for ProviderFactory {
    fn resolve(&self, config: &RunConfig) -> Result<Arc<dyn Provider>> {
        Self::create(config)
    }
}

impl ProviderFactory {
    /// Create the provider named by `config.target`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The target names no known backend
    /// - The backend's credentials are missing
    #[instrument(skip(config), fields(target = %config.target))]
    pub fn create(config: &RunConfig) -> Result<Arc<dyn Provider>> {
        match config.target.as_str() {
            "onprem" | "" => {
                let launcher = Arc::new(QemuLauncher::new(&config.home));
                info!("Using on-prem provider");
                Ok(Arc::new(OnPremProvider::new(&config.home, launcher)))
            }
            "digitalocean" | "do" => {
                let token = std::env::var("DIGITALOCEAN_TOKEN").map_err(|_| {
                    OpsboxError::ProviderUnavailable {
                        provider: "digitalocean".to_string(),
                        reason: "DIGITALOCEAN_TOKEN is not set".to_string(),
                    }
                })?;
                let mut provider = DigitalOceanProvider::new(token);
                if let Ok(region) = std::env::var("DIGITALOCEAN_REGION") {
                    provider = provider.with_region(region);
                }
                info!("Using DigitalOcean provider");
                Ok(Arc::new(provider))
            }
            other => Err(OpsboxError::UnknownProvider {
                name: other.to_string(),
                valid: VALID_TARGETS.to_string(),
            }),
        }
    }
}
