//! Compose orchestrator.
//!
//! Brings a compose set up or down as a unit. Every call walks the same
//! phases: platform gate, resolve (load definition, merge configuration,
//! pick provider), then provision or drain. Instance operations are issued
//! one at a time.

use super::{ComposeDefinition, ComposeFingerprint, ComposeStore};
use crate::config::{ConfigOverrides, RunConfig, TeardownScope};
use crate::error::{OpsboxError, Result};
use crate::network::{tap_name, Interconnect};
use crate::platform::{self, HostInfo, PlatformSupport};
use crate::provider::{Context, InstanceService, InstanceSpec, Provider, ProviderResolver};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Label carrying the short fingerprint of the compose set an instance
/// belongs to.
pub const COMPOSE_LABEL: &str = "opsbox.compose";

/// Inputs to one `up` or `down` invocation.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    /// Explicit compose file. `None` searches the current directory.
    pub compose_file: Option<PathBuf>,
    /// Defaults merged with the persisted configuration.
    pub base: RunConfig,
    /// Command-line flags, applied over the compose file's `config:` section.
    pub flags: ConfigOverrides,
}

impl ComposeRequest {
    pub fn new(base: RunConfig) -> Self {
        Self { compose_file: None, base, flags: ConfigOverrides::default() }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.compose_file = Some(path.into());
        self
    }

    pub fn with_flags(mut self, flags: ConfigOverrides) -> Self {
        self.flags = flags;
        self
    }
}

/// Outcome of a successful `up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    pub fingerprint: ComposeFingerprint,
    pub bridge: Option<String>,
    pub instances: Vec<String>,
}

/// Outcome of a successful `down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownReport {
    pub fingerprint: ComposeFingerprint,
    pub deleted: Vec<String>,
    /// Instances that were already gone when their delete was issued.
    pub skipped_not_found: Vec<String>,
    pub bridge_removed: Option<String>,
}

/// Everything the resolving phase produces.
struct Resolved {
    support: PlatformSupport,
    definition: ComposeDefinition,
    fingerprint: ComposeFingerprint,
    provider: Arc<dyn Provider>,
    ctx: Context,
    store: ComposeStore,
}

/// Drives compose sets through a provider and the host interconnect.
pub struct ComposeOrchestrator {
    providers: Arc<dyn ProviderResolver>,
    interconnect: Option<Arc<dyn Interconnect>>,
    host: HostInfo,
}

impl ComposeOrchestrator {
    pub fn new(
        providers: Arc<dyn ProviderResolver>,
        interconnect: Option<Arc<dyn Interconnect>>,
        host: HostInfo,
    ) -> Self {
        Self { providers, interconnect, host }
    }

    /// Instance name for a compose member: `<service>-<short fingerprint>`.
    pub fn instance_name(service: &str, fingerprint: &ComposeFingerprint) -> String {
        format!("{}-{}", service, fingerprint.short())
    }

    fn resolve(&self, request: &ComposeRequest, pin_kernel: bool) -> Result<Resolved> {
        // Gate before any provider or filesystem access.
        let support = platform::check_available(self.host.platform, self.host.components)?;

        let definition = ComposeDefinition::load(request.compose_file.as_deref())?;
        let mut config = request.base.clone().merge(&definition.overrides).merge(&request.flags);
        if pin_kernel {
            config = config.resolve_kernel();
        }

        let provider = self.providers.resolve(&config)?;
        let fingerprint = definition.fingerprint();
        let store = ComposeStore::new(&config.home);

        info!(
            fingerprint = %fingerprint.short(),
            provider = provider.name(),
            services = definition.services.len(),
            "Resolved compose set"
        );

        Ok(Resolved { support, definition, fingerprint, provider, ctx: Context::new(config), store })
    }

    fn bridge_interconnect(&self, support: PlatformSupport) -> Option<&Arc<dyn Interconnect>> {
        self.interconnect.as_ref().filter(|_| support.bridge_networking)
    }

    /// Bring a compose set up.
    ///
    /// On bridge-capable hosts the bridge record is written before the bridge
    /// or any instance is created, so a later `down` can reclaim networking
    /// even after a partial bring-up. A failure partway through leaves the
    /// already-created instances running.
    #[instrument(skip(self, request), fields(file = ?request.compose_file))]
    pub async fn up(&self, request: &ComposeRequest) -> Result<UpReport> {
        let Resolved { support, definition, fingerprint, provider, ctx, store } =
            self.resolve(request, true)?;

        let bridge = match self.bridge_interconnect(support) {
            Some(interconnect) => {
                let name = match store.get(&fingerprint)? {
                    Some(existing) => {
                        info!(bridge = %existing, "Reusing recorded bridge");
                        existing
                    }
                    None => interconnect.allocate_bridge_name().await?,
                };
                store.put(&fingerprint, &name)?;
                interconnect.create_bridge(&name).await?;
                Some(name)
            }
            None => None,
        };

        let mut instances = Vec::with_capacity(definition.services.len());
        for (index, service) in definition.services.iter().enumerate() {
            let tap = match (&bridge, self.bridge_interconnect(support)) {
                (Some(bridge), Some(interconnect)) => {
                    let tap = tap_name(fingerprint.as_hex(), index);
                    interconnect.create_tap(&tap, bridge).await?;
                    Some(tap)
                }
                _ => None,
            };

            let spec = InstanceSpec {
                name: Self::instance_name(&service.name, &fingerprint),
                image: service.image.clone(),
                kernel: ctx.config.kernel.clone(),
                memory_mb: service.memory.unwrap_or(ctx.config.memory_mb),
                cpus: ctx.config.cpus,
                ports: service.ports.clone(),
                env: service.env.clone(),
                labels: HashMap::from([(
                    COMPOSE_LABEL.to_string(),
                    fingerprint.short().to_string(),
                )]),
                tap,
            };

            info!(service = %service.name, instance = %spec.name, "Creating instance");
            let instance = provider.create_instance(&ctx, &spec).await?;
            instances.push(instance.name);
        }

        metrics::counter!("opsbox_compose_up_total").increment(1);
        info!(fingerprint = %fingerprint.short(), count = instances.len(), "Compose set up");

        Ok(UpReport { fingerprint, bridge, instances })
    }

    /// Bring a compose set down.
    ///
    /// Instances are deleted sequentially. An instance that is already gone
    /// is skipped; any other delete failure aborts the teardown, leaving the
    /// remaining instances and the bridge in place.
    #[instrument(skip(self, request), fields(file = ?request.compose_file))]
    pub async fn down(&self, request: &ComposeRequest) -> Result<DownReport> {
        let Resolved { support, fingerprint, provider, ctx, store, .. } =
            self.resolve(request, false)?;

        let listed = match provider.list_instances(&ctx).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Failed to list instances, assuming none");
                Vec::new()
            }
        };

        let targets: Vec<String> = listed
            .into_iter()
            .filter(|instance| match ctx.config.teardown {
                TeardownScope::All => true,
                TeardownScope::Owned => instance.label(COMPOSE_LABEL) == Some(fingerprint.short()),
            })
            .map(|instance| instance.name)
            .collect();

        info!(count = targets.len(), scope = ?ctx.config.teardown, "Draining compose set");

        let mut deleted = Vec::new();
        let mut skipped_not_found = Vec::new();
        for name in targets {
            match provider.delete_instance(&ctx, &name).await {
                Ok(()) => {
                    metrics::counter!("opsbox_instances_deleted_total").increment(1);
                    deleted.push(name);
                }
                Err(e) if e.is_not_found() => {
                    warn!(instance = %name, "Instance already gone");
                    skipped_not_found.push(name);
                }
                Err(e) => {
                    return Err(OpsboxError::InstanceDeleteFailed { name, source: Box::new(e) });
                }
            }
        }

        let mut bridge_removed = None;
        if let Some(interconnect) = self.bridge_interconnect(support) {
            match store.get(&fingerprint) {
                Ok(Some(bridge)) => match interconnect.remove(&bridge).await {
                    Ok(()) => {
                        if let Err(e) = store.remove(&fingerprint) {
                            warn!(error = %e, "Failed to remove compose record");
                        }
                        bridge_removed = Some(bridge);
                    }
                    Err(e) => warn!(bridge = %bridge, error = %e, "Failed to remove bridge"),
                },
                Ok(None) => info!("No bridge recorded for this compose set"),
                Err(e) => warn!(error = %e, "Failed to read compose record, skipping bridge teardown"),
            }
        }

        metrics::counter!("opsbox_compose_down_total").increment(1);
        info!(deleted = deleted.len(), skipped = skipped_not_found.len(), "Compose set down");

        Ok(DownReport { fingerprint, deleted, skipped_not_found, bridge_removed })
    }
}
