//! Compose up/down against an in-memory provider and interconnect.

use async_trait::async_trait;
use opsbox_core::compose::{ComposeFingerprint, ComposeStore, COMPOSE_LABEL};
use opsbox_core::network::Interconnect;
use opsbox_core::platform::{BuiltComponents, HostPlatform};
use opsbox_core::provider::{InstanceService, VolumeService};
use opsbox_core::{
    ComposeOrchestrator, ComposeRequest, ConfigOverrides, Context, HostInfo, Instance,
    InstanceSpec, OpsboxError, Provider, ProviderCapabilities, ProviderResolver, Result,
    RunConfig, Volume, VolumeSpec, VolumeSupport,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct MockProvider {
    instances: Mutex<Vec<Instance>>,
    specs: Mutex<Vec<InstanceSpec>>,
    calls: Mutex<Vec<String>>,
    fail_delete: Option<String>,
    already_gone: Vec<String>,
    fail_list: bool,
}

impl MockProvider {
    fn with_instances(instances: Vec<Instance>) -> Self {
        Self { instances: Mutex::new(instances), ..Default::default() }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InstanceService for MockProvider {
    async fn create_instance(&self, _ctx: &Context, spec: &InstanceSpec) -> Result<Instance> {
        self.record(format!("create:{}", spec.name));
        self.specs.lock().unwrap().push(spec.clone());
        let instance = Instance {
            name: spec.name.clone(),
            id: spec.name.clone(),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            ..Default::default()
        };
        self.instances.lock().unwrap().push(instance.clone());
        Ok(instance)
    }

    async fn list_instances(&self, _ctx: &Context) -> Result<Vec<Instance>> {
        self.record("list".to_string());
        if self.fail_list {
            return Err(OpsboxError::ProviderRequest {
                provider: "mock".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn delete_instance(&self, _ctx: &Context, name: &str) -> Result<()> {
        self.record(format!("delete:{}", name));
        if self.fail_delete.as_deref() == Some(name) {
            return Err(OpsboxError::Internal("permission denied".into()));
        }
        if self.already_gone.iter().any(|n| n == name) {
            return Err(OpsboxError::InstanceNotFound { name: name.to_string() });
        }
        self.instances.lock().unwrap().retain(|i| i.name != name);
        Ok(())
    }
}

#[async_trait]
impl VolumeService for MockProvider {
    async fn create_volume(
        &self,
        _ctx: &Context,
        _spec: &VolumeSpec,
        _data: &str,
        _provider: &str,
    ) -> Result<Volume> {
        Ok(Volume::default())
    }

    async fn list_volumes(&self, _ctx: &Context) -> Result<Vec<Volume>> {
        Ok(Vec::new())
    }

    async fn delete_volume(&self, _ctx: &Context, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn attach_volume(&self, _: &Context, _: &str, _: &str, _: u32) -> Result<()> {
        Ok(())
    }

    async fn detach_volume(&self, _: &Context, _: &str, _: &str) -> Result<()> {
        Ok(())
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { volumes: VolumeSupport::Unsupported }
    }
}

struct SpyResolver {
    provider: Arc<MockProvider>,
    resolved: AtomicUsize,
}

impl SpyResolver {
    fn new(provider: Arc<MockProvider>) -> Arc<Self> {
        Arc::new(Self { provider, resolved: AtomicUsize::new(0) })
    }
}

impl ProviderResolver for SpyResolver {
    fn resolve(&self, _config: &RunConfig) -> Result<Arc<dyn Provider>> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone() as Arc<dyn Provider>)
    }
}

#[derive(Default)]
struct RecordingInterconnect {
    allocations: AtomicUsize,
    bridges: Mutex<Vec<String>>,
    taps: Mutex<Vec<(String, String)>>,
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl Interconnect for RecordingInterconnect {
    async fn allocate_bridge_name(&self) -> Result<String> {
        let n = self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(format!("br-ops{}", n))
    }

    async fn create_bridge(&self, name: &str) -> Result<()> {
        self.bridges.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn create_tap(&self, tap: &str, bridge: &str) -> Result<()> {
        self.taps.lock().unwrap().push((tap.to_string(), bridge.to_string()));
        Ok(())
    }

    async fn remove(&self, bridge: &str) -> Result<()> {
        self.removed.lock().unwrap().push(bridge.to_string());
        Ok(())
    }
}

fn linux() -> HostInfo {
    HostInfo { platform: HostPlatform::Linux, components: BuiltComponents::default() }
}

struct Harness {
    home: TempDir,
    workdir: TempDir,
    provider: Arc<MockProvider>,
    resolver: Arc<SpyResolver>,
    interconnect: Arc<RecordingInterconnect>,
    orchestrator: ComposeOrchestrator,
}

impl Harness {
    fn new(provider: MockProvider, host: HostInfo) -> Self {
        let provider = Arc::new(provider);
        let resolver = SpyResolver::new(provider.clone());
        let interconnect = Arc::new(RecordingInterconnect::default());
        let orchestrator = ComposeOrchestrator::new(
            resolver.clone(),
            Some(interconnect.clone() as Arc<dyn Interconnect>),
            host,
        );
        Self {
            home: TempDir::new().unwrap(),
            workdir: TempDir::new().unwrap(),
            provider,
            resolver,
            interconnect,
            orchestrator,
        }
    }

    fn write_compose(&self, content: &str) -> PathBuf {
        let path = self.workdir.path().join("compose.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn request(&self, file: &Path) -> ComposeRequest {
        let base = RunConfig { home: self.home.path().to_path_buf(), ..RunConfig::default() };
        ComposeRequest::new(base).with_file(file)
    }

    fn store(&self) -> ComposeStore {
        ComposeStore::new(self.home.path())
    }
}

fn labelled(name: &str, fingerprint: &ComposeFingerprint) -> Instance {
    Instance {
        name: name.to_string(),
        labels: HashMap::from([(COMPOSE_LABEL.to_string(), fingerprint.short().to_string())]),
        ..Default::default()
    }
}

fn unlabelled(name: &str) -> Instance {
    Instance { name: name.to_string(), ..Default::default() }
}

#[tokio::test]
async fn test_up_then_down_end_to_end() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\nsvc-b\n");
    let fingerprint = ComposeFingerprint::of(b"svc-a\nsvc-b\n");

    let up = h.orchestrator.up(&h.request(&file)).await.unwrap();
    assert_eq!(up.fingerprint, fingerprint);
    assert_eq!(up.bridge.as_deref(), Some("br-ops0"));
    assert_eq!(
        up.instances,
        vec![
            format!("svc-a-{}", fingerprint.short()),
            format!("svc-b-{}", fingerprint.short()),
        ]
    );
    assert_eq!(h.store().get(&fingerprint).unwrap().as_deref(), Some("br-ops0"));
    assert_eq!(*h.interconnect.bridges.lock().unwrap(), vec!["br-ops0"]);

    let specs = h.provider.specs.lock().unwrap().clone();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].image, "svc-a");
    assert_eq!(specs[0].labels.get(COMPOSE_LABEL).map(String::as_str), Some(fingerprint.short()));
    let taps = h.interconnect.taps.lock().unwrap().clone();
    assert_eq!(taps.len(), 2);
    assert_eq!(specs[0].tap.as_deref(), Some(taps[0].0.as_str()));
    assert!(taps.iter().all(|(_, bridge)| bridge == "br-ops0"));

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert_eq!(down.fingerprint, fingerprint);
    assert_eq!(down.deleted, up.instances);
    assert_eq!(down.bridge_removed.as_deref(), Some("br-ops0"));
    assert_eq!(*h.interconnect.removed.lock().unwrap(), vec!["br-ops0"]);
    assert_eq!(h.store().get(&fingerprint).unwrap(), None);
}

#[tokio::test]
async fn test_down_aborts_on_first_delete_failure() {
    let provider = MockProvider {
        fail_delete: Some("B".to_string()),
        ..MockProvider::with_instances(vec![unlabelled("A"), unlabelled("B"), unlabelled("C")])
    };
    let h = Harness::new(provider, linux());
    let file = h.write_compose("svc-a\n");
    let fingerprint = ComposeFingerprint::of(b"svc-a\n");
    h.store().put(&fingerprint, "br-ops0").unwrap();

    let request = h
        .request(&file)
        .with_flags(ConfigOverrides { all_instances: true, ..Default::default() });
    let err = h.orchestrator.down(&request).await.unwrap_err();

    match &err {
        OpsboxError::InstanceDeleteFailed { name, .. } => assert_eq!(name, "B"),
        other => panic!("Expected InstanceDeleteFailed, got {:?}", other),
    }
    assert!(err.to_string().contains("B"));
    assert_eq!(h.provider.calls(), vec!["list", "delete:A", "delete:B"]);
    assert!(h.interconnect.removed.lock().unwrap().is_empty());
    assert_eq!(h.store().get(&fingerprint).unwrap().as_deref(), Some("br-ops0"));
}

#[tokio::test]
async fn test_gate_blocks_before_any_side_effect() {
    let host = HostInfo { platform: HostPlatform::MacOs, components: BuiltComponents::default() };
    let h = Harness::new(MockProvider::default(), host);
    let file = h.workdir.path().join("compose.yaml");

    let up = h.orchestrator.up(&h.request(&file)).await.unwrap_err();
    assert!(matches!(up, OpsboxError::ComponentMissing { .. }));
    let down = h.orchestrator.down(&h.request(&file)).await.unwrap_err();
    assert!(matches!(down, OpsboxError::ComponentMissing { .. }));

    assert_eq!(h.resolver.resolved.load(Ordering::SeqCst), 0);
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.interconnect.allocations.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(h.home.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_down_without_record_skips_bridge_teardown() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\n");

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert!(down.deleted.is_empty());
    assert_eq!(down.bridge_removed, None);
    assert!(h.interconnect.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_down_with_unreadable_record_skips_bridge_teardown() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\n");
    let fingerprint = ComposeFingerprint::of(b"svc-a\n");

    // A directory where the record file should be makes the read fail.
    std::fs::create_dir_all(h.store().record_path(&fingerprint)).unwrap();

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert_eq!(down.bridge_removed, None);
    assert!(h.interconnect.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_down_tolerates_not_found() {
    let fingerprint = ComposeFingerprint::of(b"svc-a\nsvc-b\n");
    let provider = MockProvider {
        already_gone: vec!["A".to_string()],
        ..MockProvider::with_instances(vec![
            labelled("A", &fingerprint),
            labelled("B", &fingerprint),
        ])
    };
    let h = Harness::new(provider, linux());
    let file = h.write_compose("svc-a\nsvc-b\n");

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert_eq!(down.skipped_not_found, vec!["A"]);
    assert_eq!(down.deleted, vec!["B"]);
}

#[tokio::test]
async fn test_down_tolerates_list_failure() {
    let provider = MockProvider { fail_list: true, ..Default::default() };
    let h = Harness::new(provider, linux());
    let file = h.write_compose("svc-a\n");
    let fingerprint = ComposeFingerprint::of(b"svc-a\n");
    h.store().put(&fingerprint, "br-ops4").unwrap();

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert!(down.deleted.is_empty());
    assert_eq!(h.provider.calls(), vec!["list"]);
    assert_eq!(down.bridge_removed.as_deref(), Some("br-ops4"));
}

#[tokio::test]
async fn test_down_only_deletes_owned_instances_by_default() {
    let fingerprint = ComposeFingerprint::of(b"svc-a\n");
    let other = ComposeFingerprint::of(b"something-else\n");
    let provider = MockProvider::with_instances(vec![
        labelled("mine", &fingerprint),
        labelled("theirs", &other),
        unlabelled("manual"),
    ]);
    let h = Harness::new(provider, linux());
    let file = h.write_compose("svc-a\n");

    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert_eq!(down.deleted, vec!["mine"]);
    assert_eq!(h.provider.calls(), vec!["list", "delete:mine"]);
}

#[tokio::test]
async fn test_down_all_instances_scope() {
    let fingerprint = ComposeFingerprint::of(b"svc-a\n");
    let provider = MockProvider::with_instances(vec![
        labelled("mine", &fingerprint),
        unlabelled("manual"),
    ]);
    let h = Harness::new(provider, linux());
    let file = h.write_compose("svc-a\n");

    let request = h
        .request(&file)
        .with_flags(ConfigOverrides { all_instances: true, ..Default::default() });
    let down = h.orchestrator.down(&request).await.unwrap();
    assert_eq!(down.deleted, vec!["mine", "manual"]);
}

#[tokio::test]
async fn test_changed_definition_does_not_match_record() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\nsvc-b\n");
    h.orchestrator.up(&h.request(&file)).await.unwrap();

    // Whitespace alone changes the fingerprint.
    let file = h.write_compose("svc-a\nsvc-b\n\n");
    let down = h.orchestrator.down(&h.request(&file)).await.unwrap();
    assert!(down.deleted.is_empty());
    assert_eq!(down.bridge_removed, None);
}

#[tokio::test]
async fn test_up_twice_reuses_recorded_bridge() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\n");

    let first = h.orchestrator.up(&h.request(&file)).await.unwrap();
    let second = h.orchestrator.up(&h.request(&file)).await.unwrap();
    assert_eq!(first.bridge, second.bridge);
    assert_eq!(h.interconnect.allocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_up_without_bridge_networking() {
    let host = HostInfo {
        platform: HostPlatform::MacOs,
        components: BuiltComponents { vmm_daemon: true },
    };
    let h = Harness::new(MockProvider::default(), host);
    let file = h.write_compose("svc-a\n");

    let up = h.orchestrator.up(&h.request(&file)).await.unwrap();
    assert_eq!(up.bridge, None);
    assert_eq!(up.instances.len(), 1);
    assert!(h.provider.specs.lock().unwrap()[0].tap.is_none());
    assert!(!h.store().dir().exists());
}

#[tokio::test]
async fn test_up_merges_configuration_layers() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("services:\n  api: {}\nconfig:\n  memory: 512\n  cpus: 2\n");

    let request = h
        .request(&file)
        .with_flags(ConfigOverrides { memory: Some(1024), ..Default::default() });
    h.orchestrator.up(&request).await.unwrap();

    let spec = h.provider.specs.lock().unwrap()[0].clone();
    assert_eq!(spec.memory_mb, 1024);
    assert_eq!(spec.cpus, 2);
}

#[tokio::test]
async fn test_up_proceeds_without_toolchain_version() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.write_compose("svc-a\n");

    h.orchestrator.up(&h.request(&file)).await.unwrap();

    let spec = h.provider.specs.lock().unwrap()[0].clone();
    assert_eq!(PathBuf::from(spec.kernel), h.home.path().join("kernel.img"));
}

#[tokio::test]
async fn test_up_missing_compose_file() {
    let h = Harness::new(MockProvider::default(), linux());
    let file = h.workdir.path().join("absent.yaml");

    let err = h.orchestrator.up(&h.request(&file)).await.unwrap_err();
    assert!(matches!(err, OpsboxError::FileReadError { .. }));
    assert_eq!(h.resolver.resolved.load(Ordering::SeqCst), 0);
}
