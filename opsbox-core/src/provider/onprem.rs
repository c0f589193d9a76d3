//! On-prem provider.
//!
//! Instances are local VMM processes started through a `VmmLauncher`; each
//! one is tracked by a JSON record under `<home>/instances`. Volumes are raw
//! image files under `<home>/volumes` with a JSON metadata file alongside.

use super::{
    Context, Instance, InstanceService, InstanceSpec, InstanceStatus, Provider,
    ProviderCapabilities, Volume, VolumeService, VolumeSpec, VolumeSupport,
};
use crate::error::{OpsboxError, Result};
use crate::paths;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

const MIB: u64 = 1024 * 1024;

/// Starts and stops VMM processes. The process lifecycle itself belongs to
/// the launcher; the provider only keeps records.
#[async_trait]
pub trait VmmLauncher: Send + Sync {
    /// Spawn a VMM for `spec` and return its pid.
    async fn launch(&self, spec: &InstanceSpec) -> Result<u32>;

    /// True when `pid` is alive and is still the VMM launched for `name`.
    async fn is_running(&self, pid: u32, name: &str) -> bool;

    /// Ask the VMM to exit. A process that is already gone is not an error.
    async fn terminate(&self, pid: u32) -> Result<()>;
}

/// Pid usable with `kill`. Zero and values past `i32::MAX` would address a
/// process group instead of a single process.
fn signal_target(pid: u32) -> Option<i32> {
    i32::try_from(pid).ok().filter(|p| *p > 0)
}

/// Whether a process command line belongs to the VMM launched as `binary`
/// for instance `name`.
fn cmdline_matches(args: &[String], binary: &str, name: &str) -> bool {
    let program = Path::new(binary).file_name();
    let launched = args.first().map(|a| Path::new(a).file_name() == program).unwrap_or(false);
    launched && args.windows(2).any(|w| w[0] == "-name" && w[1] == name)
}

#[cfg(target_os = "linux")]
async fn process_cmdline(pid: i32) -> Option<Vec<String>> {
    let raw = tokio::fs::read(format!("/proc/{}/cmdline", pid)).await.ok()?;
    Some(
        raw.split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect(),
    )
}

#[cfg(not(target_os = "linux"))]
async fn process_cmdline(pid: i32) -> Option<Vec<String>> {
    let output =
        Command::new("ps").args(["-o", "command=", "-p", &pid.to_string()]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).split_whitespace().map(str::to_string).collect())
}

/// Launches instances with QEMU.
#[derive(Debug, Clone)]
pub struct QemuLauncher {
    binary: String,
    home: PathBuf,
}

impl QemuLauncher {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let binary = match std::env::consts::ARCH {
            "aarch64" => "qemu-system-aarch64",
            _ => "qemu-system-x86_64",
        };
        Self { binary: binary.to_string(), home: home.into() }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn image_path(&self, image: &str) -> PathBuf {
        let direct = PathBuf::from(image);
        if direct.is_absolute() {
            direct
        } else {
            paths::images_dir(&self.home).join(image)
        }
    }

    /// Build the QEMU argument list for `spec`.
    pub fn args(&self, spec: &InstanceSpec) -> Vec<String> {
        let log = paths::instances_dir(&self.home).join(format!("{}.log", spec.name));
        let mut args = vec![
            "-name".to_string(),
            spec.name.clone(),
            "-m".to_string(),
            spec.memory_mb.to_string(),
            "-smp".to_string(),
            spec.cpus.max(1).to_string(),
            "-kernel".to_string(),
            spec.kernel.clone(),
            "-drive".to_string(),
            format!("file={},format=raw,if=virtio", self.image_path(&spec.image).display()),
            "-display".to_string(),
            "none".to_string(),
            "-serial".to_string(),
            format!("file:{}", log.display()),
            "-no-reboot".to_string(),
        ];

        let netdev = match &spec.tap {
            Some(tap) => format!("tap,id=n0,ifname={},script=no,downscript=no", tap),
            None => {
                let mut user = "user,id=n0".to_string();
                for port in &spec.ports {
                    user.push_str(&format!(",hostfwd=tcp::{}-:{}", port, port));
                }
                user
            }
        };
        args.extend(["-netdev".to_string(), netdev]);
        args.extend(["-device".to_string(), "virtio-net-pci,netdev=n0".to_string()]);
        args
    }
}

#[async_trait]
impl VmmLauncher for QemuLauncher {
    #[instrument(skip(self, spec), fields(instance = %spec.name))]
    async fn launch(&self, spec: &InstanceSpec) -> Result<u32> {
        let args = self.args(spec);
        debug!(binary = %self.binary, ?args, "Spawning VMM");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| OpsboxError::InstanceCreateFailed {
            name: spec.name.clone(),
            reason: format!("Failed to spawn {}: {}", self.binary, e),
        })?;

        child.id().ok_or_else(|| OpsboxError::InstanceCreateFailed {
            name: spec.name.clone(),
            reason: "VMM exited immediately".to_string(),
        })
    }

    async fn is_running(&self, pid: u32, name: &str) -> bool {
        let Some(pid) = signal_target(pid) else {
            return false;
        };
        match process_cmdline(pid).await {
            Some(args) => cmdline_matches(&args, &self.binary, name),
            None => false,
        }
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let target = signal_target(pid)
            .ok_or_else(|| OpsboxError::Internal(format!("Refusing to signal pid {}", pid)))?;

        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(target as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(OpsboxError::Internal(format!(
                        "Failed to signal pid {}: {}",
                        pid, err
                    )));
                }
            }
        }

        #[cfg(not(unix))]
        let _ = target;

        Ok(())
    }
}

/// Persisted instance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    pid: u32,
    spec: InstanceSpec,
    created_at: SystemTime,
}

impl InstanceRecord {
    fn to_instance(&self, alive: bool) -> Instance {
        Instance {
            name: self.spec.name.clone(),
            id: self.pid.to_string(),
            image: self.spec.image.clone(),
            status: if alive { InstanceStatus::Running } else { InstanceStatus::Stopped },
            ip: None,
            labels: self.spec.labels.clone(),
            created_at: Some(self.created_at),
        }
    }
}

/// Local VMM backend with real volume support.
pub struct OnPremProvider {
    home: PathBuf,
    launcher: Arc<dyn VmmLauncher>,
}

impl OnPremProvider {
    pub fn new(home: impl Into<PathBuf>, launcher: Arc<dyn VmmLauncher>) -> Self {
        Self { home: home.into(), launcher }
    }

    fn instance_path(&self, name: &str) -> PathBuf {
        paths::instances_dir(&self.home).join(format!("{}.json", name))
    }

    fn volume_meta_path(&self, name: &str) -> PathBuf {
        paths::volumes_dir(&self.home).join(format!("{}.json", name))
    }

    fn volume_image_path(&self, name: &str) -> PathBuf {
        paths::volumes_dir(&self.home).join(format!("{}.raw", name))
    }

    async fn read_instance(&self, name: &str) -> Result<InstanceRecord> {
        validate_name(name)?;
        read_json(&self.instance_path(name))
            .await?
            .ok_or_else(|| OpsboxError::InstanceNotFound { name: name.to_string() })
    }

    async fn remove_instance_record(&self, name: &str) -> Result<()> {
        let path = self.instance_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OpsboxError::IoError { path, source: e }),
        }
    }

    async fn read_volume(&self, name: &str) -> Result<Volume> {
        validate_name(name)?;
        read_json(&self.volume_meta_path(name))
            .await?
            .ok_or_else(|| OpsboxError::VolumeNotFound { name: name.to_string() })
    }
}

#[async_trait]
impl InstanceService for OnPremProvider {
    #[instrument(skip(self, _ctx, spec), fields(instance = %spec.name))]
    async fn create_instance(&self, _ctx: &Context, spec: &InstanceSpec) -> Result<Instance> {
        validate_name(&spec.name)?;
        let path = self.instance_path(&spec.name);
        if path.exists() {
            return Err(OpsboxError::InstanceCreateFailed {
                name: spec.name.clone(),
                reason: "instance already exists".to_string(),
            });
        }

        let pid = self.launcher.launch(spec).await?;
        let record = InstanceRecord { pid, spec: spec.clone(), created_at: SystemTime::now() };
        write_json(&path, &record).await?;

        info!(pid, "Instance launched");
        Ok(record.to_instance(true))
    }

    #[instrument(skip(self, _ctx))]
    async fn list_instances(&self, _ctx: &Context) -> Result<Vec<Instance>> {
        let records: Vec<InstanceRecord> =
            read_json_dir(&paths::instances_dir(&self.home)).await?;
        let mut instances = Vec::with_capacity(records.len());
        for record in &records {
            let alive = self.launcher.is_running(record.pid, &record.spec.name).await;
            instances.push(record.to_instance(alive));
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_instance(&self, _ctx: &Context, name: &str) -> Result<()> {
        let record = self.read_instance(name).await?;

        // The pid may have been reused since launch; never signal a process
        // that is not our VMM.
        if !self.launcher.is_running(record.pid, name).await {
            warn!(pid = record.pid, "VMM is no longer running, dropping stale record");
            self.remove_instance_record(name).await?;
            return Err(OpsboxError::InstanceNotFound { name: name.to_string() });
        }

        self.launcher.terminate(record.pid).await?;
        self.remove_instance_record(name).await?;

        info!(pid = record.pid, "Instance deleted");
        Ok(())
    }
}

#[async_trait]
impl VolumeService for OnPremProvider {
    #[instrument(skip(self, _ctx, spec), fields(volume = %spec.name, size_mb = spec.size_mb))]
    async fn create_volume(
        &self,
        _ctx: &Context,
        spec: &VolumeSpec,
        data: &str,
        provider: &str,
    ) -> Result<Volume> {
        validate_name(&spec.name)?;
        let wanted = spec.size_mb.checked_mul(MIB).ok_or_else(|| OpsboxError::InvalidConfig {
            reason: format!("Volume size {} MB is too large", spec.size_mb),
        })?;

        let meta_path = self.volume_meta_path(&spec.name);
        if meta_path.exists() {
            return Err(OpsboxError::VolumeAlreadyExists { name: spec.name.clone() });
        }

        let dir = paths::volumes_dir(&self.home);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OpsboxError::IoError { path: dir.clone(), source: e })?;

        let image = self.volume_image_path(&spec.name);
        if !data.is_empty() {
            tokio::fs::copy(data, &image)
                .await
                .map_err(|e| OpsboxError::IoError { path: PathBuf::from(data), source: e })?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&image)
            .await
            .map_err(|e| OpsboxError::IoError { path: image.clone(), source: e })?;
        let current = file
            .metadata()
            .await
            .map_err(|e| OpsboxError::IoError { path: image.clone(), source: e })?
            .len();
        if wanted > current {
            file.set_len(wanted)
                .await
                .map_err(|e| OpsboxError::IoError { path: image.clone(), source: e })?;
        }

        let volume = Volume {
            id: spec.name.clone(),
            name: spec.name.clone(),
            label: spec.label.clone(),
            size_mb: wanted.max(current) / MIB,
            path: Some(image),
            attached_to: None,
            attach_slot: None,
            created_at: Some(SystemTime::now()),
        };
        write_json(&meta_path, &volume).await?;

        info!(provider, "Volume created");
        Ok(volume)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_volumes(&self, _ctx: &Context) -> Result<Vec<Volume>> {
        let mut volumes: Vec<Volume> = read_json_dir(&paths::volumes_dir(&self.home)).await?;
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_volume(&self, _ctx: &Context, name: &str) -> Result<()> {
        let volume = self.read_volume(name).await?;
        if let Some(instance) = volume.attached_to {
            return Err(OpsboxError::VolumeAlreadyAttached { name: name.to_string(), instance });
        }

        for path in [self.volume_image_path(name), self.volume_meta_path(name)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(OpsboxError::IoError { path, source: e }),
            }
        }

        info!("Volume deleted");
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    async fn attach_volume(
        &self,
        _ctx: &Context,
        instance: &str,
        volume: &str,
        slot: u32,
    ) -> Result<()> {
        self.read_instance(instance).await?;
        let mut vol = self.read_volume(volume).await?;

        match &vol.attached_to {
            Some(current) if current == instance => {
                debug!("Volume already attached to this instance");
                return Ok(());
            }
            Some(current) => {
                return Err(OpsboxError::VolumeAlreadyAttached {
                    name: volume.to_string(),
                    instance: current.clone(),
                });
            }
            None => {}
        }

        vol.attached_to = Some(instance.to_string());
        vol.attach_slot = Some(slot);
        write_json(&self.volume_meta_path(volume), &vol).await?;

        info!("Volume attached");
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    async fn detach_volume(&self, _ctx: &Context, instance: &str, volume: &str) -> Result<()> {
        let mut vol = self.read_volume(volume).await?;
        if vol.attached_to.as_deref() != Some(instance) {
            return Err(OpsboxError::VolumeNotAttached {
                name: volume.to_string(),
                instance: instance.to_string(),
            });
        }

        vol.attached_to = None;
        vol.attach_slot = None;
        write_json(&self.volume_meta_path(volume), &vol).await?;

        info!("Volume detached");
        Ok(())
    }
}

impl Provider for OnPremProvider {
    fn name(&self) -> &str {
        "onprem"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { volumes: VolumeSupport::Native }
    }
}

/// Names end up as file names; keep them to a single path component.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(OpsboxError::InvalidConfig { reason: format!("Invalid name '{}'", name) });
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OpsboxError::IoError { path: path.to_path_buf(), source: e }),
    };
    serde_json::from_slice(&content).map(Some).map_err(|e| {
        OpsboxError::Internal(format!("Corrupt record {}: {}", path.display(), e))
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| OpsboxError::IoError { path: parent.to_path_buf(), source: e })?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(OpsboxError::internal)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| OpsboxError::IoError { path: path.to_path_buf(), source: e })
}

/// Read every `*.json` record in `dir`. Unreadable records are skipped.
async fn read_json_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OpsboxError::IoError { path: dir.to_path_buf(), source: e }),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| OpsboxError::IoError { path: dir.to_path_buf(), source: e })?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }
    Ok(records)
}
