//! Compose state store.
//!
//! One plain-text record per compose fingerprint, holding the name of the
//! bridge created for that compose set:
//!
//! ```text
//! <home>/composes/<sha256-hex>    -> "br-ops0"
//! ```
//!
//! Writes go through a temp file and a rename so a crash never leaves a
//! half-written record. There is no locking; concurrent invocations on the
//! same fingerprint race last-writer-wins.

use super::ComposeFingerprint;
use crate::error::{OpsboxError, Result};
use crate::paths;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Bridge records keyed by compose fingerprint.
#[derive(Debug, Clone)]
pub struct ComposeStore {
    dir: PathBuf,
}

impl ComposeStore {
    /// Store rooted at `<home>/composes`.
    pub fn new(home: &Path) -> Self {
        Self { dir: paths::composes_dir(home) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, fingerprint: &ComposeFingerprint) -> PathBuf {
        self.dir.join(fingerprint.as_hex())
    }

    fn state_error(path: &Path) -> impl FnOnce(std::io::Error) -> OpsboxError + '_ {
        move |source| OpsboxError::StateStore { path: path.to_path_buf(), source }
    }

    /// Record the bridge owned by a compose set, replacing any earlier record.
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint.short()))]
    pub fn put(&self, fingerprint: &ComposeFingerprint, bridge: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(Self::state_error(&self.dir))?;

        let dest = self.record_path(fingerprint);
        let temp_path = dest.with_extension("tmp");

        {
            let mut f = std::fs::File::create(&temp_path).map_err(Self::state_error(&temp_path))?;
            f.write_all(bridge.as_bytes()).map_err(Self::state_error(&temp_path))?;
            f.sync_all().map_err(Self::state_error(&temp_path))?;
        }

        std::fs::rename(&temp_path, &dest).map_err(Self::state_error(&dest))?;
        debug!(bridge, path = %dest.display(), "Recorded compose bridge");
        Ok(())
    }

    /// Bridge recorded for a compose set, if any.
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint.short()))]
    pub fn get(&self, fingerprint: &ComposeFingerprint) -> Result<Option<String>> {
        let path = self.record_path(fingerprint);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let bridge = content.trim();
                Ok((!bridge.is_empty()).then(|| bridge.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OpsboxError::StateStore { path, source: e }),
        }
    }

    /// Delete the record for a compose set. A missing record is not an error.
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint.short()))]
    pub fn remove(&self, fingerprint: &ComposeFingerprint) -> Result<()> {
        let path = self.record_path(fingerprint);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed compose record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OpsboxError::StateStore { path, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let home = TempDir::new().unwrap();
        let store = ComposeStore::new(home.path());
        let fp = ComposeFingerprint::of(b"svc-a\nsvc-b\n");

        assert_eq!(store.get(&fp).unwrap(), None);
        store.put(&fp, "br-ops0").unwrap();
        assert_eq!(store.get(&fp).unwrap().as_deref(), Some("br-ops0"));

        let on_disk = std::fs::read_to_string(home.path().join("composes").join(fp.as_hex()))
            .unwrap();
        assert_eq!(on_disk, "br-ops0");
    }

    #[test]
    fn test_put_replaces_record() {
        let home = TempDir::new().unwrap();
        let store = ComposeStore::new(home.path());
        let fp = ComposeFingerprint::of(b"web\n");

        store.put(&fp, "br-ops0").unwrap();
        store.put(&fp, "br-ops3").unwrap();
        assert_eq!(store.get(&fp).unwrap().as_deref(), Some("br-ops3"));

        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_get_trims_whitespace() {
        let home = TempDir::new().unwrap();
        let store = ComposeStore::new(home.path());
        let fp = ComposeFingerprint::of(b"web\n");

        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.record_path(&fp), "  br-ops1\n").unwrap();
        assert_eq!(store.get(&fp).unwrap().as_deref(), Some("br-ops1"));
    }

    #[test]
    fn test_remove() {
        let home = TempDir::new().unwrap();
        let store = ComposeStore::new(home.path());
        let fp = ComposeFingerprint::of(b"web\n");

        store.remove(&fp).unwrap();
        store.put(&fp, "br-ops0").unwrap();
        store.remove(&fp).unwrap();
        assert_eq!(store.get(&fp).unwrap(), None);
    }

    #[test]
    fn test_records_are_per_fingerprint() {
        let home = TempDir::new().unwrap();
        let store = ComposeStore::new(home.path());
        let a = ComposeFingerprint::of(b"a\n");
        let b = ComposeFingerprint::of(b"b\n");

        store.put(&a, "br-ops0").unwrap();
        assert_eq!(store.get(&b).unwrap(), None);
    }
}
