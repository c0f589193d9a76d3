//! Loading a compose definition from disk.

use super::{ComposeFingerprint, ComposeParser, ComposeService};
use crate::config::ConfigOverrides;
use crate::error::{OpsboxError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// File names tried, in order, when no compose file is given.
pub const DEFAULT_FILES: &[&str] = &["compose.yaml", "compose.yml"];

/// A compose file read from disk.
///
/// The raw bytes are kept alongside the parsed services; the fingerprint is
/// taken over the bytes exactly as read.
#[derive(Debug, Clone)]
pub struct ComposeDefinition {
    pub path: PathBuf,
    pub services: Vec<ComposeService>,
    pub overrides: ConfigOverrides,
    raw: Vec<u8>,
}

impl ComposeDefinition {
    /// Read and parse the compose file at `path`, or the default file in the
    /// current directory when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No compose file is found
    /// - The file cannot be read
    /// - The content is invalid (see [`ComposeParser::parse`])
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let cwd = std::env::current_dir().map_err(|e| OpsboxError::IoError {
                    path: PathBuf::from("."),
                    source: e,
                })?;
                Self::default_path(&cwd)?
            }
        };
        info!("Reading compose file from {:?}", path);

        let raw = std::fs::read(&path).map_err(|e| OpsboxError::FileReadError {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        Self::from_bytes(path, raw)
    }

    /// Parse an in-memory definition.
    pub fn from_bytes(path: impl Into<PathBuf>, raw: Vec<u8>) -> Result<Self> {
        let spec = ComposeParser::parse_bytes(&raw)?;
        Ok(Self { path: path.into(), services: spec.services, overrides: spec.overrides, raw })
    }

    /// Find the default compose file in `dir`.
    pub fn default_path(dir: &Path) -> Result<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
            .ok_or_else(|| OpsboxError::ComposeNotFound {
                searched: DEFAULT_FILES
                    .iter()
                    .map(|name| dir.join(name).display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn fingerprint(&self) -> ComposeFingerprint {
        ComposeFingerprint::of(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stack.txt");
        std::fs::write(&path, "svc-a\nsvc-b\n").unwrap();

        let def = ComposeDefinition::load(Some(&path)).unwrap();
        assert_eq!(def.services.len(), 2);
        assert_eq!(def.raw(), b"svc-a\nsvc-b\n");
        assert_eq!(def.fingerprint(), ComposeFingerprint::of(b"svc-a\nsvc-b\n"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ComposeDefinition::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, OpsboxError::FileReadError { .. }));
    }

    #[test]
    fn test_default_path_prefers_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("compose.yml"), "a\n").unwrap();
        assert_eq!(ComposeDefinition::default_path(dir.path()).unwrap(), dir.path().join("compose.yml"));

        std::fs::write(dir.path().join("compose.yaml"), "b\n").unwrap();
        assert_eq!(
            ComposeDefinition::default_path(dir.path()).unwrap(),
            dir.path().join("compose.yaml")
        );
    }

    #[test]
    fn test_default_path_not_found() {
        let dir = TempDir::new().unwrap();
        match ComposeDefinition::default_path(dir.path()) {
            Err(OpsboxError::ComposeNotFound { searched }) => {
                assert!(searched.contains("compose.yaml"));
                assert!(searched.contains("compose.yml"));
            }
            other => panic!("Expected ComposeNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_definition() {
        assert!(ComposeDefinition::from_bytes("c", b"# nothing here\n\n".to_vec()).is_err());
    }
}
