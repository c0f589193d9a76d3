//! Centralized path configuration for opsbox.
//!
//! Every per-user state path is derived from a single home directory so the
//! CLI, the providers and the compose state store agree on layout:
//!
//! ```text
//! <home>/
//! ├── config.json
//! ├── latest.txt          # current toolchain version
//! ├── <version>/kernel.img
//! ├── composes/<sha256>   # bridge record, plain text
//! ├── images/<name>
//! ├── instances/<name>.json + <name>.log
//! └── volumes/<name>.raw + <name>.json
//! ```

use std::path::{Path, PathBuf};

/// Get the opsbox home directory.
///
/// Resolution order:
/// 1. `OPSBOX_HOME` environment variable
/// 2. `~/.opsbox`
/// 3. `/tmp/.opsbox` when no home directory can be determined
pub fn home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPSBOX_HOME") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".opsbox"))
        .unwrap_or_else(|| PathBuf::from("/tmp/.opsbox"))
}

/// Directory holding one bridge record per compose fingerprint.
pub fn composes_dir(home: &Path) -> PathBuf {
    home.join("composes")
}

/// Directory holding on-prem instance records.
pub fn instances_dir(home: &Path) -> PathBuf {
    home.join("instances")
}

/// Directory holding built unikernel images.
pub fn images_dir(home: &Path) -> PathBuf {
    home.join("images")
}

/// Directory holding on-prem volume images and metadata.
pub fn volumes_dir(home: &Path) -> PathBuf {
    home.join("volumes")
}

/// Persisted configuration file.
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.json")
}

/// File naming the current toolchain version.
pub fn latest_version_path(home: &Path) -> PathBuf {
    home.join("latest.txt")
}

/// Kernel image shipped with a given toolchain version.
pub fn kernel_path(home: &Path, version: &str) -> PathBuf {
    home.join(version).join("kernel.img")
}
