//! Error types for opsbox.
//!
//! All errors use `thiserror` so call sites can decide fatal-vs-logged on a
//! concrete variant instead of a string.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for opsbox operations.
pub type Result<T> = std::result::Result<T, OpsboxError>;

/// Main error type for opsbox.
#[derive(Error, Debug)]
pub enum OpsboxError {
    // Platform gate
    #[error("{feature} is only enabled if you have the {component} compiled in ({platform} host)")]
    ComponentMissing { feature: String, component: String, platform: String },

    // Provider resolution
    #[error("Unknown provider '{name}'. Valid options: {valid}")]
    UnknownProvider { name: String, valid: String },

    #[error("Provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    ProviderRequest { provider: String, reason: String },

    // Instance errors
    #[error("Instance not found: {name}")]
    InstanceNotFound { name: String },

    #[error("Failed to create instance {name}: {reason}")]
    InstanceCreateFailed { name: String, reason: String },

    #[error("Failed to delete instance {name}: {source}")]
    InstanceDeleteFailed {
        name: String,
        #[source]
        source: Box<OpsboxError>,
    },

    // Volume errors
    #[error("Volume not found: {name}")]
    VolumeNotFound { name: String },

    #[error("Volume already exists: {name}")]
    VolumeAlreadyExists { name: String },

    #[error("Volume {name} is already attached to {instance}")]
    VolumeAlreadyAttached { name: String, instance: String },

    #[error("Volume {name} is not attached to {instance}")]
    VolumeNotAttached { name: String, instance: String },

    // Compose errors
    #[error("Compose file not found. Looked in: {searched}")]
    ComposeNotFound { searched: String },

    #[error("File read error: {path}: {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Compose parse error: {reason}")]
    ComposeParseError { reason: String },

    // State store errors
    #[error("Compose state error at {path:?}: {source}")]
    StateStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Network errors
    #[error("Network bridge setup failed: {reason}")]
    NetworkSetupFailed { reason: String },

    #[error("Failed to create TAP device: {reason}")]
    TapDeviceError { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsboxError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// True when the error reports a resource that is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::InstanceNotFound { .. } | Self::VolumeNotFound { .. } => true,
            Self::InstanceDeleteFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(OpsboxError::InstanceNotFound { name: "a".into() }.is_not_found());
        assert!(OpsboxError::VolumeNotFound { name: "v".into() }.is_not_found());
        assert!(!OpsboxError::Internal("boom".into()).is_not_found());

        let wrapped = OpsboxError::InstanceDeleteFailed {
            name: "a".into(),
            source: Box::new(OpsboxError::InstanceNotFound { name: "a".into() }),
        };
        assert!(wrapped.is_not_found());
    }

    #[test]
    fn test_delete_failure_message_names_instance() {
        let err = OpsboxError::InstanceDeleteFailed {
            name: "svc-b".into(),
            source: Box::new(OpsboxError::Internal("permission denied".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("svc-b"));
        assert!(msg.contains("permission denied"));
    }
}
