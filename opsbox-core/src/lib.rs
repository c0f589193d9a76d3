//! opsbox core library
//!
//! Compose orchestration for unikernel instance sets, and the provider
//! capability layer every instance and volume operation is dispatched
//! through.

pub mod compose;
pub mod config;
pub mod error;
pub mod network;
pub mod observability;
pub mod paths;
pub mod platform;
pub mod provider;

// Re-export commonly used items
pub use compose::{ComposeOrchestrator, ComposeRequest, DownReport, UpReport};
pub use config::{ConfigOverrides, RunConfig, TeardownScope};
pub use error::{OpsboxError, Result};
pub use observability::init as init_observability;
pub use platform::HostInfo;
pub use provider::{
    Context, Instance, InstanceSpec, Provider, ProviderCapabilities, ProviderFactory,
    ProviderResolver, Volume, VolumeSpec, VolumeSupport,
};
