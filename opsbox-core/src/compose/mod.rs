//! Compose sets: definition, fingerprint, state record and orchestration.
//!
//! A compose definition names a set of unikernel services. `up` boots them as
//! a unit on a private bridge; `down` finds them again by the SHA-256 of the
//! definition's bytes and tears them down.

pub mod definition;
pub mod fingerprint;
pub mod orchestrator;
pub mod parser;
pub mod store;
pub mod types;


pub use definition::ComposeDefinition;
pub use fingerprint::ComposeFingerprint;
pub use orchestrator::{ComposeOrchestrator, ComposeRequest, DownReport, UpReport, COMPOSE_LABEL};
pub use parser::ComposeParser;
pub use store::ComposeStore;
pub use types::*;
