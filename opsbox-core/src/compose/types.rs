//! Compose file format types.

use crate::config::ConfigOverrides;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root structure of a YAML compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Services keyed by name. A bare `name:` entry is allowed.
    #[serde(default)]
    pub services: BTreeMap<String, Option<ServiceDefinition>>,

    /// Run configuration merged under command-line flags.
    #[serde(default)]
    pub config: ConfigOverrides,
}

/// A service entry in a YAML compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    /// Image to boot. Defaults to the service name.
    pub image: Option<String>,

    /// Memory in MB, overriding the run configuration.
    pub memory: Option<u32>,

    /// Ports exposed by the instance.
    pub ports: Vec<u16>,

    /// Environment passed to the VMM.
    pub env: HashMap<String, String>,
}

/// One member of a compose set, after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposeService {
    pub name: String,
    pub image: String,
    pub memory: Option<u32>,
    pub ports: Vec<u16>,
    pub env: HashMap<String, String>,
}

impl ComposeService {
    /// Service booting an image of the same name, with no overrides.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { image: name.clone(), name, ..Default::default() }
    }

    pub(crate) fn from_definition(name: String, def: ServiceDefinition) -> Self {
        Self {
            image: def.image.filter(|i| !i.is_empty()).unwrap_or_else(|| name.clone()),
            name,
            memory: def.memory,
            ports: def.ports,
            env: def.env,
        }
    }
}

/// Parsed compose document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeSpec {
    pub services: Vec<ComposeService>,
    pub overrides: ConfigOverrides,
}
