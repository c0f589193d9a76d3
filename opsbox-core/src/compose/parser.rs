//! Compose file parser.
//!
//! Accepts either a YAML document with a `services:` mapping or a plain list
//! with one service per line (`#` starts a comment line).

use super::types::*;
use crate::error::{OpsboxError, Result};
use tracing::{debug, instrument};

/// Parser for compose files.
pub struct ComposeParser;

impl ComposeParser {
    /// Parse compose content.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The content is neither a YAML mapping nor a plain service list
    /// - No services are defined
    /// - A service name is not a valid instance name component
    #[instrument(skip(content), fields(len = content.len()))]
    pub fn parse(content: &str) -> Result<ComposeSpec> {
        let spec = match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(value @ serde_yaml::Value::Mapping(_)) => Self::parse_yaml(value)?,
            Ok(_) | Err(_) if Self::is_plain_list(content) => Self::parse_plain(content),
            Ok(_) => {
                return Err(OpsboxError::ComposeParseError {
                    reason: "expected a `services:` mapping or one service per line".to_string(),
                })
            }
            Err(e) => return Err(OpsboxError::ComposeParseError { reason: e.to_string() }),
        };

        Self::validate_services(&spec.services)?;
        debug!(services = spec.services.len(), "Parsed compose file");
        Ok(spec)
    }

    /// Parse raw bytes, which must be UTF-8.
    pub fn parse_bytes(raw: &[u8]) -> Result<ComposeSpec> {
        let content = std::str::from_utf8(raw).map_err(|e| OpsboxError::ComposeParseError {
            reason: format!("compose file is not UTF-8: {}", e),
        })?;
        Self::parse(content)
    }

    fn parse_yaml(value: serde_yaml::Value) -> Result<ComposeSpec> {
        let file: ComposeFile = serde_yaml::from_value(value)
            .map_err(|e| OpsboxError::ComposeParseError { reason: e.to_string() })?;

        let services = file
            .services
            .into_iter()
            .map(|(name, def)| ComposeService::from_definition(name, def.unwrap_or_default()))
            .collect();

        Ok(ComposeSpec { services, overrides: file.config })
    }

    fn service_lines(content: &str) -> impl Iterator<Item = &str> {
        content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'))
    }

    fn is_plain_list(content: &str) -> bool {
        let mut lines = Self::service_lines(content).peekable();
        lines.peek().is_some() && lines.all(Self::is_valid_name)
    }

    fn parse_plain(content: &str) -> ComposeSpec {
        ComposeSpec {
            services: Self::service_lines(content).map(ComposeService::named).collect(),
            overrides: Default::default(),
        }
    }

    fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.')
    }

    /// Validate that services are properly defined.
    fn validate_services(services: &[ComposeService]) -> Result<()> {
        if services.is_empty() {
            return Err(OpsboxError::ComposeParseError {
                reason: "No services defined".to_string(),
            });
        }

        for service in services {
            if !Self::is_valid_name(&service.name) {
                return Err(OpsboxError::ComposeParseError {
                    reason: format!("Invalid service name '{}'", service.name),
                });
            }
        }

        let mut names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(OpsboxError::ComposeParseError {
                reason: format!("Service '{}' defined more than once", dup[0]),
            });
        }

        Ok(())
    }
}
