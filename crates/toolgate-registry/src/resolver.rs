//! Identifier resolution and invocation validation
//!
//! Three identifier namespaces coexist: the agent-facing id an LLM
//! writes, the registry id keyed in the registry, and legacy aliases
//! that must keep working. Resolution is pure and deterministic for a
//! given alias table; a direct registry match always beats an alias.

use std::collections::HashMap;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use toolgate_core::{ErrorKind, ToolDescriptor};

use crate::registry::Registry;

/// Validation failure, already mapped onto the caller-facing taxonomy
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ValidateError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Normalized invocation triple ready for dispatch
#[derive(Debug, Clone)]
pub struct Normalized {
    pub registry_id: String,
    pub action: String,
    pub parameters: Map<String, Value>,
}

/// Alias table mapping agent-facing ids onto registry ids
pub struct Resolver {
    aliases: RwLock<HashMap<String, String>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Install or replace an alias. The alias key is canonicalized.
    pub async fn add_alias(&self, alias: impl AsRef<str>, registry_id: impl Into<String>) {
        let key = canonicalize(alias.as_ref());
        let registry_id = registry_id.into();
        debug!(alias = %key, target = %registry_id, "Alias installed");
        self.aliases.write().await.insert(key, registry_id);
    }

    pub async fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.write().await.remove(&canonicalize(alias)).is_some()
    }

    /// Reverse lookup for diagnostics: all aliases naming `registry_id`.
    pub async fn aliases_for(&self, registry_id: &str) -> Vec<String> {
        let aliases = self.aliases.read().await;
        let mut list: Vec<String> = aliases
            .iter()
            .filter(|(_, target)| target.as_str() == registry_id)
            .map(|(alias, _)| alias.clone())
            .collect();
        list.sort();
        list
    }

    pub async fn alias_count(&self) -> usize {
        self.aliases.read().await.len()
    }

    /// Snapshot of the whole alias table.
    pub async fn aliases(&self) -> HashMap<String, String> {
        self.aliases.read().await.clone()
    }

    /// Resolve an input identifier to a registered descriptor.
    ///
    /// Order: verbatim registry hit, then alias on the canonical form,
    /// then the canonical form itself against the registry. The direct
    /// match winning over an alias is deliberate: an id that names a
    /// real registration must never be silently redirected.
    pub async fn resolve(
        &self,
        registry: &Registry,
        input: &str,
    ) -> Option<std::sync::Arc<ToolDescriptor>> {
        if let Some(descriptor) = registry.lookup(input).await {
            return Some(descriptor);
        }

        let canonical = canonicalize(input);
        if let Some(target) = self.aliases.read().await.get(&canonical) {
            if let Some(descriptor) = registry.lookup(target).await {
                return Some(descriptor);
            }
        }

        if canonical != input {
            if let Some(descriptor) = registry.lookup(&canonical).await {
                return Some(descriptor);
            }
        }

        None
    }

    /// Validate a (tool, action, parameters) triple against the
    /// registered schema and return the normalized form for dispatch.
    ///
    /// Parameters with a schema default are filled in when absent;
    /// unknown extra parameters pass through untouched.
    pub async fn validate(
        &self,
        registry: &Registry,
        tool: &str,
        action: &str,
        parameters: Map<String, Value>,
    ) -> Result<Normalized, ValidateError> {
        let descriptor = self.resolve(registry, tool).await.ok_or_else(|| {
            ValidateError::new(ErrorKind::ToolNotFound, format!("tool '{tool}' not found"))
        })?;

        // A remote server restored from the minimal manifest carries no
        // capability list; its actions are validated provider-side.
        let capability = match descriptor.capability(action) {
            Some(capability) => capability,
            None if descriptor.is_remote() && descriptor.capabilities.is_empty() => {
                return Ok(Normalized {
                    registry_id: descriptor.registry_id.clone(),
                    action: action.to_string(),
                    parameters,
                });
            }
            None => {
                return Err(ValidateError::new(
                    ErrorKind::ActionNotSupported,
                    format!(
                        "tool '{}' does not support action '{action}'",
                        descriptor.registry_id
                    ),
                ));
            }
        };

        let mut normalized = parameters;
        for (name, schema) in &capability.parameters {
            match normalized.get(name) {
                Some(value) => {
                    if !schema.param_type.matches(value) {
                        return Err(ValidateError::new(
                            ErrorKind::InvalidArgument,
                            format!(
                                "parameter '{name}' of '{}.{action}' has wrong type",
                                descriptor.registry_id
                            ),
                        ));
                    }
                }
                None => {
                    if let Some(default) = &schema.default {
                        normalized.insert(name.clone(), default.clone());
                    } else if schema.required {
                        return Err(ValidateError::new(
                            ErrorKind::InvalidArgument,
                            format!(
                                "required parameter '{name}' of '{}.{action}' is missing",
                                descriptor.registry_id
                            ),
                        ));
                    }
                }
            }
        }

        Ok(Normalized {
            registry_id: descriptor.registry_id.clone(),
            action: action.to_string(),
            parameters: normalized,
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form of an identifier: trimmed, ASCII-lowercased.
pub fn canonicalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}
