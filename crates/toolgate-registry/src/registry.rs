//! Tool registry: authoritative descriptor map with change events
//!
//! One exclusive writer serializes mutations; readers take cheap
//! `Arc` snapshots and never observe half-updated state. Change events
//! are pushed onto a broadcast channel while the write guard is still
//! held, so every subscriber observes events in exactly the order the
//! mutations committed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use toolgate_core::{
    Error, RegistryEvent, RegistryEventKind, Result, ToolDescriptor, ToolKind,
};

/// Capacity of the change-event channel; a subscriber that lags this far
/// behind starts losing events and must resnapshot.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a register call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New entry became visible; an Added event was queued
    Added,
    /// Re-registration with an identical descriptor; no change
    Unchanged,
    /// Existing entry was atomically replaced; an Updated event was queued
    Replaced,
}

/// Filter for enumeration
#[derive(Debug, Clone, Default)]
pub struct RegistryFilter {
    pub kind: Option<ToolKind>,
    pub enabled: Option<bool>,
    pub tag: Option<String>,
}

impl RegistryFilter {
    pub fn enabled_only() -> Self {
        Self {
            enabled: Some(true),
            ..Default::default()
        }
    }

    fn matches(&self, descriptor: &ToolDescriptor) -> bool {
        if let Some(kind) = self.kind {
            if descriptor.kind != kind {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if descriptor.enabled != enabled {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !descriptor.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// In-memory tool registry
pub struct Registry {
    tools: RwLock<HashMap<String, Arc<ToolDescriptor>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tools: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to the change-event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a descriptor.
    ///
    /// Atomic: either the descriptor becomes visible to all subsequent
    /// reads and an event is queued, or nothing changes. Re-registering
    /// an identical descriptor is a no-op; a differing descriptor
    /// replaces the entry wholesale.
    pub async fn register(&self, descriptor: ToolDescriptor) -> Result<RegisterOutcome> {
        validate_descriptor(&descriptor)?;

        let mut tools = self.tools.write().await;
        let descriptor = Arc::new(descriptor);

        let outcome = match tools.get(&descriptor.registry_id) {
            Some(existing) if same_shape(existing, &descriptor) => RegisterOutcome::Unchanged,
            Some(_) => {
                tools.insert(descriptor.registry_id.clone(), descriptor.clone());
                self.emit(RegistryEventKind::Updated, &descriptor);
                RegisterOutcome::Replaced
            }
            None => {
                tools.insert(descriptor.registry_id.clone(), descriptor.clone());
                self.emit(RegistryEventKind::Added, &descriptor);
                RegisterOutcome::Added
            }
        };

        info!(
            tool_id = %descriptor.registry_id,
            kind = %descriptor.kind,
            ?outcome,
            "Registered tool"
        );
        Ok(outcome)
    }

    /// Unregister a tool, returning the removed descriptor.
    pub async fn unregister(&self, registry_id: &str) -> Result<Arc<ToolDescriptor>> {
        let mut tools = self.tools.write().await;
        match tools.remove(registry_id) {
            Some(descriptor) => {
                self.events
                    .send(RegistryEvent {
                        kind: RegistryEventKind::Removed,
                        registry_id: registry_id.to_string(),
                        descriptor: None,
                    })
                    .ok();
                info!(tool_id = %registry_id, "Unregistered tool");
                Ok(descriptor)
            }
            None => Err(Error::not_found(format!("tool '{registry_id}'"))),
        }
    }

    /// Look up a descriptor snapshot.
    pub async fn lookup(&self, registry_id: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().await.get(registry_id).cloned()
    }

    /// Whether an id is currently registered.
    pub async fn contains(&self, registry_id: &str) -> bool {
        self.tools.read().await.contains_key(registry_id)
    }

    /// Snapshot of all descriptors matching the filter.
    pub async fn enumerate(&self, filter: &RegistryFilter) -> Vec<Arc<ToolDescriptor>> {
        let tools = self.tools.read().await;
        let mut list: Vec<_> = tools
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.registry_id.cmp(&b.registry_id));
        list
    }

    /// Toggle the enabled flag, queuing an Updated event.
    pub async fn set_enabled(&self, registry_id: &str, enabled: bool) -> Result<()> {
        let mut tools = self.tools.write().await;
        match tools.get(registry_id) {
            Some(existing) => {
                if existing.enabled != enabled {
                    let mut updated = (**existing).clone();
                    updated.enabled = enabled;
                    let updated = Arc::new(updated);
                    tools.insert(registry_id.to_string(), updated.clone());
                    self.emit(RegistryEventKind::Updated, &updated);
                    debug!(tool_id = %registry_id, enabled, "Toggled tool");
                }
                Ok(())
            }
            None => Err(Error::not_found(format!("tool '{registry_id}'"))),
        }
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    fn emit(&self, kind: RegistryEventKind, descriptor: &Arc<ToolDescriptor>) {
        // A send error just means nobody is listening yet.
        self.events
            .send(RegistryEvent {
                kind,
                registry_id: descriptor.registry_id.clone(),
                descriptor: Some(descriptor.clone()),
            })
            .ok();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality ignoring the registration timestamp, which every
/// re-registration refreshes.
fn same_shape(a: &ToolDescriptor, b: &ToolDescriptor) -> bool {
    a.registry_id == b.registry_id
        && a.display_name == b.display_name
        && a.description == b.description
        && a.kind == b.kind
        && a.capabilities == b.capabilities
        && a.tags == b.tags
        && a.enabled == b.enabled
        && a.endpoint == b.endpoint
        && a.connect_params == b.connect_params
        && a.provenance == b.provenance
        && a.handler_locator == b.handler_locator
}

fn validate_descriptor(descriptor: &ToolDescriptor) -> Result<()> {
    if descriptor.registry_id.trim().is_empty() {
        return Err(Error::invalid_argument("registry_id must not be empty"));
    }
    match descriptor.kind {
        ToolKind::McpServer if descriptor.endpoint.is_none() => Err(Error::invalid_argument(
            format!("remote tool '{}' has no endpoint", descriptor.registry_id),
        )),
        ToolKind::Function if descriptor.handler_locator.is_none() => {
            Err(Error::invalid_argument(format!(
                "function tool '{}' has no handler locator",
                descriptor.registry_id
            )))
        }
        _ => Ok(()),
    }
}
