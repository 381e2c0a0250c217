//! Common types used across toolgate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Kind of tool provider behind a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// In-process function backed by the handler table
    #[default]
    Function,
    /// Remote tool server speaking the JSON control protocol
    McpServer,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Function => write!(f, "function"),
            ToolKind::McpServer => write!(f, "mcp_server"),
        }
    }
}

/// Type tag for a capability parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Check a JSON value against this type tag.
    ///
    /// Integers are accepted where a number is expected, but not the
    /// reverse.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// Schema for one capability parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSchema {
    pub fn required(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// One named action exposed by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParamSchema>,
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: HashMap::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, schema: ParamSchema) -> Self {
        self.parameters.insert(name.into(), schema);
        self
    }

    pub fn with_example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }
}

/// Connection parameters for a remote provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Timeout for establishing the WebSocket connection, milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for one request/response exchange, milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Whether a failed exchange is retried once over a fresh connection
    #[serde(default = "default_retry_once")]
    pub retry_once: bool,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_retry_once() -> bool {
    true
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_once: default_retry_once(),
        }
    }
}

impl ConnectParams {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How a remote provider came to be known to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Spawned and owned by this gateway's process runner
    Spawned,
    /// Pre-existing server registered from outside
    #[default]
    External,
    /// Baked into the build; re-derived on every boot
    Predefined,
}

/// The canonical registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique, stable for the life of the registration
    pub registry_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Network address, RemoteServer only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_params: Option<ConnectParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Key into the in-process handler table, LocalFunction only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_locator: Option<String>,
    pub registered_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ToolDescriptor {
    /// Build a descriptor for an in-process function tool.
    pub fn function(
        registry_id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        handler_locator: impl Into<String>,
    ) -> Self {
        Self {
            registry_id: registry_id.into(),
            display_name: display_name.into(),
            description: description.into(),
            kind: ToolKind::Function,
            capabilities: Vec::new(),
            tags: Vec::new(),
            enabled: true,
            endpoint: None,
            connect_params: None,
            provenance: None,
            handler_locator: Some(handler_locator.into()),
            registered_at: Utc::now(),
        }
    }

    /// Build a descriptor for a remote tool server.
    pub fn mcp_server(
        registry_id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            registry_id: registry_id.into(),
            display_name: display_name.into(),
            description: description.into(),
            kind: ToolKind::McpServer,
            capabilities: Vec::new(),
            tags: Vec::new(),
            enabled: true,
            endpoint: Some(endpoint.into()),
            connect_params: Some(ConnectParams::default()),
            provenance: Some(Provenance::External),
            handler_locator: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.kind == ToolKind::McpServer
    }

    /// Find the capability describing `action`, if any.
    pub fn capability(&self, action: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == action)
    }

    pub fn connect_params(&self) -> ConnectParams {
        self.connect_params.clone().unwrap_or_default()
    }
}

/// A tool invocation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub registry_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    pub correlation_id: String,
}

impl Invocation {
    pub fn new(
        registry_id: impl Into<String>,
        action: impl Into<String>,
        parameters: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            registry_id: registry_id.into(),
            action: action.into(),
            parameters,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolNotFound,
    ActionNotSupported,
    InvalidArgument,
    ProviderUnavailable,
    Timeout,
    ProviderError,
    InternalError,
    RateLimited,
    Disabled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::ActionNotSupported => "action_not_supported",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Result of one dispatched invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub elapsed_ns: u64,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

impl InvocationResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_kind: None,
            error_message: None,
            elapsed_ns: 0,
            meta: HashMap::new(),
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            elapsed_ns: 0,
            meta: HashMap::new(),
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ns = elapsed.as_nanos() as u64;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Kind of registry change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryEventKind {
    Added,
    Removed,
    Updated,
}

/// A change event emitted by the registry.
///
/// The descriptor snapshot is shared, not cloned, so fan-out to many
/// subscribers stays cheap.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub kind: RegistryEventKind,
    pub registry_id: String,
    pub descriptor: Option<Arc<ToolDescriptor>>,
}

/// Minimal record used to resurrect a provider across gateway restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedProvider {
    pub registry_id: String,
    pub display_name: String,
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub provenance: Provenance,
    /// Spawn command, present only for providers we started ourselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_hint: Option<u16>,
}

impl PersistedProvider {
    /// Record for an externally running server we only connect to.
    pub fn external(descriptor: &ToolDescriptor) -> Self {
        Self {
            registry_id: descriptor.registry_id.clone(),
            display_name: descriptor.display_name.clone(),
            kind: descriptor.kind,
            endpoint: descriptor.endpoint.clone(),
            provenance: Provenance::External,
            command: None,
            port_hint: None,
        }
    }

    /// Record for a server this gateway spawned.
    pub fn spawned(descriptor: &ToolDescriptor, command: Vec<String>, port: u16) -> Self {
        Self {
            registry_id: descriptor.registry_id.clone(),
            display_name: descriptor.display_name.clone(),
            kind: descriptor.kind,
            endpoint: descriptor.endpoint.clone(),
            provenance: Provenance::Spawned,
            command: Some(command),
            port_hint: Some(port),
        }
    }
}

/// Restart policy for spawned provider processes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    Never,
    OnFailure {
        max_restarts: u32,
        window_secs: u64,
    },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::OnFailure {
            max_restarts: 3,
            window_secs: 300,
        }
    }
}

/// Status of a spawned provider process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Exited,
    Crashed,
}

/// Read-only snapshot of a provider process record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub handle: u64,
    pub registry_id_hint: String,
    pub listen_port: u16,
    pub command: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    pub restarts: u32,
    #[serde(default)]
    pub stdout_tail: String,
    #[serde(default)]
    pub stderr_tail: String,
}
