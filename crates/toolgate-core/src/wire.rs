//! Control-plane wire protocol
//!
//! JSON frames exchanged over the gateway WebSocket. Every request
//! carries a `type` and an optional `request_id`; every reply echoes the
//! `request_id`. The same frames are spoken by the gateway ingress, by
//! outbound connections to remote providers, and by this server code
//! running in provider mode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{
    Capability, ConnectParams, ErrorKind, InvocationResult, Provenance, ToolDescriptor, ToolKind,
};

/// Descriptor as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTool {
    pub tool_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tool_type: ToolKind,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_params: Option<ConnectParams>,
    /// Handler table key, only meaningful for function tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl WireTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        Self {
            tool_id: descriptor.registry_id.clone(),
            name: descriptor.display_name.clone(),
            description: descriptor.description.clone(),
            tool_type: descriptor.kind,
            capabilities: descriptor.capabilities.clone(),
            tags: descriptor.tags.clone(),
            endpoint: descriptor.endpoint.clone(),
            connection_params: descriptor.connect_params.clone(),
            handler: descriptor.handler_locator.clone(),
            enabled: descriptor.enabled,
        }
    }

    /// Convert the wire form into a registry descriptor.
    ///
    /// Remote servers must carry an endpoint; function tools must name a
    /// handler so the dispatcher can route them.
    pub fn into_descriptor(self, provenance: Provenance) -> Result<ToolDescriptor> {
        match self.tool_type {
            ToolKind::McpServer => {
                let endpoint = self.endpoint.ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "mcp_server tool '{}' is missing an endpoint",
                        self.tool_id
                    ))
                })?;
                let mut descriptor = ToolDescriptor::mcp_server(
                    self.tool_id,
                    self.name,
                    self.description,
                    endpoint,
                );
                descriptor.capabilities = self.capabilities;
                descriptor.tags = self.tags;
                descriptor.enabled = self.enabled;
                descriptor.connect_params =
                    Some(self.connection_params.unwrap_or_default());
                descriptor.provenance = Some(provenance);
                Ok(descriptor)
            }
            ToolKind::Function => {
                let handler = self.handler.ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "function tool '{}' is missing a handler locator",
                        self.tool_id
                    ))
                })?;
                let mut descriptor = ToolDescriptor::function(
                    self.tool_id,
                    self.name,
                    self.description,
                    handler,
                );
                descriptor.capabilities = self.capabilities;
                descriptor.tags = self.tags;
                descriptor.enabled = self.enabled;
                Ok(descriptor)
            }
        }
    }
}

/// Requests accepted by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    RegisterTool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_spec: WireTool,
    },
    ListTools {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    GetToolById {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_id: String,
    },
    ExecuteTool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_id: String,
        action: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    /// Inbound variant served in provider mode; also what the gateway
    /// sends outbound to remote providers.
    ExecuteToolAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_id: String,
        action: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ControlRequest {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ControlRequest::RegisterTool { request_id, .. }
            | ControlRequest::ListTools { request_id }
            | ControlRequest::GetToolById { request_id, .. }
            | ControlRequest::ExecuteTool { request_id, .. }
            | ControlRequest::ExecuteToolAction { request_id, .. }
            | ControlRequest::Ping { request_id } => request_id.as_deref(),
        }
    }
}

/// Provider-side result payload carried by `execute_tool_action_response`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireActionResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

impl WireActionResult {
    pub fn from_result(result: &InvocationResult) -> Self {
        Self {
            success: result.success,
            data: result.data.clone(),
            error_message: result.error_message.clone(),
            error_type: result.error_kind,
        }
    }

    pub fn into_result(self) -> InvocationResult {
        if self.success {
            InvocationResult::ok(self.data.unwrap_or(Value::Null))
        } else {
            InvocationResult::fail(
                self.error_type.unwrap_or(ErrorKind::ProviderError),
                self.error_message
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            )
        }
    }
}

/// Replies produced by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    RegisterToolResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ListToolsResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        success: bool,
        tools: Vec<WireTool>,
        total_count: usize,
    },
    GetToolByIdResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<WireTool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ExecuteToolResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_id: String,
        action: String,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<ErrorKind>,
    },
    ExecuteToolActionResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        tool_id: String,
        action: String,
        result: WireActionResult,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message: String,
    },
}

impl ControlResponse {
    pub fn error(request_id: Option<String>, message: impl Into<String>) -> Self {
        ControlResponse::Error {
            request_id,
            message: message.into(),
        }
    }

    pub fn execute_result(
        request_id: Option<String>,
        tool_id: impl Into<String>,
        action: impl Into<String>,
        result: &InvocationResult,
    ) -> Self {
        ControlResponse::ExecuteToolResponse {
            request_id,
            tool_id: tool_id.into(),
            action: action.into(),
            success: result.success,
            result: result.data.clone(),
            error: result.error_message.clone(),
            error_type: result.error_kind,
        }
    }
}

/// Event types published on the `tool_events` channel and the fan-out
/// WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEventType {
    Register,
    Unregister,
    ToolAvailable,
    ToolRemoved,
}

/// One registry change as seen by external subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub event_type: ToolEventType,
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_spec: Option<WireTool>,
    pub timestamp: String,
}

impl ToolEvent {
    pub fn new(
        event_type: ToolEventType,
        tool_id: impl Into<String>,
        tool_spec: Option<WireTool>,
    ) -> Self {
        Self {
            event_type,
            tool_id: tool_id.into(),
            tool_spec,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Service frames sent to clients of the events WebSocket.
///
/// Registry changes are sent as bare [`ToolEvent`] payloads (keyed by
/// `event_type`); only service frames carry a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsFrame {
    /// First frame after connect: snapshot of all enabled tools
    Welcome {
        tools: Vec<WireTool>,
        total_count: usize,
    },
    Pong,
    Tools {
        tools: Vec<WireTool>,
        total_count: usize,
    },
    Error {
        message: String,
    },
}

/// Messages accepted from clients of the events WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsClientMessage {
    Ping,
    Subscribe,
    GetTools,
}
