//! Control-plane WebSocket server
//!
//! The single network-visible ingress for providers and agent runtimes.
//! Each connection reads framed JSON requests and answers them in
//! arrival order. A bad message gets an error reply; malformed JSON or
//! a saturated outgoing queue terminates the connection.
//!
//! The same server code runs in two roles: the main gateway (full
//! message catalog) or a tool provider (serving `execute_tool_action`
//! through a mounted action handler).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolgate_core::wire::{ControlRequest, ControlResponse, WireActionResult, WireTool};
use toolgate_core::{ErrorKind, InvocationResult, Provenance, ToolKind};
use toolgate_dispatch::ToolCall;
use toolgate_registry::RegistryFilter;

use crate::state::AppState;

/// Outgoing frames buffered per connection before it is closed as
/// rate-limited
const OUTGOING_QUEUE: usize = 256;

/// Callback serving tool actions when this server runs as a provider
pub type ActionHandler = Arc<
    dyn Fn(String, Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
>;

/// Which role this control plane plays
#[derive(Clone)]
pub enum ServerRole {
    /// The main gateway: registrations, listing and dispatch
    Gateway,
    /// A tool provider: serves execute_tool_action via the handler
    Provider { handler: ActionHandler },
}

impl ServerRole {
    pub fn is_gateway(&self) -> bool {
        matches!(self, ServerRole::Gateway)
    }
}

impl std::fmt::Debug for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerRole::Gateway => write!(f, "Gateway"),
            ServerRole::Provider { .. } => write!(f, "Provider"),
        }
    }
}

/// Router exposing the control-plane WebSocket endpoint.
pub fn control_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/websocket", get(ws_handler))
        .with_state(state)
}

/// Bind and serve the control plane until cancellation.
pub async fn serve_control_plane(
    addr: &str,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = control_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Control plane listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    info!("Control-plane client connected");
    let (mut sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTGOING_QUEUE);
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Messages are handled in arrival order; ordering within one
    // connection mirrors the order requests were written.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let request: ControlRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "Malformed control frame, closing connection");
                        let reply = ControlResponse::error(None, format!("invalid JSON: {e}"));
                        let _ = out_tx.try_send(Message::Text(
                            serde_json::to_string(&reply).unwrap_or_default(),
                        ));
                        break;
                    }
                };

                let response = handle_request(&state, request).await;
                let payload = match serde_json::to_string(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Response serialization failed");
                        continue;
                    }
                };

                match out_tx.try_send(Message::Text(payload)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Outgoing queue full, closing rate-limited connection");
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.try_send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    send_task.abort();
    let _ = (&mut send_task).await;
    info!("Control-plane client disconnected");
}

/// Dispatch one control frame to its handler.
pub async fn handle_request(state: &AppState, request: ControlRequest) -> ControlResponse {
    let request_id = request.request_id().map(str::to_string);
    debug!(?request_id, "Handling control frame");

    match request {
        ControlRequest::Ping { request_id } => ControlResponse::Pong { request_id },

        ControlRequest::RegisterTool {
            request_id,
            tool_spec,
        } => handle_register_tool(state, request_id, tool_spec).await,

        ControlRequest::ListTools { request_id } => {
            let tools = state.gateway.enumerate(&RegistryFilter::default()).await;
            let wire: Vec<WireTool> = tools.iter().map(|d| WireTool::from_descriptor(d)).collect();
            let total_count = wire.len();
            ControlResponse::ListToolsResponse {
                request_id,
                success: true,
                tools: wire,
                total_count,
            }
        }

        ControlRequest::GetToolById {
            request_id,
            tool_id,
        } => match state.gateway.lookup(&tool_id).await {
            Some(descriptor) => ControlResponse::GetToolByIdResponse {
                request_id,
                success: true,
                tool: Some(WireTool::from_descriptor(&descriptor)),
                error: None,
            },
            None => ControlResponse::GetToolByIdResponse {
                request_id,
                success: false,
                tool: None,
                error: Some(format!("tool '{tool_id}' not found")),
            },
        },

        ControlRequest::ExecuteTool {
            request_id,
            tool_id,
            action,
            parameters,
        } => {
            if !state.role.is_gateway() {
                return ControlResponse::error(
                    request_id,
                    "execute_tool is only served by the main gateway",
                );
            }
            let result = state
                .gateway
                .dispatch(ToolCall::new(tool_id.clone(), action.clone(), parameters))
                .await;
            ControlResponse::execute_result(request_id, tool_id, action, &result)
        }

        ControlRequest::ExecuteToolAction {
            request_id,
            tool_id,
            action,
            parameters,
        } => match &state.role {
            ServerRole::Provider { handler } => {
                let result = match handler(action.clone(), parameters).await {
                    Ok(data) => InvocationResult::ok(data),
                    Err(e) => InvocationResult::fail(ErrorKind::ProviderError, e.to_string()),
                };
                ControlResponse::ExecuteToolActionResponse {
                    request_id,
                    tool_id,
                    action,
                    result: WireActionResult::from_result(&result),
                }
            }
            ServerRole::Gateway => ControlResponse::error(
                request_id,
                "execute_tool_action is only served in provider mode",
            ),
        },
    }
}

async fn handle_register_tool(
    state: &AppState,
    request_id: Option<String>,
    tool_spec: WireTool,
) -> ControlResponse {
    // A second instance impersonating the gateway is rejected.
    if !state.role.is_gateway() {
        return ControlResponse::RegisterToolResponse {
            request_id,
            success: false,
            tool_id: None,
            message: Some("registrations are only accepted by the main gateway".into()),
        };
    }

    let tool_id = tool_spec.tool_id.clone();
    let outcome = match tool_spec.tool_type {
        ToolKind::McpServer => match tool_spec.into_descriptor(Provenance::External) {
            Ok(descriptor) => state.supervisor.register_external(descriptor).await,
            Err(e) => Err(e),
        },
        ToolKind::Function => match tool_spec.into_descriptor(Provenance::External) {
            Ok(descriptor) => state.gateway.register_function_descriptor(descriptor).await,
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok(_) => ControlResponse::RegisterToolResponse {
            request_id,
            success: true,
            tool_id: Some(tool_id),
            message: None,
        },
        Err(e) => ControlResponse::RegisterToolResponse {
            request_id,
            success: false,
            tool_id: Some(tool_id),
            message: Some(e.to_string()),
        },
    }
}
