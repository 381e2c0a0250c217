//! Integration tests for the complete toolgate network surface

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use toolgate_core::wire::{ControlRequest, ControlResponse, WireActionResult, WireTool};
use toolgate_core::ToolKind;
use toolgate_dispatch::ToolGateway;
use toolgate_runner::{Catalog, ProcessRunner, Supervisor, SupervisorConfig};
use toolgate_server::{control_router, AppState, FanOut, ServerRole};
use toolgate_store::ManifestStore;

async fn build_state() -> (AppState, tempfile::TempDir) {
    let gateway = Arc::new(ToolGateway::new(Duration::from_secs(10)));
    gateway.register_builtins().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let manifest = Arc::new(
        ManifestStore::open(dir.path().join("providers.json"))
            .await
            .unwrap(),
    );
    let runner = Arc::new(ProcessRunner::new(19000, 19100));
    let supervisor = Arc::new(Supervisor::new(
        gateway.clone(),
        runner,
        manifest,
        SupervisorConfig::default(),
    ));

    let state = AppState::new(
        gateway,
        supervisor,
        Arc::new(Catalog::bundled()),
        Arc::new(FanOut::new(None)),
        ServerRole::Gateway,
        None,
    );
    (state, dir)
}

/// Serve a router on an ephemeral port, returning its address.
async fn serve(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

/// Start the fan-out pump for a state's registry events.
fn start_fanout(state: &AppState) {
    let fanout = state.fanout.clone();
    let events = state.gateway.subscribe_events();
    let cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn(FanOut::run(fanout, events, cancel));
}

/// A fake remote provider answering every execute_tool_action.
async fn spawn_fake_provider(reply: Value) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let reply = reply.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                while let Some(Ok(Message::Text(text))) = ws.next().await {
                    let request: ControlRequest = match serde_json::from_str(&text) {
                        Ok(request) => request,
                        Err(_) => continue,
                    };
                    match request {
                        ControlRequest::ExecuteToolAction {
                            request_id,
                            tool_id,
                            action,
                            ..
                        } => {
                            let response = ControlResponse::ExecuteToolActionResponse {
                                request_id,
                                tool_id,
                                action,
                                result: WireActionResult {
                                    success: true,
                                    data: Some(reply.clone()),
                                    error_message: None,
                                    error_type: None,
                                },
                            };
                            let _ = ws
                                .send(Message::Text(
                                    serde_json::to_string(&response).unwrap(),
                                ))
                                .await;
                        }
                        ControlRequest::Ping { .. } => {
                            let _ = ws
                                .send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                                .await;
                        }
                        _ => {}
                    }
                }
            });
        }
    });
    format!("ws://{addr}")
}

async fn send_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    frame: &ControlRequest,
) {
    ws.send(Message::Text(serde_json::to_string(frame).unwrap()))
        .await
        .unwrap();
}

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        match ws.next().await.expect("stream open").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_control_plane_register_list_execute() {
    let (state, _dir) = build_state().await;
    let addr = serve(control_router(state.clone())).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // Register a remote provider backed by a live fake server.
    let provider = spawn_fake_provider(json!({"ok": true})).await;
    send_frame(
        &mut ws,
        &ControlRequest::RegisterTool {
            request_id: Some("r1".into()),
            tool_spec: WireTool {
                tool_id: "browser".into(),
                name: "Browser".into(),
                description: "browser automation".into(),
                tool_type: ToolKind::McpServer,
                capabilities: vec![],
                tags: vec!["browser".into()],
                endpoint: Some(provider),
                connection_params: None,
                handler: None,
                enabled: true,
            },
        },
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "register_tool_response");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["tool_id"], "browser");

    // List includes builtins and the new registration.
    send_frame(
        &mut ws,
        &ControlRequest::ListTools {
            request_id: Some("l1".into()),
        },
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "list_tools_response");
    let ids: Vec<&str> = reply["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tool_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"echo"));
    assert!(ids.contains(&"browser"));

    // Execute through the gateway onto the remote provider.
    send_frame(
        &mut ws,
        &ControlRequest::ExecuteTool {
            request_id: Some("e1".into()),
            tool_id: "browser".into(),
            action: "navigate".into(),
            parameters: serde_json::Map::new(),
        },
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "execute_tool_response");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["result"], json!({"ok": true}));
}

#[tokio::test]
async fn test_control_plane_execute_local_echo() {
    let (state, _dir) = build_state().await;
    let addr = serve(control_router(state)).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let mut parameters = serde_json::Map::new();
    parameters.insert("text".into(), json!("hello"));
    send_frame(
        &mut ws,
        &ControlRequest::ExecuteTool {
            request_id: Some("e1".into()),
            tool_id: "echo".into(),
            action: "run".into(),
            parameters,
        },
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["result"], json!({"echoed": "hello"}));

    // Missing required parameter fails validation before any traffic.
    send_frame(
        &mut ws,
        &ControlRequest::ExecuteTool {
            request_id: Some("e2".into()),
            tool_id: "echo".into(),
            action: "run".into(),
            parameters: serde_json::Map::new(),
        },
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error_type"], "invalid_argument");
}

#[tokio::test]
async fn test_control_plane_bad_message_gets_error_reply() {
    let (state, _dir) = build_state().await;
    let addr = serve(control_router(state)).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // Valid JSON, unknown frame: the connection closes after an error
    // frame per the malformed-input rule.
    ws.send(Message::Text("{not json".into())).await.unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
}

#[tokio::test]
async fn test_events_stream_welcome_and_order() {
    let (state, _dir) = build_state().await;
    start_fanout(&state);
    let addr = serve(toolgate_server::admin::admin_router(state.clone())).await;

    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/events/tools"))
            .await
            .unwrap();

    // Welcome snapshot first.
    let welcome = recv_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["total_count"].as_u64().unwrap() >= 2);

    // Register then unregister; events arrive in commit order.
    state
        .gateway
        .register_remote_server(toolgate_core::ToolDescriptor::mcp_server(
            "T1",
            "T1",
            "",
            "ws://127.0.0.1:9100/mcp",
        ))
        .await
        .unwrap();
    let event = recv_json(&mut ws).await;
    assert_eq!(event["event_type"], "register");
    assert_eq!(event["tool_id"], "T1");

    state.gateway.unregister("T1").await.unwrap();
    let event = recv_json(&mut ws).await;
    assert_eq!(event["event_type"], "unregister");
    assert_eq!(event["tool_id"], "T1");

    // Client ping still answered on the same socket.
    ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");
}

#[tokio::test]
async fn test_admin_http_execute_and_health() {
    use tower::ServiceExt;

    let (state, _dir) = build_state().await;
    let app = toolgate_server::admin::admin_router(state);

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_string(&json!({
                "tool_id": "echo",
                "action": "run",
                "parameters": {"text": "hi"}
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!({"echoed": "hi"}));

    // Unknown tool maps onto 404 at the HTTP boundary.
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_string(&json!({
                "tool_id": "ghost",
                "action": "run",
                "parameters": {}
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_token_guard() {
    use tower::ServiceExt;

    let (mut state, _dir) = build_state().await;
    state.admin_token = Some("sekrit".into());
    let app = toolgate_server::admin::admin_router(state);

    let unauthorized = axum::http::Request::builder()
        .method("DELETE")
        .uri("/admin/tools/echo")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(unauthorized).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);

    let authorized = axum::http::Request::builder()
        .method("DELETE")
        .uri("/admin/tools/echo")
        .header("authorization", "Bearer sekrit")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(authorized).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    // Read-only surface stays open.
    let health = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(health).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn test_mcp_search_is_cached() {
    use tower::ServiceExt;

    let (state, _dir) = build_state().await;
    let app = toolgate_server::admin::admin_router(state);

    let make_request = || {
        axum::http::Request::builder()
            .method("POST")
            .uri("/mcp/search")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                serde_json::to_string(&json!({"query": "browser"})).unwrap(),
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(make_request()).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let first: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(first["cached"], false);
    assert!(!first["results"].as_array().unwrap().is_empty());

    let response = app.oneshot(make_request()).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let second: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(second["cached"], true);
}

#[tokio::test]
async fn test_admin_batch_execute() {
    use tower::ServiceExt;

    let (state, _dir) = build_state().await;
    let app = toolgate_server::admin::admin_router(state);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute-batch")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_string(&json!({
                "calls": [
                    {"tool_id": "echo", "action": "run", "parameters": {"text": "one"}},
                    {"tool_id": "ghost", "action": "run", "parameters": {}},
                    {"tool_id": "echo", "action": "run", "parameters": {"text": "three"}}
                ]
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error_kind"], "tool_not_found");
    assert_eq!(results[2]["data"], json!({"echoed": "three"}));
}

#[tokio::test]
async fn test_admin_enable_toggle_and_aliases() {
    use tower::ServiceExt;

    let (state, _dir) = build_state().await;
    let app = toolgate_server::admin::admin_router(state.clone());

    // Disable echo; dispatch short-circuits with 403.
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/admin/tools/echo/enabled")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(r#"{"enabled": false}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            r#"{"tool_id": "echo", "action": "run", "parameters": {"text": "x"}}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);

    // Install an alias and dispatch through it.
    state.gateway.set_enabled("echo", true).await.unwrap();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/admin/aliases")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            r#"{"alias": "repeat", "tool_id": "echo"}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            r#"{"tool_id": "repeat", "action": "run", "parameters": {"text": "hi"}}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"], json!({"echoed": "hi"}));

    // Remove the alias; the agent-facing id stops resolving.
    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri("/admin/aliases/repeat")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/tools/execute")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            r#"{"tool_id": "repeat", "action": "run", "parameters": {"text": "hi"}}"#,
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}
