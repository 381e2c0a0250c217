//! Admin HTTP API
//!
//! Operator-facing surface: liveness and status, tool listing and
//! detail, manual registration, catalog search/install triggers and a
//! dispatch endpoint. Mutating routes sit behind the shared admin
//! token when one is configured.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use toolgate_core::wire::WireTool;
use toolgate_core::{ErrorKind, InvocationResult, Provenance, ToolKind};
use toolgate_dispatch::ToolCall;
use toolgate_registry::RegistryFilter;
use toolgate_runner::InstallRequest;

use crate::events_ws::events_ws_handler;
use crate::state::AppState;

/// TTL for cached catalog search results
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Build the admin router.
pub fn admin_router(state: AppState) -> Router {
    let open = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tools", get(list_tools))
        .route("/tools/:id", get(tool_detail))
        .route("/stats", get(stats))
        .route("/mcp/persistent", get(persistent_providers))
        .route("/mcp/search", post(mcp_search))
        .route("/debug/connectors", get(debug_connectors))
        .route("/api/v1/tools/execute", post(execute_tool))
        .route("/api/v1/tools/execute-batch", post(execute_batch))
        .route("/api/v1/events/tools", get(events_ws_handler));

    let guarded = Router::new()
        .route("/admin/tools/register", post(register_function_tool))
        .route("/admin/tools/:id", delete(unregister_tool))
        .route("/admin/tools/:id/enabled", post(set_tool_enabled))
        .route("/admin/mcp/register", post(register_mcp_server))
        .route("/admin/aliases", get(list_aliases).post(add_alias))
        .route("/admin/aliases/:alias", delete(remove_alias))
        .route("/mcp/install", post(mcp_install))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_guard));

    open.merge(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the admin API until cancellation.
pub async fn serve_admin_api(
    addr: &str,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = admin_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Admin API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Shared-token guard for mutating routes.
async fn admin_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(token) = &state.admin_token {
        let expected = format!("Bearer {token}");
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == expected)
            .unwrap_or(false);
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing or invalid admin token"})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "toolgate",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let mut status = state.gateway.status().await;
    if let Some(object) = status.as_object_mut() {
        object.insert("uptime_secs".into(), json!(state.uptime_secs()));
        object.insert(
            "events_clients".into(),
            json!(state.fanout.client_count().await),
        );
        object.insert(
            "processes".into(),
            json!(state.supervisor.runner().snapshot_all().await.len()),
        );
    }
    Json(status)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    if query.format.as_deref() == Some("agent") {
        return state.gateway.describe_for_agent().await.into_response();
    }

    let filter = RegistryFilter {
        kind: None,
        enabled: query.enabled,
        tag: query.tag,
    };
    let tools: Vec<WireTool> = state
        .gateway
        .enumerate(&filter)
        .await
        .iter()
        .map(|d| WireTool::from_descriptor(d))
        .collect();
    Json(json!({"tools": tools, "total_count": tools.len()})).into_response()
}

async fn tool_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.lookup(&id).await {
        Some(descriptor) => {
            let aliases = state.gateway.resolver().aliases_for(&id).await;
            let stats = state.gateway.stats_snapshot().await;
            Json(json!({
                "tool": WireTool::from_descriptor(&descriptor),
                "provenance": descriptor.provenance,
                "registered_at": descriptor.registered_at,
                "aliases": aliases,
                "stats": stats.get(&id),
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("tool '{id}' not found")})),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "tools": state.gateway.stats_snapshot().await,
        "cache": state.gateway.cache().stats().await,
    }))
}

async fn persistent_providers(State(state): State<AppState>) -> Json<Value> {
    let providers = state.supervisor.manifest().all().await;
    Json(json!({"count": providers.len(), "providers": providers}))
}

async fn debug_connectors(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"connectors": state.gateway.connectors_snapshot().await}))
}

async fn register_function_tool(
    State(state): State<AppState>,
    Json(tool_spec): Json<WireTool>,
) -> Response {
    if tool_spec.tool_type != ToolKind::Function {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "this endpoint registers function tools; use /admin/mcp/register"})),
        )
            .into_response();
    }
    let tool_id = tool_spec.tool_id.clone();
    let descriptor = match tool_spec.into_descriptor(Provenance::External) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };
    match state.gateway.register_function_descriptor(descriptor).await {
        Ok(_) => Json(json!({"success": true, "tool_id": tool_id})).into_response(),
        Err(e) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn unregister_tool(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.supervisor.unregister(&id).await {
        Ok(_) => Json(json!({"success": true, "tool_id": id})).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn set_tool_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Response {
    match state.gateway.set_enabled(&id, body.enabled).await {
        Ok(()) => {
            Json(json!({"success": true, "tool_id": id, "enabled": body.enabled})).into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn list_aliases(State(state): State<AppState>) -> Json<Value> {
    let aliases = state.gateway.resolver().aliases().await;
    Json(json!({"count": aliases.len(), "aliases": aliases}))
}

#[derive(Debug, Deserialize)]
struct AliasBody {
    alias: String,
    tool_id: String,
}

async fn add_alias(State(state): State<AppState>, Json(body): Json<AliasBody>) -> Json<Value> {
    state
        .gateway
        .resolver()
        .add_alias(&body.alias, body.tool_id.clone())
        .await;
    Json(json!({"success": true, "alias": body.alias, "tool_id": body.tool_id}))
}

async fn remove_alias(State(state): State<AppState>, Path(alias): Path<String>) -> Response {
    if state.gateway.resolver().remove_alias(&alias).await {
        Json(json!({"success": true, "alias": alias})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no alias '{alias}'")})),
        )
            .into_response()
    }
}

async fn register_mcp_server(
    State(state): State<AppState>,
    Json(tool_spec): Json<WireTool>,
) -> Response {
    if tool_spec.tool_type != ToolKind::McpServer {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "this endpoint registers mcp_server tools"})),
        )
            .into_response();
    }
    let tool_id = tool_spec.tool_id.clone();
    let descriptor = match tool_spec.into_descriptor(Provenance::External) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };
    match state.supervisor.register_external(descriptor).await {
        Ok(_) => Json(json!({"success": true, "tool_id": tool_id})).into_response(),
        Err(e) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn mcp_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Json<Value> {
    let cache_key = format!("mcp_search:{}|{}", request.query, request.tags.join(","));
    if let Some(cached) = state.gateway.cache().get(&cache_key).await {
        return Json(json!({"cached": true, "results": cached}));
    }

    let matches = state.catalog.search(&request.query, &request.tags);
    let results = serde_json::to_value(&matches).unwrap_or_else(|_| json!([]));
    state
        .gateway
        .cache()
        .set(cache_key, results.clone(), SEARCH_CACHE_TTL)
        .await;
    Json(json!({"cached": false, "results": results}))
}

#[derive(Debug, Deserialize)]
struct InstallBody {
    /// Install a known catalog entry by id...
    #[serde(default)]
    catalog_id: Option<String>,
    /// ...or spell out the server explicitly.
    #[serde(default)]
    registry_id: Option<String>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

async fn mcp_install(State(state): State<AppState>, Json(body): Json<InstallBody>) -> Response {
    let request = if let Some(catalog_id) = &body.catalog_id {
        match state.catalog.get(catalog_id) {
            Some(entry) => InstallRequest {
                registry_id: entry.id.clone(),
                display_name: entry.name.clone(),
                description: entry.description.clone(),
                command: entry.command.clone(),
                port: body.port,
                capabilities: entry.capabilities.clone(),
                tags: entry.tags.clone(),
                env: body.env,
            },
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": format!("no catalog entry '{catalog_id}'")})),
                )
                    .into_response();
            }
        }
    } else {
        let (Some(registry_id), Some(command)) = (body.registry_id, body.command) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "provide catalog_id, or registry_id and command"})),
            )
                .into_response();
        };
        InstallRequest {
            display_name: registry_id.clone(),
            description: String::new(),
            registry_id,
            command,
            port: body.port,
            capabilities: vec![],
            tags: body.tags,
            env: body.env,
        }
    };

    let tool_id = request.registry_id.clone();
    match state.supervisor.install_and_register(request).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "tool_id": tool_id,
            "endpoint": outcome.endpoint,
            "port": outcome.port,
        }))
        .into_response(),
        Err(e) => {
            warn!(tool_id = %tool_id, error = %e, "Install failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"success": false, "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    tool_id: String,
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

async fn execute_tool(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let result = state
        .gateway
        .dispatch(ToolCall::new(body.tool_id, body.action, body.parameters))
        .await;
    let status = status_for(&result);
    (status, Json(result)).into_response()
}

#[derive(Debug, Deserialize)]
struct ExecuteBatchBody {
    calls: Vec<ExecuteBody>,
}

/// Concurrent batch dispatch; per-call failures land in their slot, so
/// the batch itself is always 200.
async fn execute_batch(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBatchBody>,
) -> Json<Value> {
    let calls: Vec<ToolCall> = body
        .calls
        .into_iter()
        .map(|c| ToolCall::new(c.tool_id, c.action, c.parameters))
        .collect();
    let results = state.gateway.dispatch_batch(calls).await;
    Json(json!({"count": results.len(), "results": results}))
}

/// The only place an ErrorKind becomes an HTTP status.
fn status_for(result: &InvocationResult) -> StatusCode {
    if result.success {
        return StatusCode::OK;
    }
    match result.error_kind {
        Some(ErrorKind::ToolNotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::ActionNotSupported | ErrorKind::InvalidArgument) => {
            StatusCode::BAD_REQUEST
        }
        Some(ErrorKind::Disabled) => StatusCode::FORBIDDEN,
        Some(ErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::ProviderUnavailable) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::ProviderError | ErrorKind::InternalError) | None => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::ErrorKind;

    #[test]
    fn test_status_mapping() {
        let ok = InvocationResult::ok(json!({}));
        assert_eq!(status_for(&ok), StatusCode::OK);

        let cases = [
            (ErrorKind::ToolNotFound, StatusCode::NOT_FOUND),
            (ErrorKind::InvalidArgument, StatusCode::BAD_REQUEST),
            (ErrorKind::ActionNotSupported, StatusCode::BAD_REQUEST),
            (ErrorKind::Disabled, StatusCode::FORBIDDEN),
            (ErrorKind::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ErrorKind::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (ErrorKind::ProviderUnavailable, StatusCode::BAD_GATEWAY),
            (ErrorKind::ProviderError, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::InternalError, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            let result = InvocationResult::fail(kind, "x");
            assert_eq!(status_for(&result), status, "{kind:?}");
        }
    }
}
