//! Per-provider connector
//!
//! State machine:
//!
//! ```text
//! Idle -- first call --> Connecting
//! Connecting -- ok ---> Ready
//! Connecting -- fail -> Failed (call returns provider_unavailable)
//! Ready -- call completes -> Ready
//! Ready -- error/closed ---> Degraded (next call reconnects once)
//! Degraded -- reconnect ok -> Ready
//! Degraded -- reconnect fail -> Failed
//! any state -- close() -> Closed
//! ```

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use serde_json::{Map, Value};
use toolgate_core::wire::{ControlRequest, ControlResponse};
use toolgate_core::{ConnectParams, ErrorKind, Invocation, InvocationResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable connector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Idle,
    Connecting,
    Ready,
    Degraded,
    Failed,
    Closed,
}

/// Introspection snapshot for the debug endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub registry_id: String,
    pub endpoint: String,
    pub state: ConnectorState,
    pub calls: u64,
    pub failures: u64,
}

/// One logical connection to a remote tool server
pub struct Connector {
    registry_id: String,
    endpoint: String,
    params: ConnectParams,
    /// Holds the live stream; also the serialization point. The mutex
    /// queue is what gives per-connector FIFO.
    stream: Mutex<Option<WsStream>>,
    state: StdMutex<ConnectorState>,
    cancel: CancellationToken,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl Connector {
    pub fn new(
        registry_id: impl Into<String>,
        endpoint: impl Into<String>,
        params: ConnectParams,
    ) -> Self {
        Self {
            registry_id: registry_id.into(),
            endpoint: endpoint.into(),
            params,
            stream: Mutex::new(None),
            state: StdMutex::new(ConnectorState::Idle),
            cancel: CancellationToken::new(),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.lock().unwrap()
    }

    pub fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            registry_id: self.registry_id.clone(),
            endpoint: self.endpoint.clone(),
            state: self.state(),
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.lock().unwrap() = state;
    }

    /// Drop the live connection so the next call starts fresh. The
    /// registration survives; only transport state is recycled.
    pub async fn reset(&self) {
        let mut stream = self.stream.lock().await;
        *stream = None;
        if self.state() != ConnectorState::Closed {
            self.set_state(ConnectorState::Idle);
        }
    }

    /// Stop accepting calls and cancel the outstanding one.
    pub async fn close(&self) {
        self.set_state(ConnectorState::Closed);
        self.cancel.cancel();
        let mut stream = self.stream.lock().await;
        if let Some(mut ws) = stream.take() {
            let _ = ws.close(None).await;
        }
    }

    /// Perform one `execute_tool_action` exchange.
    ///
    /// Serialized against concurrent callers; at most one request is in
    /// flight per connector. A connection-level failure is retried once
    /// over a fresh connection inside this call.
    pub async fn call(
        &self,
        tool_id: &str,
        action: &str,
        parameters: Map<String, Value>,
    ) -> InvocationResult {
        if self.state() == ConnectorState::Closed {
            return InvocationResult::fail(
                ErrorKind::Disabled,
                format!("connector for '{}' is closed", self.registry_id),
            );
        }

        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut stream = tokio::select! {
            guard = self.stream.lock() => guard,
            _ = self.cancel.cancelled() => {
                return InvocationResult::fail(
                    ErrorKind::Disabled,
                    format!("connector for '{}' shut down", self.registry_id),
                );
            }
        };

        let attempts = if self.params.retry_once { 2 } else { 1 };
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            // Lazy (re)connect. A degraded or reset connector has no
            // stream here and gets a fresh one.
            if stream.is_none() {
                self.set_state(ConnectorState::Connecting);
                match self.open_connection().await {
                    Ok(ws) => {
                        self.set_state(ConnectorState::Ready);
                        *stream = Some(ws);
                    }
                    Err(message) => {
                        self.set_state(ConnectorState::Failed);
                        last_failure = message;
                        continue;
                    }
                }
            }

            let Some(ws) = stream.as_mut() else {
                continue;
            };
            match self.exchange(ws, tool_id, action, &parameters).await {
                Exchange::Reply(result) => {
                    self.set_state(ConnectorState::Ready);
                    if !result.success {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                    }
                    return result;
                }
                Exchange::Timeout => {
                    // Not retried in-call; the next call reconnects.
                    *stream = None;
                    self.set_state(ConnectorState::Degraded);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return InvocationResult::fail(
                        ErrorKind::Timeout,
                        format!(
                            "request to '{}' timed out after {}ms",
                            self.registry_id, self.params.request_timeout_ms
                        ),
                    );
                }
                Exchange::Malformed(message) => {
                    // Fatal to the call, not to the connector.
                    *stream = None;
                    self.set_state(ConnectorState::Degraded);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return InvocationResult::fail(ErrorKind::ProviderError, message);
                }
                Exchange::ConnectionLost(message) => {
                    *stream = None;
                    if attempt < attempts {
                        debug!(
                            tool_id = %self.registry_id,
                            attempt,
                            "Connection lost, reconnecting"
                        );
                        self.set_state(ConnectorState::Degraded);
                    } else {
                        self.set_state(ConnectorState::Failed);
                    }
                    last_failure = message;
                }
                Exchange::Cancelled => {
                    return InvocationResult::fail(
                        ErrorKind::Disabled,
                        format!("call to '{}' cancelled by shutdown", self.registry_id),
                    );
                }
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!(tool_id = %self.registry_id, error = %last_failure, "Provider unavailable");
        InvocationResult::fail(
            ErrorKind::ProviderUnavailable,
            format!("provider '{}' unreachable: {last_failure}", self.registry_id),
        )
    }

    async fn open_connection(&self) -> Result<WsStream, String> {
        match tokio::time::timeout(
            self.params.connect_timeout(),
            connect_async(self.endpoint.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _response))) => {
                debug!(endpoint = %self.endpoint, "Connected to provider");
                Ok(ws)
            }
            Ok(Err(e)) => Err(format!("connect to {} failed: {e}", self.endpoint)),
            Err(_) => Err(format!(
                "connect to {} timed out after {}ms",
                self.endpoint, self.params.connect_timeout_ms
            )),
        }
    }

    async fn exchange(
        &self,
        ws: &mut WsStream,
        tool_id: &str,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Exchange {
        // Correlation ids are unique per live connection; with strict
        // one-at-a-time serialization the echo check still catches
        // protocol drift.
        let invocation = Invocation::new(tool_id, action, parameters.clone());
        let request_id = invocation.correlation_id.clone();
        let frame = ControlRequest::ExecuteToolAction {
            request_id: Some(request_id.clone()),
            tool_id: invocation.registry_id,
            action: invocation.action,
            parameters: invocation.parameters,
        };
        let payload = match serde_json::to_string(&frame) {
            Ok(p) => p,
            Err(e) => return Exchange::Malformed(format!("request serialization failed: {e}")),
        };

        if let Err(e) = ws.send(Message::Text(payload)).await {
            return Exchange::ConnectionLost(format!("send failed: {e}"));
        }

        let deadline = tokio::time::sleep(self.params.request_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exchange::Cancelled,
                _ = &mut deadline => return Exchange::Timeout,
                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            return self.parse_reply(&text, &request_id);
                        }
                        // Keepalive traffic; keep waiting for the reply.
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                        Some(Ok(Message::Close(_))) | None => {
                            return Exchange::ConnectionLost("connection closed".into());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            return Exchange::ConnectionLost(format!("receive failed: {e}"));
                        }
                    }
                }
            }
        }
    }

    fn parse_reply(&self, text: &str, expected_id: &str) -> Exchange {
        let response: ControlResponse = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => return Exchange::Malformed(format!("invalid reply from provider: {e}")),
        };

        match response {
            ControlResponse::ExecuteToolActionResponse {
                request_id, result, ..
            } => {
                // Strict one-at-a-time serialization means the id must
                // match; anything else is protocol drift.
                if request_id.as_deref() != Some(expected_id) {
                    return Exchange::Malformed(format!(
                        "correlation id mismatch from '{}': expected {expected_id}, got {:?}",
                        self.registry_id, request_id
                    ));
                }
                Exchange::Reply(result.into_result())
            }
            ControlResponse::Error { message, .. } => {
                Exchange::Reply(InvocationResult::fail(ErrorKind::ProviderError, message))
            }
            other => Exchange::Malformed(format!(
                "unexpected reply type from '{}': {other:?}",
                self.registry_id
            )),
        }
    }
}

enum Exchange {
    Reply(InvocationResult),
    Timeout,
    Malformed(String),
    ConnectionLost(String),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use toolgate_core::wire::WireActionResult;

    /// Minimal fake provider: answers every execute_tool_action after
    /// `delay`, echoing the correlation id unless `skew_id` is set.
    async fn spawn_fake_provider(
        delay: Duration,
        skew_id: bool,
        seen: Arc<tokio::sync::Mutex<Vec<Value>>>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let request: ControlRequest = serde_json::from_str(&text).unwrap();
                        if let ControlRequest::ExecuteToolAction {
                            request_id,
                            tool_id,
                            action,
                            parameters,
                        } = request
                        {
                            seen.lock().await.push(Value::Object(parameters.clone()));
                            tokio::time::sleep(delay).await;
                            let reply_id = if skew_id {
                                Some("bogus".to_string())
                            } else {
                                request_id
                            };
                            let response = ControlResponse::ExecuteToolActionResponse {
                                request_id: reply_id,
                                tool_id,
                                action,
                                result: WireActionResult {
                                    success: true,
                                    data: Some(json!({"ok": true})),
                                    error_message: None,
                                    error_type: None,
                                },
                            };
                            let payload = serde_json::to_string(&response).unwrap();
                            if ws.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        format!("ws://{addr}")
    }

    fn fast_params() -> ConnectParams {
        ConnectParams {
            connect_timeout_ms: 1_000,
            request_timeout_ms: 2_000,
            retry_once: true,
        }
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let endpoint = spawn_fake_provider(Duration::from_millis(5), false, seen).await;

        let connector = Connector::new("browser", endpoint, fast_params());
        assert_eq!(connector.state(), ConnectorState::Idle);

        let mut params = Map::new();
        params.insert("url".into(), json!("https://example.com"));
        let result = connector.call("browser", "navigate", params).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.data, Some(json!({"ok": true})));
        assert_eq!(connector.state(), ConnectorState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_calls_arrive_in_submission_order() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let endpoint =
            spawn_fake_provider(Duration::from_millis(50), false, seen.clone()).await;

        let connector = Arc::new(Connector::new("browser", endpoint, fast_params()));

        let first = {
            let connector = connector.clone();
            tokio::spawn(async move {
                let mut params = Map::new();
                params.insert("seq".into(), json!(1));
                connector.call("browser", "navigate", params).await
            })
        };
        // Give the first task time to enqueue on the connector mutex.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let connector = connector.clone();
            tokio::spawn(async move {
                let mut params = Map::new();
                params.insert("seq".into(), json!(2));
                connector.call("browser", "navigate", params).await
            })
        };

        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert!(a.success && b.success);

        let order: Vec<i64> = seen
            .lock()
            .await
            .iter()
            .map(|p| p["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        // Nothing listens on this port.
        let connector = Connector::new(
            "ghost",
            "ws://127.0.0.1:9",
            ConnectParams {
                connect_timeout_ms: 300,
                request_timeout_ms: 500,
                retry_once: true,
            },
        );

        let started = std::time::Instant::now();
        let result = connector.call("ghost", "run", Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ProviderUnavailable));
        // Two connect attempts bounded by connect-timeout x 2 (plus slack).
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert_eq!(connector.state(), ConnectorState::Failed);
    }

    #[tokio::test]
    async fn test_timeout_degrades_connector() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let endpoint = spawn_fake_provider(Duration::from_secs(30), false, seen).await;

        let connector = Connector::new(
            "slow",
            endpoint,
            ConnectParams {
                connect_timeout_ms: 1_000,
                request_timeout_ms: 100,
                retry_once: true,
            },
        );

        let result = connector.call("slow", "run", Map::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(connector.state(), ConnectorState::Degraded);
    }

    #[tokio::test]
    async fn test_correlation_mismatch_is_provider_error() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let endpoint = spawn_fake_provider(Duration::from_millis(5), true, seen).await;

        let connector = Connector::new("drift", endpoint, fast_params());
        let result = connector.call("drift", "run", Map::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ProviderError));
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("correlation id mismatch"));
        // Connector recovered to a reconnectable state.
        assert_eq!(connector.state(), ConnectorState::Degraded);
    }

    #[tokio::test]
    async fn test_closed_connector_rejects_calls() {
        let connector = Connector::new("gone", "ws://127.0.0.1:9", fast_params());
        connector.close().await;

        let result = connector.call("gone", "run", Map::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Disabled));
        assert_eq!(connector.state(), ConnectorState::Closed);
    }

    #[tokio::test]
    async fn test_degraded_connector_recovers_on_next_call() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let endpoint = spawn_fake_provider(Duration::from_millis(5), false, seen).await;

        let connector = Connector::new("flaky", endpoint, fast_params());
        // Force a degraded state, then observe a clean call recover it.
        connector.call("flaky", "run", Map::new()).await;
        connector.reset().await;

        let result = connector.call("flaky", "run", Map::new()).await;
        assert!(result.success);
        assert_eq!(connector.state(), ConnectorState::Ready);
    }
}
