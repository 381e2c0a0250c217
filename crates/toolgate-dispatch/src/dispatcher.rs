//! Invocation dispatcher
//!
//! `dispatch` runs the full pipeline: validate, locate, route, normalize,
//! record. The dispatcher is stateless apart from the counters and can
//! be called concurrently; ordering within a single remote tool follows
//! the connector's serialization, calls to independent tools are
//! unordered.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

use toolgate_connect::ConnectorPool;
use toolgate_core::{ErrorKind, InvocationResult, ToolKind};
use toolgate_registry::{HandlerTable, Registry, Resolver};

use crate::stats::DispatchStats;

/// One requested invocation, pre-validation
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    pub action: String,
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        tool: impl Into<String>,
        action: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            tool: tool.into(),
            action: action.into(),
            parameters,
        }
    }
}

/// The dispatch pipeline
pub struct Dispatcher {
    resolver: Arc<Resolver>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerTable>,
    pool: Arc<ConnectorPool>,
    stats: Arc<DispatchStats>,
    dispatch_timeout: Duration,
    shutting_down: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<Resolver>,
        registry: Arc<Registry>,
        handlers: Arc<HandlerTable>,
        pool: Arc<ConnectorPool>,
        stats: Arc<DispatchStats>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            registry,
            handlers,
            pool,
            stats,
            dispatch_timeout,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Refuse new work; in-flight remote calls are cancelled by the
    /// pool's close_all.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Dispatch a single call.
    #[instrument(skip(self, call), fields(tool = %call.tool, action = %call.action))]
    pub async fn dispatch(&self, call: ToolCall) -> InvocationResult {
        let started = Instant::now();

        if self.shutting_down.load(Ordering::SeqCst) {
            return InvocationResult::fail(ErrorKind::Disabled, "gateway is shutting down");
        }

        // Validate: identifier resolution plus schema check.
        let normalized = match self
            .resolver
            .validate(&self.registry, &call.tool, &call.action, call.parameters)
            .await
        {
            Ok(normalized) => normalized,
            Err(e) => {
                debug!(kind = %e.kind, "Validation rejected call");
                return InvocationResult::fail(e.kind, e.message)
                    .with_elapsed(started.elapsed());
            }
        };

        // Locate: the descriptor may have changed since resolution.
        let descriptor = match self.registry.lookup(&normalized.registry_id).await {
            Some(descriptor) => descriptor,
            None => {
                return InvocationResult::fail(
                    ErrorKind::ToolNotFound,
                    format!("tool '{}' not found", normalized.registry_id),
                )
                .with_elapsed(started.elapsed());
            }
        };

        if !descriptor.enabled {
            return InvocationResult::fail(
                ErrorKind::Disabled,
                format!("tool '{}' is disabled", descriptor.registry_id),
            )
            .with_elapsed(started.elapsed());
        }

        // Route and normalize.
        let routed = match descriptor.kind {
            ToolKind::Function => {
                self.call_local(&descriptor.registry_id, descriptor.handler_locator.as_deref(),
                    &normalized.action, normalized.parameters).await
            }
            ToolKind::McpServer => {
                match self.pool.ensure(&descriptor).await {
                    Some(connector) => {
                        connector
                            .call(&descriptor.registry_id, &normalized.action, normalized.parameters)
                            .await
                    }
                    None => InvocationResult::fail(
                        ErrorKind::InternalError,
                        format!("no connector for '{}'", descriptor.registry_id),
                    ),
                }
            }
        };

        let result = routed.with_elapsed(started.elapsed());

        // Record.
        self.stats.record(&descriptor.registry_id, &result).await;
        if !result.success {
            warn!(
                tool_id = %descriptor.registry_id,
                kind = ?result.error_kind,
                "Dispatch failed"
            );
        }
        result
    }

    /// Invoke a local handler, containing panics and enforcing the
    /// dispatch deadline.
    async fn call_local(
        &self,
        registry_id: &str,
        locator: Option<&str>,
        action: &str,
        parameters: Map<String, Value>,
    ) -> InvocationResult {
        let locator = match locator {
            Some(locator) => locator,
            None => {
                return InvocationResult::fail(
                    ErrorKind::InternalError,
                    format!("function tool '{registry_id}' has no handler locator"),
                );
            }
        };

        let handler = match self.handlers.get(locator).await {
            Some(handler) => handler,
            None => {
                return InvocationResult::fail(
                    ErrorKind::InternalError,
                    format!("handler '{locator}' for '{registry_id}' is not loaded"),
                );
            }
        };

        let action = action.to_string();
        // Run in its own task so a panicking handler cannot take the
        // gateway down with it.
        let join = tokio::spawn(async move { handler.execute(&action, parameters).await });

        match tokio::time::timeout(self.dispatch_timeout, join).await {
            Ok(Ok(Ok(data))) => InvocationResult::ok(data),
            Ok(Ok(Err(e))) => {
                InvocationResult::fail(ErrorKind::ProviderError, e.to_string())
            }
            Ok(Err(join_error)) => {
                error!(tool_id = %registry_id, error = %join_error, "Handler crashed");
                InvocationResult::fail(
                    ErrorKind::InternalError,
                    format!("handler for '{registry_id}' crashed"),
                )
            }
            Err(_) => InvocationResult::fail(
                ErrorKind::Timeout,
                format!(
                    "handler for '{registry_id}' exceeded {}s deadline",
                    self.dispatch_timeout.as_secs()
                ),
            ),
        }
    }

    /// Dispatch a batch concurrently; every slot gets a result, failures
    /// included.
    pub async fn dispatch_batch(&self, calls: Vec<ToolCall>) -> Vec<InvocationResult> {
        let futures: Vec<_> = calls.into_iter().map(|call| self.dispatch(call)).collect();
        futures::future::join_all(futures).await
    }
}
