//! The gateway aggregate
//!
//! `ToolGateway` owns the resolver, registry, handler table, connector
//! pool, dispatch stats and result cache, and keeps the registry and
//! pool in lockstep: every remote registration has exactly one pool
//! entry and unregistering tears it down.

use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use toolgate_cache::ResultCache;
use toolgate_connect::{ConnectorInfo, ConnectorPool};
use toolgate_core::{Error, InvocationResult, RegistryEvent, Result, ToolDescriptor, ToolKind};
use toolgate_registry::{
    builtin_tools, BoxedTool, HandlerTable, RegisterOutcome, Registry, RegistryFilter, Resolver,
};

use crate::dispatcher::{Dispatcher, ToolCall};
use crate::stats::{DispatchStats, ToolStatsView};

/// Explicit aggregate owning the dispatch-side components
pub struct ToolGateway {
    resolver: Arc<Resolver>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerTable>,
    pool: Arc<ConnectorPool>,
    stats: Arc<DispatchStats>,
    cache: Arc<ResultCache>,
    dispatcher: Dispatcher,
}

impl ToolGateway {
    pub fn new(dispatch_timeout: Duration) -> Self {
        let resolver = Arc::new(Resolver::new());
        let registry = Arc::new(Registry::new());
        let handlers = Arc::new(HandlerTable::new());
        let pool = Arc::new(ConnectorPool::new());
        let stats = Arc::new(DispatchStats::new());
        let cache = Arc::new(ResultCache::new());

        let dispatcher = Dispatcher::new(
            resolver.clone(),
            registry.clone(),
            handlers.clone(),
            pool.clone(),
            stats.clone(),
            dispatch_timeout,
        );

        Self {
            resolver,
            registry,
            handlers,
            pool,
            stats,
            cache,
            dispatcher,
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectorPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Subscribe to registry change events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Register the built-in local tool set.
    pub async fn register_builtins(&self) -> Result<()> {
        for (descriptor, handler) in builtin_tools() {
            self.register_function_tool(descriptor, handler).await?;
        }
        Ok(())
    }

    /// Register an in-process function tool together with its handler.
    pub async fn register_function_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: BoxedTool,
    ) -> Result<RegisterOutcome> {
        if descriptor.kind != ToolKind::Function {
            return Err(Error::invalid_argument(format!(
                "'{}' is not a function tool",
                descriptor.registry_id
            )));
        }
        let locator = descriptor.handler_locator.clone().ok_or_else(|| {
            Error::invalid_argument(format!(
                "function tool '{}' has no handler locator",
                descriptor.registry_id
            ))
        })?;
        if locator != handler.name() {
            return Err(Error::invalid_argument(format!(
                "handler locator '{}' does not match handler '{}'",
                locator,
                handler.name()
            )));
        }

        self.handlers.register(handler).await;
        self.registry.register(descriptor).await
    }

    /// Register a function tool whose handler is already loaded.
    pub async fn register_function_descriptor(
        &self,
        descriptor: ToolDescriptor,
    ) -> Result<RegisterOutcome> {
        let locator = descriptor.handler_locator.as_deref().unwrap_or_default();
        if self.handlers.get(locator).await.is_none() {
            return Err(Error::invalid_argument(format!(
                "no loaded handler named '{locator}'"
            )));
        }
        self.registry.register(descriptor).await
    }

    /// Register a remote tool server, creating its connector.
    pub async fn register_remote_server(
        &self,
        descriptor: ToolDescriptor,
    ) -> Result<RegisterOutcome> {
        if descriptor.kind != ToolKind::McpServer {
            return Err(Error::invalid_argument(format!(
                "'{}' is not a remote server descriptor",
                descriptor.registry_id
            )));
        }
        let outcome = self.registry.register(descriptor.clone()).await?;
        self.pool.ensure(&descriptor).await;
        Ok(outcome)
    }

    /// Unregister any tool; a remote server's connector is torn down.
    pub async fn unregister(&self, registry_id: &str) -> Result<Arc<ToolDescriptor>> {
        let descriptor = self.registry.unregister(registry_id).await?;
        if descriptor.is_remote() {
            self.pool.remove(registry_id).await;
        }
        Ok(descriptor)
    }

    pub async fn lookup(&self, registry_id: &str) -> Option<Arc<ToolDescriptor>> {
        self.registry.lookup(registry_id).await
    }

    pub async fn enumerate(&self, filter: &RegistryFilter) -> Vec<Arc<ToolDescriptor>> {
        self.registry.enumerate(filter).await
    }

    pub async fn set_enabled(&self, registry_id: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(registry_id, enabled).await
    }

    /// Dispatch one call through the full pipeline.
    pub async fn dispatch(&self, call: ToolCall) -> InvocationResult {
        self.dispatcher.dispatch(call).await
    }

    /// Dispatch several calls concurrently.
    pub async fn dispatch_batch(&self, calls: Vec<ToolCall>) -> Vec<InvocationResult> {
        self.dispatcher.dispatch_batch(calls).await
    }

    pub async fn stats_snapshot(&self) -> std::collections::HashMap<String, ToolStatsView> {
        self.stats.snapshot().await
    }

    pub async fn connectors_snapshot(&self) -> Vec<ConnectorInfo> {
        self.pool.snapshot().await
    }

    /// Aggregate status for the admin surface.
    pub async fn status(&self) -> Value {
        let (success, failure) = self.stats.totals().await;
        json!({
            "tool_count": self.registry.tool_count().await,
            "connector_count": self.pool.len().await,
            "handler_count": self.handlers.len().await,
            "alias_count": self.resolver.alias_count().await,
            "dispatch_success": success,
            "dispatch_failure": failure,
            "cache": self.cache.stats().await,
        })
    }

    /// Render the enabled tool set as agent-readable markdown.
    pub async fn describe_for_agent(&self) -> String {
        let tools = self.registry.enumerate(&RegistryFilter::enabled_only()).await;
        let mut out = String::from("# Available Tools\n");
        for tool in tools {
            let _ = writeln!(out, "\n## {} ({})", tool.registry_id, tool.kind);
            if !tool.description.is_empty() {
                let _ = writeln!(out, "{}", tool.description);
            }
            for capability in &tool.capabilities {
                let mut params: Vec<_> = capability.parameters.iter().collect();
                params.sort_by(|a, b| a.0.cmp(b.0));
                let rendered: Vec<String> = params
                    .iter()
                    .map(|(name, schema)| {
                        if schema.required {
                            format!("{name}*")
                        } else {
                            (*name).clone()
                        }
                    })
                    .collect();
                let _ = writeln!(
                    out,
                    "- `{}({})`: {}",
                    capability.name,
                    rendered.join(", "),
                    capability.description
                );
            }
        }
        out
    }

    /// Begin shutdown: refuse new dispatches and cancel in-flight remote
    /// calls.
    pub async fn shutdown(&self) {
        info!("Gateway shutting down dispatch paths");
        self.dispatcher.mark_shutting_down();
        self.pool.close_all().await;
    }
}
