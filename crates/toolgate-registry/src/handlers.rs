//! Local tool trait and handler table
//!
//! Function tools run inside the gateway process. A descriptor's
//! `handler_locator` keys into this table; the table owns nothing about
//! scheduling or validation, it just maps locators to callables.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Core trait for in-process tools
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Stable handler name (the locator registered in the table)
    fn name(&self) -> &str;

    /// Execute one action with validated parameters
    async fn execute(&self, action: &str, parameters: Map<String, Value>) -> Result<Value>;
}

/// Type alias for shared tools
pub type BoxedTool = Arc<dyn LocalTool>;

/// Closure-backed tool for simple handlers and tests
pub struct FnTool {
    name: String,
    handler: Arc<dyn Fn(&str, &Map<String, Value>) -> Result<Value> + Send + Sync>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl LocalTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, action: &str, parameters: Map<String, Value>) -> Result<Value> {
        (self.handler)(action, &parameters)
    }
}

/// Handler table keyed by handler locator
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, BoxedTool>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, tool: BoxedTool) {
        debug!(handler = %tool.name(), "Handler registered");
        self.handlers
            .write()
            .await
            .insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, locator: &str) -> Option<BoxedTool> {
        self.handlers.read().await.get(locator).cloned()
    }

    pub async fn remove(&self, locator: &str) -> bool {
        self.handlers.write().await.remove(locator).is_some()
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}
