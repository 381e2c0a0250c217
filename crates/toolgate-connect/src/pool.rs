//! Connector pool
//!
//! One `Connector` per registered remote provider, keyed by registry
//! id. Registration inserts an entry, unregistration tears it down.
//! Callers only ever see the request/response facade on [`Connector`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use toolgate_core::ToolDescriptor;

use crate::connector::{Connector, ConnectorInfo};

/// Pool of per-provider connectors
pub struct ConnectorPool {
    connectors: RwLock<HashMap<String, Arc<Connector>>>,
}

impl ConnectorPool {
    pub fn new() -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the connector for a remote descriptor.
    ///
    /// Returns None for descriptors without an endpoint (local tools
    /// never enter the pool).
    pub async fn ensure(&self, descriptor: &ToolDescriptor) -> Option<Arc<Connector>> {
        let endpoint = descriptor.endpoint.as_deref()?;

        let mut connectors = self.connectors.write().await;
        let connector = connectors
            .entry(descriptor.registry_id.clone())
            .or_insert_with(|| {
                debug!(tool_id = %descriptor.registry_id, endpoint, "Connector created");
                Arc::new(Connector::new(
                    descriptor.registry_id.clone(),
                    endpoint.to_string(),
                    descriptor.connect_params(),
                ))
            });
        Some(connector.clone())
    }

    pub async fn get(&self, registry_id: &str) -> Option<Arc<Connector>> {
        self.connectors.read().await.get(registry_id).cloned()
    }

    /// Tear down the connector for an unregistered provider.
    pub async fn remove(&self, registry_id: &str) -> bool {
        let removed = self.connectors.write().await.remove(registry_id);
        match removed {
            Some(connector) => {
                connector.close().await;
                debug!(tool_id = %registry_id, "Connector removed");
                true
            }
            None => false,
        }
    }

    /// Recycle a degraded connector's transport without dropping the
    /// pool entry. Used by the health sweep.
    pub async fn reset(&self, registry_id: &str) -> bool {
        match self.get(registry_id).await {
            Some(connector) => {
                connector.reset().await;
                true
            }
            None => false,
        }
    }

    /// Close every connector; pending calls resolve with `disabled`.
    pub async fn close_all(&self) {
        let connectors: Vec<_> = {
            let mut map = self.connectors.write().await;
            map.drain().map(|(_, c)| c).collect()
        };
        info!(count = connectors.len(), "Closing all connectors");
        for connector in connectors {
            connector.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.connectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connectors.read().await.is_empty()
    }

    /// Snapshot of all connectors for the debug endpoint.
    pub async fn snapshot(&self) -> Vec<ConnectorInfo> {
        let connectors = self.connectors.read().await;
        let mut infos: Vec<_> = connectors.values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.registry_id.cmp(&b.registry_id));
        infos
    }
}

impl Default for ConnectorPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorState;

    fn remote(id: &str) -> ToolDescriptor {
        ToolDescriptor::mcp_server(id, id, "test", format!("ws://127.0.0.1:9000/{id}"))
    }

    fn local(id: &str) -> ToolDescriptor {
        ToolDescriptor::function(id, id, "test", format!("h.{id}"))
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let pool = ConnectorPool::new();
        let descriptor = remote("browser");

        let a = pool.ensure(&descriptor).await.unwrap();
        let b = pool.ensure(&descriptor).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_local_descriptor_has_no_connector() {
        let pool = ConnectorPool::new();
        assert!(pool.ensure(&local("echo")).await.is_none());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_closes_connector() {
        let pool = ConnectorPool::new();
        let connector = pool.ensure(&remote("browser")).await.unwrap();

        assert!(pool.remove("browser").await);
        assert!(!pool.remove("browser").await);
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert!(pool.get("browser").await.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let pool = ConnectorPool::new();
        let a = pool.ensure(&remote("a")).await.unwrap();
        let b = pool.ensure(&remote("b")).await.unwrap();

        pool.close_all().await;
        assert!(pool.is_empty().await);
        assert_eq!(a.state(), ConnectorState::Closed);
        assert_eq!(b.state(), ConnectorState::Closed);
    }

    #[tokio::test]
    async fn test_snapshot_sorted() {
        let pool = ConnectorPool::new();
        pool.ensure(&remote("zeta")).await.unwrap();
        pool.ensure(&remote("alpha")).await.unwrap();

        let infos = pool.snapshot().await;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].registry_id, "alpha");
        assert_eq!(infos[1].registry_id, "zeta");
    }
}
