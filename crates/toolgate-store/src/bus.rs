//! Shared event bus
//!
//! The gateway mirrors registry changes onto an external pub/sub channel
//! so other services can react without polling. The bus is a
//! convenience: when it is unreachable the gateway keeps working and
//! publication failures are logged, never propagated.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Channel carrying registry change events
pub const TOOL_EVENTS_CHANNEL: &str = "tool_events";

/// Opaque publish/subscribe channel the gateway mirrors events onto
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a JSON payload on a channel. Best-effort; errors are
    /// surfaced for logging only.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Whether the bus currently looks reachable.
    async fn ping(&self) -> bool;
}

/// Redis-backed bus
pub struct RedisEventBus {
    conn: MultiplexedConnection,
}

impl RedisEventBus {
    /// Connect to Redis.
    ///
    /// URL format: `redis://localhost:6379` or `redis://:password@host:port`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Connecting to Redis event bus at {}", url);
        let client = Client::open(url).map_err(StoreError::Redis)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(StoreError::Redis)?;
        debug!(channel, "Published bus event");
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let result: std::result::Result<String, _> =
            redis::cmd("PING").query_async(&mut conn).await;
        result.map(|s| s == "PONG").unwrap_or(false)
    }
}

/// In-process bus used by tests and by deployments without Redis
pub struct LocalBus {
    sender: tokio::sync::broadcast::Sender<(String, String)>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(256);
        Self { sender }
    }

    /// Subscribe to all published (channel, payload) pairs.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<(String, String)> {
        self.sender.subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.sender.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Try to connect to Redis (optional, returns None if unavailable)
pub async fn try_connect_bus(url: &str) -> Option<RedisEventBus> {
    match RedisEventBus::new(url).await {
        Ok(bus) => Some(bus),
        Err(e) => {
            warn!("Event bus not available ({}): {}", url, e);
            None
        }
    }
}
