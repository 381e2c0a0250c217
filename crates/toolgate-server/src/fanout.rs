//! Event fan-out
//!
//! Registry change events flow to two sinks: the shared event bus (one
//! publication per event, best-effort) and every connected fan-out
//! WebSocket. Per-client queues are bounded; a consumer that cannot
//! keep up is disconnected rather than allowed to stall the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolgate_core::wire::{ToolEvent, ToolEventType, WireTool};
use toolgate_core::{RegistryEvent, RegistryEventKind};
use toolgate_store::{EventBus, TOOL_EVENTS_CHANNEL};

/// Outgoing frames buffered per client before it is declared slow
const CLIENT_QUEUE: usize = 256;

/// Multiplexer from registry events to bus and WebSocket clients
pub struct FanOut {
    clients: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    bus: Option<Arc<dyn EventBus>>,
}

impl FanOut {
    pub fn new(bus: Option<Arc<dyn EventBus>>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    /// Attach a fan-out client; the receiver drains its private queue.
    pub async fn add_client(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().await.insert(id, tx);
        debug!(client = id, "Fan-out client attached");
        (id, rx)
    }

    pub async fn remove_client(&self, id: u64) {
        if self.clients.lock().await.remove(&id).is_some() {
            debug!(client = id, "Fan-out client detached");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Deliver one event to the bus and all clients, FIFO per consumer.
    pub async fn broadcast(&self, event: &ToolEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Event serialization failed");
                return;
            }
        };

        // Bus publication is a convenience; local truth already
        // committed, so failures are logged and broadcast continues.
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(TOOL_EVENTS_CHANNEL, &payload).await {
                warn!(error = %e, "Event bus publish failed");
            }
        }

        let mut slow = Vec::new();
        {
            let clients = self.clients.lock().await;
            for (id, tx) in clients.iter() {
                if tx.try_send(payload.clone()).is_err() {
                    slow.push(*id);
                }
            }
        }
        for id in slow {
            warn!(client = id, "Disconnecting slow fan-out consumer");
            self.remove_client(id).await;
        }
    }

    /// Pump registry events into the fan-out until cancellation.
    pub async fn run(
        fanout: Arc<Self>,
        mut events: broadcast::Receiver<RegistryEvent>,
        cancel: CancellationToken,
    ) {
        info!("Event fan-out started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Event fan-out shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            let wire_event = map_event(&event);
                            fanout.broadcast(&wire_event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Fan-out lagged behind registry events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

/// Translate an internal registry event into its wire form.
fn map_event(event: &RegistryEvent) -> ToolEvent {
    let tool_spec = event
        .descriptor
        .as_ref()
        .map(|d| WireTool::from_descriptor(d));
    let event_type = match event.kind {
        RegistryEventKind::Added => ToolEventType::Register,
        RegistryEventKind::Removed => ToolEventType::Unregister,
        // An update either brings a tool back into service or takes it
        // out of it, depending on the resulting enabled flag.
        RegistryEventKind::Updated => match &event.descriptor {
            Some(descriptor) if !descriptor.enabled => ToolEventType::ToolRemoved,
            _ => ToolEventType::ToolAvailable,
        },
    };
    ToolEvent::new(event_type, event.registry_id.clone(), tool_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::ToolDescriptor;
    use toolgate_store::LocalBus;

    fn added_event(id: &str) -> RegistryEvent {
        RegistryEvent {
            kind: RegistryEventKind::Added,
            registry_id: id.to_string(),
            descriptor: Some(Arc::new(ToolDescriptor::mcp_server(
                id,
                id,
                "",
                "ws://127.0.0.1:9000/mcp",
            ))),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_clients_in_order() {
        let fanout = FanOut::new(None);
        let (_, mut rx) = fanout.add_client().await;

        fanout
            .broadcast(&ToolEvent::new(ToolEventType::Register, "a", None))
            .await;
        fanout
            .broadcast(&ToolEvent::new(ToolEventType::Unregister, "a", None))
            .await;

        let first: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["event_type"], "register");
        assert_eq!(second["event_type"], "unregister");
    }

    #[tokio::test]
    async fn test_slow_consumer_disconnected() {
        let fanout = FanOut::new(None);
        let (id, rx) = fanout.add_client().await;
        // Never drain rx; fill the queue past its bound.
        for i in 0..(CLIENT_QUEUE + 10) {
            fanout
                .broadcast(&ToolEvent::new(
                    ToolEventType::Register,
                    format!("t{i}"),
                    None,
                ))
                .await;
        }
        assert_eq!(fanout.client_count().await, 0);
        drop(rx);
        fanout.remove_client(id).await;
    }

    #[tokio::test]
    async fn test_bus_receives_events() {
        let bus = Arc::new(LocalBus::new());
        let mut bus_rx = bus.subscribe();
        let fanout = FanOut::new(Some(bus.clone() as Arc<dyn EventBus>));

        fanout
            .broadcast(&ToolEvent::new(ToolEventType::Register, "T1", None))
            .await;

        let (channel, payload) = bus_rx.recv().await.unwrap();
        assert_eq!(channel, TOOL_EVENTS_CHANNEL);
        let event: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(event["tool_id"], "T1");
    }

    #[tokio::test]
    async fn test_event_mapping() {
        let registered = map_event(&added_event("x"));
        assert_eq!(registered.event_type, ToolEventType::Register);
        assert!(registered.tool_spec.is_some());

        let removed = map_event(&RegistryEvent {
            kind: RegistryEventKind::Removed,
            registry_id: "x".into(),
            descriptor: None,
        });
        assert_eq!(removed.event_type, ToolEventType::Unregister);

        let mut disabled = ToolDescriptor::mcp_server("x", "x", "", "ws://h/mcp");
        disabled.enabled = false;
        let updated = map_event(&RegistryEvent {
            kind: RegistryEventKind::Updated,
            registry_id: "x".into(),
            descriptor: Some(Arc::new(disabled)),
        });
        assert_eq!(updated.event_type, ToolEventType::ToolRemoved);
    }
}
