//! Reachability probing
//!
//! A probe establishes a WebSocket connection and sends a `ping` frame.
//! Some providers never answer pings, so an established connection that
//! stays silent still counts as reachable; only a failed connect is
//! definitive unreachability.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use toolgate_core::wire::ControlRequest;

/// How long to wait for a ping reply before declaring the silent-but-
/// connected case reachable.
const REPLY_GRACE: Duration = Duration::from_secs(2);

/// Probe a provider endpoint within `deadline`.
pub async fn ping(endpoint: &str, deadline: Duration) -> bool {
    let connect = tokio::time::timeout(deadline, connect_async(endpoint));
    let (mut ws, _) = match connect.await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            debug!(endpoint, error = %e, "Probe connect failed");
            return false;
        }
        Err(_) => {
            debug!(endpoint, "Probe connect timed out");
            return false;
        }
    };

    let frame = ControlRequest::Ping {
        request_id: Some(uuid::Uuid::new_v4().to_string()),
    };
    let payload = match serde_json::to_string(&frame) {
        Ok(p) => p,
        Err(_) => return false,
    };
    if ws.send(Message::Text(payload)).await.is_err() {
        // Connection was established; treat a send race as reachable.
        return true;
    }

    match tokio::time::timeout(REPLY_GRACE, ws.next()).await {
        Ok(Some(Ok(_))) => true,
        // Silent or immediately closed after connect: still reachable.
        Ok(_) => true,
        Err(_) => true,
    }
}
