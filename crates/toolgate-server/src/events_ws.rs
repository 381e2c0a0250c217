//! Real-time change-stream WebSocket
//!
//! Clients connecting to `/api/v1/events/tools` first receive a welcome
//! snapshot of all enabled tools, then incremental change events as
//! they commit. Clients may send `ping`, `subscribe` and `get_tools`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toolgate_core::wire::{EventsClientMessage, EventsFrame, WireTool};
use toolgate_registry::RegistryFilter;

use crate::state::AppState;

pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

async fn enabled_snapshot(state: &AppState) -> Vec<WireTool> {
    state
        .gateway
        .enumerate(&RegistryFilter::enabled_only())
        .await
        .iter()
        .map(|d| WireTool::from_descriptor(d))
        .collect()
}

async fn handle_events_socket(socket: WebSocket, state: AppState) {
    info!("Events client connected");
    let (mut sender, mut receiver) = socket.split();

    // Attach before the welcome goes out so no event committed after
    // the snapshot can slip past this client; queued events drain after
    // the welcome frame.
    let (client_id, mut events_rx) = state.fanout.add_client().await;

    let tools = enabled_snapshot(&state).await;
    let welcome = EventsFrame::Welcome {
        total_count: tools.len(),
        tools,
    };
    let payload = match serde_json::to_string(&welcome) {
        Ok(payload) => payload,
        Err(_) => return,
    };
    if sender.send(Message::Text(payload)).await.is_err() {
        warn!("Failed to send welcome frame");
        state.fanout.remove_client(client_id).await;
        return;
    }
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(payload) => {
                            if sender.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                reply = out_rx.recv() => {
                    match reply {
                        Some(payload) => {
                            if sender.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame = match serde_json::from_str::<EventsClientMessage>(&text) {
                    Ok(frame) => frame,
                    Err(_) => {
                        let reply = EventsFrame::Error {
                            message: "unrecognized message".into(),
                        };
                        let _ = out_tx
                            .send(serde_json::to_string(&reply).unwrap_or_default())
                            .await;
                        continue;
                    }
                };

                let reply = match frame {
                    EventsClientMessage::Ping => EventsFrame::Pong,
                    // Subscription is implicit on connect; both requests
                    // answer with the current snapshot.
                    EventsClientMessage::Subscribe | EventsClientMessage::GetTools => {
                        let tools = enabled_snapshot(&state).await;
                        EventsFrame::Tools {
                            total_count: tools.len(),
                            tools,
                        }
                    }
                };
                if out_tx
                    .send(serde_json::to_string(&reply).unwrap_or_default())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.fanout.remove_client(client_id).await;
    writer.abort();
    let _ = (&mut writer).await;
    debug!(client = client_id, "Events client disconnected");
}
