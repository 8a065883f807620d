//! WebSocket handler for real-time presence updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tether_core::{Device, PresenceStatus};
use tether_engine::PresenceEvent;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "device")]
    Device(Device),
    #[serde(rename = "device_pending")]
    DevicePending(Device),
    #[serde(rename = "device_registered")]
    DeviceRegistered(Device),
    #[serde(rename = "presence_changed")]
    PresenceChanged {
        device: Device,
        from: PresenceStatus,
        to: PresenceStatus,
    },
    #[serde(rename = "device_expired")]
    DeviceExpired { address: String },
    #[serde(rename = "device_removed")]
    DeviceRemoved { address: String },
    #[serde(rename = "cycle_completed")]
    CycleCompleted {
        probed: usize,
        changed: usize,
        pending_created: usize,
        failed: usize,
    },
    #[serde(rename = "pong")]
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send the current device list on connect
    for device in state.registry.list_devices().await {
        let msg = WsMessage::Device(device);
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            // Forward presence events to the client
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = match event {
                            PresenceEvent::DevicePending(device) => {
                                WsMessage::DevicePending(device)
                            }
                            PresenceEvent::DeviceRegistered(device) => {
                                WsMessage::DeviceRegistered(device)
                            }
                            PresenceEvent::PresenceChanged { device, from, to } => {
                                WsMessage::PresenceChanged { device, from, to }
                            }
                            PresenceEvent::DeviceExpired(address) => {
                                WsMessage::DeviceExpired { address: address.to_string() }
                            }
                            PresenceEvent::DeviceRemoved(address) => {
                                WsMessage::DeviceRemoved { address: address.to_string() }
                            }
                            PresenceEvent::CycleCompleted { probed, changed, pending_created, failed } => {
                                WsMessage::CycleCompleted { probed, changed, pending_created, failed }
                            }
                        };

                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Event channel lagged");
                    }
                    Err(e) => {
                        debug!(error = %e, "Event channel closed");
                        break;
                    }
                }
            }

            // Handle incoming messages from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
