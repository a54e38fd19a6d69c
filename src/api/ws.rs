use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hub::{Hub, RoomKey, ServerEvent};
use crate::models::LocationSubmission;
use crate::tracking::TrackingManager;

#[derive(Clone)]
pub struct WsState {
    pub hub: Hub,
    pub manager: Arc<TrackingManager>,
}

/// Messages a participant sends to the hub.
///
/// Room memberships die with the connection: after a reconnect every join
/// must be re-issued or the participant silently stops receiving events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
enum ClientMessage {
    /// Join the tenant-wide room
    JoinBusiness { id: String },
    /// Join a single viewer's room (approach/arrival alerts)
    JoinUser { id: String },
    /// Join a work-order room
    JoinWorkOrder { id: String },
    /// Agent-side sample push over the transport instead of HTTP
    #[serde(rename = "gps:location-update")]
    LocationUpdate { submission: LocationSubmission },
}

/// WebSocket endpoint for agents and viewers
pub async fn ws_tracking(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut events_rx) = state.hub.connect().await;

    // Send connected message
    let connected_msg = ServerEvent::Connected {
        message: "Connected to crew tracking. Send join messages to receive room events."
            .to_string(),
    };
    if let Ok(json) = serde_json::to_string(&connected_msg) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward room events to the socket
    let forward_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to serialize event for socket");
                }
            }
        }
    });

    // Handle incoming messages from the participant
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::JoinBusiness { id }) => {
                    state
                        .hub
                        .join(connection_id, RoomKey::Business(id))
                        .await;
                }
                Ok(ClientMessage::JoinUser { id }) => {
                    state.hub.join(connection_id, RoomKey::User(id)).await;
                }
                Ok(ClientMessage::JoinWorkOrder { id }) => {
                    state
                        .hub
                        .join(connection_id, RoomKey::WorkOrder(id))
                        .await;
                }
                Ok(ClientMessage::LocationUpdate { submission }) => {
                    if let Err(e) = state.manager.ingest(submission).await {
                        // Invalid agent input is reported back on this
                        // connection only, never fatal to it
                        let event = ServerEvent::Error {
                            message: e.to_string(),
                        };
                        state.hub.send_to(connection_id, event).await;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "ignoring unparseable client message");
                }
            },
            Ok(Message::Ping(_)) => {
                // Axum handles pong automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup: membership must not outlive the connection
    forward_task.abort();
    state.hub.disconnect(connection_id).await;
    debug!(connection = %connection_id, "socket closed");
}
