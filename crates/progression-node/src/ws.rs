//! WebSocket streaming of progression events.
//!
//! Clients connecting to `/api/v1/ws/progression` receive a `snapshot` of
//! the current status, then every [`ProgressionEvent`] as it is committed.
//! A `heartbeat` goes out every 30 seconds. A client that falls behind the
//! broadcast buffer is sent a fresh snapshot instead of the missed events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use progression_engine::{EventSink, ProgressionEvent, ProgressionStatus};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::node::AppState;

/// Events buffered per subscriber before it counts as lagging.
pub const EVENT_BUFFER: usize = 256;

/// Publishes engine events to every connected stream.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressionEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: ProgressionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Stream messages that are not engine events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    Snapshot { status: ProgressionStatus },
    Heartbeat { timestamp: u64 },
}

/// WebSocket handler for progression events
pub async fn ws_progression_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_progression_socket(socket, state))
}

async fn handle_progression_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected for progression events");

    let mut events = state.sink.subscribe();
    let snapshot = StreamMessage::Snapshot {
        status: state.engine.status().await,
    };
    if let Err(e) = send_json(&mut socket, &snapshot).await {
        warn!(error = %e, "Failed to send initial snapshot");
        return;
    }

    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(30));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!(error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(%text, "Ignoring client message");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                let sent = match event {
                    Ok(event) => send_json(&mut socket, &event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event stream lagged, resending snapshot");
                        let snapshot = StreamMessage::Snapshot {
                            status: state.engine.status().await,
                        };
                        send_json(&mut socket, &snapshot).await
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = sent {
                    warn!(error = %e, "Failed to send event");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                if let Err(e) = send_json(&mut socket, &StreamMessage::Heartbeat { timestamp }).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    break;
                }
            }
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, message: &T) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(json)).await
}
