//! Server side of the push channel: one broadcast hub, one forwarding task
//! per connected socket. Delivery is best effort; a slow subscriber drops
//! events rather than stalling the hub.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::AppState;

/// Wire format of the push channel. Consumers ignore unknown `type` values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

pub mod event_kinds {
    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const POLL_UPDATE: &str = "poll.update";
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Envelope>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, kind: &str, payload: Value) {
        let receivers = self
            .tx
            .send(Envelope {
                kind: kind.to_string(),
                payload,
            })
            .unwrap_or(0);
        tracing::debug!(kind, receivers, "push event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, events))
}

async fn serve_socket(mut socket: WebSocket, mut events: broadcast::Receiver<Envelope>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(envelope) => {
                    let frame = match serde_json::to_string(&envelope) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!("failed to encode push envelope: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    tracing::warn!(dropped, "push subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // Clients only listen on this channel; axum answers pings.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("push socket error: {}", e);
                    break;
                }
            },
        }
    }
}
