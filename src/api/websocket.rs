//! WebSocket event stream
//!
//! Every client receives the round events as `{"event", "data"}` frames.
//! Clients may also send `{"action": "cashout", "playerId", "roundId"}`;
//! the outcome is answered on the same socket only.

use super::handlers::AppState;
use super::models::{CashoutRequest, CashoutResponse};
use crate::engine::CrashEngine;
use crate::events::BroadcastHub;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Frames sent to a single client, outside the shared event stream
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Connected {
        client_id: String,
        round_id: Option<u64>,
    },
    CashoutSuccess(CashoutResponse),
    CashoutError {
        message: String,
        code: String,
    },
}

/// Messages accepted from clients
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Cashout(CashoutRequest),
}

/// WebSocket connection manager
#[derive(Clone)]
pub struct WebSocketManager {
    hub: BroadcastHub,
    engine: Arc<CrashEngine>,
    client_count: Arc<AtomicU64>,
}

impl WebSocketManager {
    pub fn new(hub: BroadcastHub, engine: Arc<CrashEngine>) -> Self {
        Self {
            hub,
            engine,
            client_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle_upgrade(&self, ws: WebSocketUpgrade) -> Response {
        let manager = self.clone();
        ws.on_upgrade(move |socket| async move { manager.handle_connection(socket).await })
    }

    async fn handle_connection(&self, socket: WebSocket) {
        let client_id = generate_client_id();
        let client_count = self.client_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(client_id = %client_id, total = client_count, "WebSocket client connected");

        let (mut sender, mut receiver) = socket.split();
        let mut events = self.hub.subscribe();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ClientFrame>();

        let welcome = ClientFrame::Connected {
            client_id: client_id.clone(),
            round_id: self.engine.latest_round().map(|r| r.round_id),
        };
        if let Err(e) = send_json(&mut sender, &welcome).await {
            warn!(client_id = %client_id, error = %e, "Failed to send welcome message");
            self.client_count.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        let engine = self.engine.clone();
        let client_for_recv = client_id.clone();
        let mut receive_task = tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(reply) = handle_client_message(&engine, &text).await {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!(client_id = %client_for_recv, "Client requested close");
                        break;
                    }
                    Err(e) => {
                        warn!(client_id = %client_for_recv, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        });

        let client_for_send = client_id.clone();
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => match event.to_frame() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(client_id = %client_for_send, skipped, "Client fell behind the event stream");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(reply) => match serde_json::to_string(&reply) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize reply");
                                continue;
                            }
                        },
                        None => break,
                    },
                };

                if sender.send(Message::Text(frame)).await.is_err() {
                    debug!(client_id = %client_for_send, "Client disconnected");
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut receive_task => send_task.abort(),
            _ = &mut send_task => receive_task.abort(),
        }

        let remaining = self.client_count.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(client_id = %client_id, remaining, "WebSocket client disconnected");
    }

    pub fn client_count(&self) -> u64 {
        self.client_count.load(Ordering::SeqCst)
    }
}

/// Returns the reply for the sender, if any
pub async fn handle_client_message(engine: &CrashEngine, text: &str) -> Option<ClientFrame> {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, "Rejecting unrecognised client message");
            return Some(ClientFrame::CashoutError {
                message: format!("Invalid message: {}", e),
                code: "BAD_REQUEST".to_string(),
            });
        }
    };

    match action {
        ClientAction::Cashout(request) => {
            match engine.process_cashout(&request.player_id, request.round_id).await {
                Ok(settlement) => Some(ClientFrame::CashoutSuccess(settlement.into())),
                Err(e) => Some(ClientFrame::CashoutError {
                    message: e.to_string(),
                    code: e.code().to_string(),
                }),
            }
        }
    }
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> Result<(), String>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    T: Serialize,
{
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    sender.send(Message::Text(text)).await.map_err(|e| e.to_string())
}

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    state.websocket_manager.handle_upgrade(ws)
}

fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("ws_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
