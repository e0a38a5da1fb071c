//! `GET /ws` — a single long-lived socket multiplexes subscriptions to
//! any number of jobs' progress streams (§6). Clients send
//! `{"type":"subscribe","jobId":"..."}`; ill-formed messages are ignored
//! rather than closing the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe { #[serde(rename = "jobId")] job_id: Uuid },
    Unsubscribe { #[serde(rename = "jobId")] job_id: Uuid },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerAck {
    Subscribed { #[serde(rename = "jobId")] job_id: Uuid },
    Unsubscribed { #[serde(rename = "jobId")] job_id: Uuid },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut subscriptions: Vec<(Uuid, beamforge_bus::SubscriptionHandle)> = Vec::new();
    let (tx, mut forwarded) = tokio::sync::mpsc::channel::<String>(256);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { job_id }) => {
                                let (handle, mut rx) = state.bus.subscribe(job_id).await;
                                subscriptions.push((job_id, handle));
                                let tx = tx.clone();
                                tokio::spawn(async move {
                                    while let Some(message) = rx.recv().await {
                                        if let Ok(json) = serde_json::to_string(&message) {
                                            if tx.send(json).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                });
                                if let Ok(ack) = serde_json::to_string(&ServerAck::Subscribed { job_id }) {
                                    let _ = tx.send(ack).await;
                                }
                            }
                            Ok(ClientMessage::Unsubscribe { job_id }) => {
                                if let Some(pos) = subscriptions.iter().position(|(id, _)| *id == job_id) {
                                    let (_, handle) = subscriptions.remove(pos);
                                    state.bus.unsubscribe(handle).await;
                                }
                                if let Ok(ack) = serde_json::to_string(&ServerAck::Unsubscribed { job_id }) {
                                    let _ = tx.send(ack).await;
                                }
                            }
                            Err(_) => {
                                // Ill-formed client message: ignore, keep the connection open.
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            outgoing = forwarded.recv() => {
                match outgoing {
                    Some(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    for (_, handle) in subscriptions {
        state.bus.unsubscribe(handle).await;
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}
