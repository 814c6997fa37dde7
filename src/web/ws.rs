//! Event WebSocket at `/ws`
//!
//! Clients choose what they receive:
//!
//! ```json
//! {"type": "subscribe", "payload": {"topics": ["session.*", "command.dispatched"]}}
//! ```
//!
//! Nothing is sent until the first subscribe.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut shutdown = state.shutdown_tx.subscribe();
    let mut topics: Vec<String> = Vec::new();
    let mut ping = tokio::time::interval(PING_INTERVAL);

    info!("Event client connected");

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = apply_client_message(&text, &mut topics) {
                        warn!("Ignoring malformed client message: {}", e);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Event socket receive error: {}", e);
                    break;
                }
                _ => {}
            },

            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => SystemEvent::SystemError {
                        module: "ws".to_string(),
                        message: format!("lagged by {} events", n),
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !should_send(&event, &topics) {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize {}: {}", event.event_name(), e),
                }
            }

            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            _ = shutdown.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!("Event client disconnected");
}

fn apply_client_message(text: &str, topics: &mut Vec<String>) -> serde_json::Result<()> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Subscribe { topics: new } => {
            debug!("Event client subscribed to {:?}", new);
            *topics = new;
        }
        ClientMessage::Unsubscribe { topics: removed } => {
            topics.retain(|t| !removed.contains(t));
        }
        ClientMessage::Ping => {}
    }
    Ok(())
}

fn should_send(event: &SystemEvent, topics: &[String]) -> bool {
    topics.iter().any(|topic| event.matches_topic(topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients_changed() -> SystemEvent {
        SystemEvent::StreamClientsChanged { clients: 2 }
    }

    #[test]
    fn test_subscribe_then_unsubscribe() {
        let mut topics = Vec::new();
        apply_client_message(
            r#"{"type":"subscribe","payload":{"topics":["stream.*","session.state_changed"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert!(should_send(&clients_changed(), &topics));

        apply_client_message(
            r#"{"type":"unsubscribe","payload":{"topics":["stream.*"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert!(!should_send(&clients_changed(), &topics));
        assert_eq!(topics, vec!["session.state_changed".to_string()]);
    }

    #[test]
    fn test_nothing_sent_without_subscription() {
        assert!(!should_send(&clients_changed(), &[]));
        assert!(should_send(&clients_changed(), &["*".to_string()]));
    }

    #[test]
    fn test_malformed_message_keeps_topics() {
        let mut topics = vec!["*".to_string()];
        assert!(apply_client_message("not json", &mut topics).is_err());
        assert!(apply_client_message(r#"{"type":"ping"}"#, &mut topics).is_ok());
        assert_eq!(topics, vec!["*".to_string()]);
    }
}
