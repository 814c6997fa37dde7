//! WebSocket control channel to the robot bridge
//!
//! JSON envelopes, one per text frame:
//!
//! ```text
//! -> {"type":"publish",   "topic":..., "data":...}
//! -> {"type":"request",   "id":N, "topic":..., "data":...}
//! -> {"type":"subscribe", "topic":...}
//! <- {"type":"response",  "id":N, "code":0, "data":...}
//! <- {"type":"message",   "topic":..., "data":...}
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::channel::{ChannelConnector, ControlChannel};
use crate::error::{AppError, Result};

const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outgoing<'a> {
    Publish { topic: &'a str, data: Value },
    Request { id: u64, topic: &'a str, data: Value },
    Subscribe { topic: &'a str },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Incoming {
    Response {
        id: u64,
        #[serde(default)]
        code: i32,
        #[serde(default)]
        data: Value,
    },
    Message {
        topic: String,
        #[serde(default)]
        data: Value,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type Subscriptions = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// Connects to a bridge URL such as `ws://192.168.123.161:8081/bridge`
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_robot_config(config: &crate::config::RobotConfig) -> Self {
        Self::new(
            config.bridge_url.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self) -> Result<Arc<dyn ControlChannel>> {
        info!("Connecting to robot bridge at {}", self.url);
        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        self.url, self.connect_timeout
                    ))
                })?
                .map_err(|e| AppError::Transport(format!("connect to {} failed: {}", self.url, e)))?;

        Ok(Arc::new(WsControlChannel::spawn(ws, self.request_timeout)))
    }
}

/// Control channel over a WebSocket stream
///
/// A reader task routes responses to waiting requests and topic messages to
/// subscribers; a writer task owns the sink.
pub struct WsControlChannel {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    subscriptions: Subscriptions,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsControlChannel {
    pub fn spawn<S>(ws: WebSocketStream<S>, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let writer_open = open.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!("Control channel write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        let reader_open = open.clone();
        let reader_pending = pending.clone();
        let reader_subs = subscriptions.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => route_incoming(&text, &reader_pending, &reader_subs),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Control channel read failed: {}", e);
                        break;
                    }
                }
            }

            reader_open.store(false, Ordering::SeqCst);
            for (_, waiter) in reader_pending.lock().drain() {
                let _ = waiter.send(Err(AppError::Transport("control channel closed".into())));
            }
            reader_subs.lock().clear();
            info!("Control channel closed");
        });

        Self {
            outgoing,
            pending,
            subscriptions,
            next_id: AtomicU64::new(1),
            open,
            request_timeout,
            reader,
            writer,
        }
    }

    fn send(&self, envelope: &Outgoing<'_>) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::Transport("control channel closed".into()));
        }
        let text = serde_json::to_string(envelope)?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| AppError::Transport("control channel writer stopped".into()))
    }
}

fn route_incoming(text: &str, pending: &Pending, subscriptions: &Subscriptions) {
    let incoming = match serde_json::from_str::<Incoming>(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!("Ignoring unrecognized bridge frame: {}", e);
            return;
        }
    };

    match incoming {
        Incoming::Response { id, code, data } => {
            let Some(waiter) = pending.lock().remove(&id) else {
                debug!(id, "Response for unknown or expired request");
                return;
            };
            let result = if code == 0 {
                Ok(data)
            } else {
                Err(AppError::Transport(format!("request rejected with code {}", code)))
            };
            let _ = waiter.send(result);
        }
        Incoming::Message { topic, data } => {
            let mut subs = subscriptions.lock();
            if let Some(senders) = subs.get_mut(&topic) {
                senders.retain(|tx| match tx.try_send(data.clone()) {
                    Ok(()) => true,
                    // Subscriber is behind; it will catch the next report
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}

#[async_trait]
impl ControlChannel for WsControlChannel {
    async fn publish(&self, topic: &str, data: Value) -> Result<()> {
        self.send(&Outgoing::Publish { topic, data })
    }

    async fn request(&self, topic: &str, data: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send(&Outgoing::Request { id, topic, data }) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::Transport("control channel closed".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(AppError::Timeout(format!(
                    "no acknowledgement on {} within {:?}",
                    topic, self.request_timeout
                )))
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Value>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscriptions
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        self.send(&Outgoing::Subscribe { topic })?;
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
        }
        self.reader.abort();
        self.subscriptions.lock().clear();
        for (_, waiter) in self.pending.lock().drain() {
            let _ = waiter.send(Err(AppError::Transport("control channel closed".into())));
        }
    }
}

impl Drop for WsControlChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::channel::{loco_request, topics, API_SET_FSM_ID};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Loopback bridge: acks requests with `code`, echoes publishes back as
    /// topic messages after a subscribe, and records every envelope.
    async fn spawn_bridge(code: i32) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            while let Some(Ok(Message::Text(text))) = rx.next().await {
                let envelope: Value = serde_json::from_str(&text).unwrap();
                let _ = seen_tx.send(envelope.clone());
                match envelope["type"].as_str() {
                    Some("request") => {
                        if envelope["topic"] == "silent" {
                            continue;
                        }
                        let reply = json!({"type": "response", "id": envelope["id"], "code": code, "data": {}});
                        tx.send(Message::Text(reply.to_string())).await.unwrap();
                    }
                    Some("subscribe") => {
                        let report = json!({"type": "message", "topic": envelope["topic"], "data": {"power_v": 48.5}});
                        tx.send(Message::Text(report.to_string())).await.unwrap();
                    }
                    Some("publish") if envelope["topic"] == "drop" => break,
                    _ => {}
                }
            }
        });

        (format!("ws://{}", addr), seen_rx)
    }

    fn connector(url: String) -> WsConnector {
        WsConnector::new(url, Duration::from_secs(2), Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_request_ack_and_publish() {
        let (url, mut seen) = spawn_bridge(0).await;
        let channel = connector(url).connect().await.unwrap();

        channel
            .request(topics::LOCO_REQUEST, loco_request(API_SET_FSM_ID, 4))
            .await
            .unwrap();
        let request = seen.recv().await.unwrap();
        assert_eq!(request["type"], "request");
        assert_eq!(request["topic"], topics::LOCO_REQUEST);

        channel
            .publish(topics::WIRELESS_CONTROLLER, json!({"lx": 0.0}))
            .await
            .unwrap();
        let publish = seen.recv().await.unwrap();
        assert_eq!(publish["type"], "publish");
    }

    #[tokio::test]
    async fn test_rejected_and_unanswered_requests() {
        let (url, _seen) = spawn_bridge(3104).await;
        let channel = connector(url).connect().await.unwrap();

        let rejected = channel.request(topics::LOCO_REQUEST, json!({})).await;
        assert!(matches!(rejected, Err(AppError::Transport(_))));

        let silent = channel.request("silent", json!({})).await;
        assert!(matches!(silent, Err(AppError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_subscription_receives_and_closes_with_channel() {
        let (url, _seen) = spawn_bridge(0).await;
        let channel = connector(url).connect().await.unwrap();

        let mut reports = channel.subscribe(topics::LOW_STATE).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report["power_v"], 48.5);

        channel.publish("drop", json!(null)).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(2), reports.recv()).await.unwrap();
        assert!(closed.is_none());
        assert!(!channel.is_open());
        assert!(matches!(
            channel.publish("after", json!(null)).await,
            Err(AppError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = connector(format!("ws://{}", addr)).connect().await;
        assert!(matches!(result, Err(AppError::Transport(_))));
    }
}
