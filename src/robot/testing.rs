//! In-memory control channel used by session and dispatch tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::channel::{ChannelConnector, ControlChannel};
use crate::error::{AppError, Result};

#[derive(Default)]
pub(crate) struct FakeChannel {
    closed: AtomicBool,
    subscribers: Mutex<Vec<(String, mpsc::Sender<Value>)>>,
    pub published: Mutex<Vec<(String, Value)>>,
    pub requests: Mutex<Vec<(String, Value)>>,
    pub reject_requests: AtomicBool,
}

impl FakeChannel {
    /// Deliver a message to every subscriber of `topic`
    pub fn push(&self, topic: &str, data: Value) {
        for (t, tx) in self.subscribers.lock().iter() {
            if t == topic {
                let _ = tx.try_send(data.clone());
            }
        }
    }

    /// Simulate the link going away
    pub fn drop_link(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.published.lock().len() + self.requests.lock().len()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    async fn publish(&self, topic: &str, data: Value) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::Transport("control channel closed".into()));
        }
        self.published.lock().push((topic.to_string(), data));
        Ok(())
    }

    async fn request(&self, topic: &str, data: Value) -> Result<Value> {
        if !self.is_open() {
            return Err(AppError::Transport("control channel closed".into()));
        }
        self.requests.lock().push((topic.to_string(), data));
        if self.reject_requests.load(Ordering::SeqCst) {
            return Err(AppError::Transport("request rejected with code 3104".into()));
        }
        Ok(Value::Null)
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Value>> {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().push((topic.to_string(), tx));
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.drop_link();
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    pub channels: Mutex<Vec<Arc<FakeChannel>>>,
    pub fail: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn latest(&self) -> Arc<FakeChannel> {
        self.channels.lock().last().cloned().expect("no channel opened")
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn ControlChannel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Transport("connection refused".into()));
        }
        let channel = Arc::new(FakeChannel::default());
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}
