//! Control channel abstraction
//!
//! The robot is reached over a named-topic channel with three primitives:
//! fire-and-forget publish, request/acknowledge, and topic subscription.
//! The transport behind it is an external collaborator.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::commands::WalkCommand;
use crate::error::Result;

pub mod topics {
    /// Virtual joystick input
    pub const WIRELESS_CONTROLLER: &str = "rt/wirelesscontroller";
    /// Locomotion API requests
    pub const LOCO_REQUEST: &str = "rt/api/loco/request";
    /// Low-level state reports (battery, temperatures, power)
    pub const LOW_STATE: &str = "rt/lf/lowstate";
}

/// Locomotion API: set FSM state
pub const API_SET_FSM_ID: i32 = 7101;
/// Locomotion API: set balance mode
pub const API_SET_BALANCE_MODE: i32 = 7102;

/// An established control-channel session
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Publish without waiting for any acknowledgement
    async fn publish(&self, topic: &str, data: Value) -> Result<()>;

    /// Publish a request and wait for its acknowledgement
    ///
    /// A rejected request is a `Transport` error; no answer within the
    /// channel's request timeout is a `Timeout`.
    async fn request(&self, topic: &str, data: Value) -> Result<Value>;

    /// Receive every message published on `topic`
    ///
    /// The receiver closes when the channel does.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Value>>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Opens control channels
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ControlChannel>>;
}

/// Body of a locomotion API request
pub fn loco_request(api_id: i32, data: i32) -> Value {
    // Request ids only need to be unique per session
    let id = (uuid::Uuid::new_v4().as_u128() as i64) & i64::MAX;
    json!({
        "header": {
            "identity": { "id": id, "api_id": api_id }
        },
        "parameter": json!({ "data": data }).to_string(),
    })
}

/// Joystick frame for the wireless controller topic
pub fn wireless_controller(walk: &WalkCommand) -> Value {
    json!({
        "lx": walk.lx,
        "ly": walk.ly,
        "rx": walk.rx,
        "ry": walk.ry,
        "keys": 0,
    })
}
