//! Robot control plane
//!
//! - `commands` - closed command tables and parameter validation
//! - `channel` - control-channel abstraction and message builders
//! - `ws_channel` - WebSocket transport to the bridge
//! - `session` - connection lifecycle and staleness watchdog
//! - `telemetry` - latest low-state snapshot

pub mod channel;
pub mod commands;
pub mod session;
pub mod telemetry;
pub mod ws_channel;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelConnector, ControlChannel};
pub use commands::{ArmAction, BalanceMode, LedColor, PostureCommand, WalkCommand};
pub use session::{Heartbeat, SessionManager, SessionState};
pub use telemetry::{TelemetryCache, TelemetryRecord};
pub use ws_channel::{WsConnector, WsControlChannel};
