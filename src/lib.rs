//! G1 gateway - HTTP command gateway for a G1 humanoid robot
//!
//! Relays the head camera as MJPEG, turns uploaded audio into playback,
//! runs LED and arm executables, forwards locomotion commands over the
//! robot's control channel and serves its latest telemetry.

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod robot;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
