//! MJPEG streaming over HTTP multipart
//!
//! - `MjpegStreamer` - owns the capture session and its lifecycle
//! - `MjpegStreamHandler` - latest-frame hub and per-client streams

pub mod mjpeg;
pub mod mjpeg_streamer;

pub use mjpeg::{create_mjpeg_part, ClientGuard, MjpegStreamHandler};
pub use mjpeg_streamer::{EncoderFactory, MjpegStreamer, MjpegStreamerConfig};
