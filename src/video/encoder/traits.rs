use bytes::Bytes;

use crate::error::Result;
use crate::video::frame::VideoFrame;

/// Turns a captured frame into JPEG bytes
///
/// Not `Sync`: turbojpeg handles must stay on one thread. The capture loop
/// owns its encoder.
pub trait FrameEncoder: Send {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes>;
}
