//! Video capture and JPEG encoding
//!
//! The capture device and the encoder are external collaborators: the
//! gateway only pulls frames and hands them to turbojpeg.

pub mod capture;
pub mod encoder;
pub mod format;
pub mod frame;

pub use capture::{CaptureConfig, CaptureDevice, DeviceOpener, V4l2Opener};
pub use encoder::{FrameEncoder, JpegEncoder};
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
