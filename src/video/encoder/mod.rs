//! Frame encoders
//!
//! Everything published on `/video` is JPEG; raw formats are compressed and
//! MJPEG frames are passed through or losslessly flipped.

pub mod jpeg;
pub mod traits;

pub use jpeg::JpegEncoder;
pub use traits::FrameEncoder;
