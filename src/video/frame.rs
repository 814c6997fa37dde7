//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// A captured or encoded frame
///
/// Cloning is cheap; the payload is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Monotonic per capture session; restarts at 1 when the device is reopened
    pub sequence: u64,
    pub capture_ts: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// SOI marker at the start and EOI (or zero padding) at the end
    pub fn is_valid_jpeg(&self) -> bool {
        self.format.is_compressed() && is_valid_jpeg(&self.data)
    }
}

pub(crate) fn is_valid_jpeg(data: &[u8]) -> bool {
    if data.len() < 125 || data[..2] != [0xFF, 0xD8] {
        return false;
    }
    // Some UVC cameras pad the buffer after EOI
    matches!(&data[data.len() - 2..], [0xFF, 0xD9] | [0xD9, 0x00] | [0x00, 0x00])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_like(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[0] = 0xFF;
        data[1] = 0xD8;
        data[len - 2] = 0xFF;
        data[len - 1] = 0xD9;
        data
    }

    #[test]
    fn test_jpeg_validation() {
        let frame = VideoFrame::new(
            Bytes::from(jpeg_like(200)),
            Resolution::VGA,
            PixelFormat::Mjpeg,
            1,
        );
        assert!(frame.is_valid_jpeg());

        let short = VideoFrame::new(Bytes::from(jpeg_like(64)), Resolution::VGA, PixelFormat::Mjpeg, 2);
        assert!(!short.is_valid_jpeg());

        let raw = VideoFrame::new(Bytes::from(jpeg_like(200)), Resolution::VGA, PixelFormat::Yuyv, 3);
        assert!(!raw.is_valid_jpeg());
    }
}
