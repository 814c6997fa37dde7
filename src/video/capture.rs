//! Capture device abstraction and the V4L2 implementation
//!
//! Devices are pulled frame by frame from a blocking thread; see
//! [`crate::stream::MjpegStreamer`] for the loop that drives them.

use bytes::Bytes;
use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Frames smaller than this are driver noise
const MIN_FRAME_SIZE: usize = 128;
const MAX_OPEN_RETRIES: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);

/// An opened capture device
///
/// `read_frame` blocks until the next frame is available.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<VideoFrame>;
}

/// Opens capture devices
///
/// Implementations must report an exclusively held device as
/// [`AppError::ResourceBusy`].
pub trait DeviceOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureDevice>>;

    /// Human readable device name for logs and events
    fn describe(&self) -> String;
}

/// V4L2 capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device_path: PathBuf,
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub fps: u32,
    pub buffer_count: u32,
}

impl CaptureConfig {
    pub fn from_video_config(config: &crate::config::VideoConfig) -> Result<Self> {
        let format = config
            .format
            .parse::<PixelFormat>()
            .map_err(AppError::Config)?;
        Ok(Self {
            device_path: PathBuf::from(&config.device),
            resolution: Resolution::new(config.width, config.height),
            format,
            fps: config.fps,
            buffer_count: 2,
        })
    }
}

/// Opens V4L2 devices with memory-mapped streaming
pub struct V4l2Opener {
    config: CaptureConfig,
}

impl V4l2Opener {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn try_open(&self) -> io::Result<V4l2Device> {
        let device = Device::with_path(&self.config.device_path)?;

        let mut fmt = device.format()?;
        fmt.width = self.config.resolution.width;
        fmt.height = self.config.resolution.height;
        fmt.fourcc = self.config.format.to_fourcc();
        let actual = device.set_format(&fmt)?;

        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("device negotiated unsupported format {}", actual.fourcc),
            )
        })?;
        if format != self.config.format {
            warn!("Requested {} but device delivers {}", self.config.format, format);
        }

        if self.config.fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(self.config.fps)) {
                debug!("Device rejected frame interval: {}", e);
            }
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)?;

        Ok(V4l2Device {
            _device: device,
            stream,
            resolution: Resolution::new(actual.width, actual.height),
            format,
            sequence: 0,
        })
    }
}

impl DeviceOpener for V4l2Opener {
    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        let path = self.describe();

        for attempt in 1..=MAX_OPEN_RETRIES {
            match self.try_open() {
                Ok(device) => {
                    info!("Opened {} at {} {}", path, device.resolution, device.format);
                    return Ok(Box::new(device));
                }
                Err(e) if e.raw_os_error() == Some(Errno::EBUSY as i32) => {
                    warn!("Device {} busy on attempt {}/{}", path, attempt, MAX_OPEN_RETRIES);
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(e) => {
                    return Err(AppError::VideoError(format!("Failed to open {}: {}", path, e)));
                }
            }
        }

        Err(AppError::ResourceBusy(format!(
            "capture device {} is held by another process",
            path
        )))
    }

    fn describe(&self) -> String {
        self.config.device_path.display().to_string()
    }
}

struct V4l2Device {
    _device: Device,
    stream: Stream<'static>,
    resolution: Resolution,
    format: PixelFormat,
    sequence: u64,
}

impl CaptureDevice for V4l2Device {
    fn read_frame(&mut self) -> Result<VideoFrame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| AppError::VideoError(format!("Frame read failed: {}", e)))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            return Err(AppError::VideoError(format!(
                "Dropping short frame ({} bytes)",
                used
            )));
        }

        self.sequence += 1;
        Ok(VideoFrame::new(
            Bytes::copy_from_slice(&buf[..used]),
            self.resolution,
            self.format,
            self.sequence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;

    #[test]
    fn test_capture_config_from_video_config() {
        let config = CaptureConfig::from_video_config(&VideoConfig::default()).unwrap();
        assert_eq!(config.device_path, PathBuf::from("/dev/video6"));
        assert_eq!(config.format, PixelFormat::Mjpeg);
        assert_eq!(config.resolution, Resolution::VGA);

        let bad = VideoConfig {
            format: "H264".to_string(),
            ..VideoConfig::default()
        };
        assert!(matches!(
            CaptureConfig::from_video_config(&bad),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_missing_device_is_video_error() {
        let opener = V4l2Opener::new(CaptureConfig {
            device_path: PathBuf::from("/dev/does-not-exist-video"),
            resolution: Resolution::VGA,
            format: PixelFormat::Mjpeg,
            fps: 30,
            buffer_count: 2,
        });
        assert!(matches!(opener.open(), Err(AppError::VideoError(_))));
    }
}
