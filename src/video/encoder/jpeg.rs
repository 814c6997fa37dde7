//! turbojpeg-backed frame encoder
//!
//! ```text
//! MJPEG ──(mirror? lossless hflip)──────────────> JPEG
//! YUYV  ──planar 4:2:2 (+mirror)──compress_yuv──> JPEG
//! RGB24 ──(row reverse)──────────compress───────> JPEG
//! ```

use bytes::Bytes;
use turbojpeg::{Transform, TransformOp};

use super::traits::FrameEncoder;
use crate::error::{AppError, Result};
use crate::video::format::PixelFormat;
use crate::video::frame::VideoFrame;

pub struct JpegEncoder {
    compressor: turbojpeg::Compressor,
    mirror: bool,
    scratch: Vec<u8>,
}

impl JpegEncoder {
    pub fn new(quality: u32, mirror: bool) -> Result<Self> {
        let mut compressor = turbojpeg::Compressor::new()
            .map_err(|e| AppError::VideoError(format!("Failed to create compressor: {}", e)))?;
        compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG quality: {}", e)))?;

        Ok(Self {
            compressor,
            mirror,
            scratch: Vec::new(),
        })
    }

    fn encode_mjpeg(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        if !frame.is_valid_jpeg() {
            return Err(AppError::VideoError(format!(
                "Corrupt MJPEG frame #{} ({} bytes)",
                frame.sequence,
                frame.len()
            )));
        }
        if !self.mirror {
            return Ok(frame.data_bytes());
        }

        let transform = Transform {
            trim: true,
            ..Transform::op(TransformOp::Hflip)
        };
        let flipped = turbojpeg::transform(&transform, frame.data())
            .map_err(|e| AppError::VideoError(format!("JPEG mirror failed: {}", e)))?;
        Ok(Bytes::copy_from_slice(&flipped))
    }

    fn encode_yuyv(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let width = frame.resolution.width as usize;
        let height = frame.resolution.height as usize;
        yuyv_to_planar422(frame.data(), width, height, self.mirror, &mut self.scratch)?;

        let image = turbojpeg::YuvImage {
            pixels: self.scratch.as_slice(),
            width,
            height,
            align: 1,
            subsamp: turbojpeg::Subsamp::Sub2x1,
        };
        let jpeg = self
            .compressor
            .compress_yuv_to_vec(image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(jpeg))
    }

    fn encode_rgb(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let width = frame.resolution.width as usize;
        let height = frame.resolution.height as usize;
        let pixels = if self.mirror {
            mirror_rows(frame.data(), width, height, 3, &mut self.scratch)?;
            self.scratch.as_slice()
        } else {
            check_len(frame.data(), width * height * 3, "RGB24")?;
            frame.data()
        };

        let image = turbojpeg::Image {
            pixels,
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };
        let jpeg = self
            .compressor
            .compress_to_vec(image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(jpeg))
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        match frame.format {
            PixelFormat::Mjpeg => self.encode_mjpeg(frame),
            PixelFormat::Yuyv => self.encode_yuyv(frame),
            PixelFormat::Rgb24 => self.encode_rgb(frame),
        }
    }
}

fn check_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() < expected {
        return Err(AppError::VideoError(format!(
            "{} data too small: {} < {}",
            what,
            data.len(),
            expected
        )));
    }
    Ok(())
}

/// Unpack YUYV into planar Y, U, V (4:2:2), optionally mirrored.
///
/// A mirrored macropixel takes its chroma from the opposite end of the row;
/// luma is addressed per pixel so the pair order flips too.
pub fn yuyv_to_planar422(
    src: &[u8],
    width: usize,
    height: usize,
    mirror: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    if width % 2 != 0 {
        return Err(AppError::VideoError(format!("YUYV width must be even, got {}", width)));
    }
    check_len(src, width * height * 2, "YUYV")?;

    let half = width / 2;
    out.clear();
    out.resize(width * height * 2, 0);
    let (y_plane, chroma) = out.split_at_mut(width * height);
    let (u_plane, v_plane) = chroma.split_at_mut(half * height);

    for row in 0..height {
        let line = &src[row * width * 2..(row + 1) * width * 2];
        for x in 0..width {
            let sx = if mirror { width - 1 - x } else { x };
            y_plane[row * width + x] = line[sx * 2];
        }
        for j in 0..half {
            let sj = if mirror { half - 1 - j } else { j };
            u_plane[row * half + j] = line[sj * 4 + 1];
            v_plane[row * half + j] = line[sj * 4 + 3];
        }
    }
    Ok(())
}

/// Reverse pixel order in every row of a packed image
pub fn mirror_rows(
    src: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let stride = width * bytes_per_pixel;
    check_len(src, stride * height, "packed")?;

    out.clear();
    out.reserve(stride * height);
    for line in src[..stride * height].chunks_exact(stride) {
        for pixel in line.chunks_exact(bytes_per_pixel).rev() {
            out.extend_from_slice(pixel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::Resolution;

    #[test]
    fn test_yuyv_planar_unmirrored() {
        // Two macropixels: (Y0 U0 Y1 V0) (Y2 U1 Y3 V1)
        let src = [10, 100, 11, 200, 12, 101, 13, 201];
        let mut out = Vec::new();
        yuyv_to_planar422(&src, 4, 1, false, &mut out).unwrap();
        assert_eq!(out, vec![10, 11, 12, 13, 100, 101, 200, 201]);
    }

    #[test]
    fn test_yuyv_planar_mirrored() {
        let src = [10, 100, 11, 200, 12, 101, 13, 201];
        let mut out = Vec::new();
        yuyv_to_planar422(&src, 4, 1, true, &mut out).unwrap();
        assert_eq!(out, vec![13, 12, 11, 10, 101, 100, 201, 200]);
    }

    #[test]
    fn test_yuyv_rejects_odd_width_and_short_buffer() {
        let mut out = Vec::new();
        assert!(yuyv_to_planar422(&[0; 6], 3, 1, false, &mut out).is_err());
        assert!(yuyv_to_planar422(&[0; 4], 4, 1, false, &mut out).is_err());
    }

    #[test]
    fn test_mirror_rows() {
        let src = [1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4];
        let mut out = Vec::new();
        mirror_rows(&src, 2, 2, 3, &mut out).unwrap();
        assert_eq!(out, vec![2, 2, 2, 1, 1, 1, 4, 4, 4, 3, 3, 3]);
    }

    #[test]
    fn test_encode_yuyv_and_mirror_mjpeg() {
        let resolution = Resolution::new(64, 48);
        let raw = VideoFrame::new(
            Bytes::from(vec![128u8; 64 * 48 * 2]),
            resolution,
            PixelFormat::Yuyv,
            1,
        );

        let mut encoder = JpegEncoder::new(80, true).unwrap();
        let jpeg = encoder.encode(&raw).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let mjpeg = VideoFrame::new(jpeg, resolution, PixelFormat::Mjpeg, 2);
        let flipped = encoder.encode(&mjpeg).unwrap();
        assert_eq!(&flipped[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_mjpeg_passthrough_and_corrupt_frame() {
        let mut data = vec![0u8; 256];
        data[..2].copy_from_slice(&[0xFF, 0xD8]);
        data[254..].copy_from_slice(&[0xFF, 0xD9]);
        let frame = VideoFrame::new(Bytes::from(data.clone()), Resolution::VGA, PixelFormat::Mjpeg, 1);

        let mut encoder = JpegEncoder::new(80, false).unwrap();
        assert_eq!(encoder.encode(&frame).unwrap().as_ref(), data.as_slice());

        let corrupt = VideoFrame::new(Bytes::from(vec![0u8; 256]), Resolution::VGA, PixelFormat::Mjpeg, 2);
        assert!(encoder.encode(&corrupt).is_err());
    }
}
