//! RIFF/WAVE header probe

use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::{AppError, Result};

/// Playback format expected by the robot's audio executable
pub const TARGET_CHANNELS: u16 = 1;
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Headers are well inside this; the sample data is not needed
const PROBE_LIMIT: u64 = 64 * 1024;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Declared size of the `data` chunk
    pub data_len: u32,
}

impl WavInfo {
    pub fn is_playback_format(&self) -> bool {
        matches!(self.format_tag, WAVE_FORMAT_PCM | WAVE_FORMAT_EXTENSIBLE)
            && self.channels == TARGET_CHANNELS
            && self.sample_rate == TARGET_SAMPLE_RATE
    }
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Parse the `fmt ` and `data` chunks out of a WAV header
pub fn parse_header(buf: &[u8]) -> Result<WavInfo> {
    let invalid = |why: &str| AppError::Transcode(format!("not a usable WAV file: {}", why));

    if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE signature"));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut pos = 12;
    while pos + 8 <= buf.len() {
        let id = &buf[pos..pos + 4];
        let size = u32_at(buf, pos + 4) as usize;
        let body = pos + 8;

        match id {
            b"fmt " => {
                if size < 16 || body + 16 > buf.len() {
                    return Err(invalid("truncated fmt chunk"));
                }
                fmt = Some((
                    u16_at(buf, body),
                    u16_at(buf, body + 2),
                    u32_at(buf, body + 4),
                    u16_at(buf, body + 14),
                ));
            }
            b"data" => {
                let (format_tag, channels, sample_rate, bits_per_sample) =
                    fmt.ok_or_else(|| invalid("data chunk before fmt chunk"))?;
                return Ok(WavInfo {
                    format_tag,
                    channels,
                    sample_rate,
                    bits_per_sample,
                    data_len: size as u32,
                });
            }
            _ => {}
        }

        // Chunks are padded to even sizes
        pos = body + size + (size & 1);
    }

    Err(invalid("no data chunk"))
}

/// Read and parse the header of the file at `path`
pub async fn probe(path: &Path) -> Result<WavInfo> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::new();
    file.take(PROBE_LIMIT).read_to_end(&mut buf).await?;
    parse_header(&buf)
}

/// Silent 16-bit PCM clip, for tests
#[cfg(test)]
pub(crate) fn silent_wav(channels: u16, sample_rate: u32, frames: u32) -> Vec<u8> {
    let block_align = channels * 2;
    let data_len = frames * block_align as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
