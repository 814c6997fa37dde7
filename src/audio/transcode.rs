//! Resampling uploads to the robot's playback format

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::wav::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::dispatch::{ProcessPool, ProcessSpec};
use crate::error::{AppError, Result};

/// Converts an arbitrary audio file into mono 16 kHz PCM WAV
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Transcoder backed by the `ffmpeg` binary
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    timeout: Duration,
    pool: Arc<ProcessPool>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration, pool: Arc<ProcessPool>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
            pool,
        }
    }

    fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.display().to_string(),
            "-ac".into(),
            TARGET_CHANNELS.to_string(),
            "-ar".into(),
            TARGET_SAMPLE_RATE.to_string(),
            "-c:a".into(),
            "pcm_s16le".into(),
            "-f".into(),
            "wav".into(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let spec = ProcessSpec::new(&self.ffmpeg, Self::args(input, output), self.timeout);
        match self.pool.run(spec).await {
            Ok(_) => Ok(()),
            Err(AppError::Process { reason, .. }) => Err(AppError::Transcode(reason)),
            Err(e) => Err(e),
        }
    }
}
