//! Audio upload handling
//!
//! Uploads are stored by content hash, resampled to mono 16 kHz PCM WAV,
//! handed to the playback executable and expired after a retention period.

pub mod pipeline;
pub mod retention;
pub mod transcode;
pub mod wav;

pub use pipeline::{AudioPipeline, UploadOutcome, UploadResponse, FILES_ROUTE};
pub use retention::{spawn_sweeper, sweep_once};
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use wav::WavInfo;
