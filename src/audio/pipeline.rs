//! Upload, transcode and playback scheduling
//!
//! Uploads are stored by content hash, so the same clip uploaded twice maps
//! to the same files and the second upload skips the transcode. A reused
//! transcode is touched so retention counts from its latest upload. Writes go
//! to dot-prefixed temp names and are renamed into place only when complete.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::transcode::Transcoder;
use super::wav;
use crate::dispatch::CommandDispatcher;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Hex digits of the SHA-256 kept in file names
const HASH_PREFIX_LEN: usize = 16;
const MAX_EXTENSION_LEN: usize = 8;

/// URL prefix the upload directory is served under
pub const FILES_ROUTE: &str = "/files";

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub response: UploadResponse,
    pub wav_path: PathBuf,
    /// A valid transcode of identical content already existed
    pub reused: bool,
}

pub struct AudioPipeline {
    dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    dispatcher: Arc<CommandDispatcher>,
    events: Option<Arc<EventBus>>,
    max_upload_bytes: u64,
}

/// Removes a temp file unless disarmed
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn persist(mut self, target: &Path) -> Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

impl AudioPipeline {
    pub fn new(
        dir: PathBuf,
        transcoder: Arc<dyn Transcoder>,
        dispatcher: Arc<CommandDispatcher>,
        events: Option<Arc<EventBus>>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            dir,
            transcoder,
            dispatcher,
            events,
            max_upload_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `body`, transcode it and start playback
    ///
    /// Returns once the transcoded file exists; playback continues in the
    /// background.
    pub async fn receive<S, E>(&self, filename: &str, body: S) -> Result<UploadOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let display_name = Path::new(filename.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation("upload has no file name".into()))?
            .to_string();
        let ext = extension_of(&display_name);

        tokio::fs::create_dir_all(&self.dir).await?;

        let (upload, hash) = self.store_upload(body).await?;
        let stem = &hash[..HASH_PREFIX_LEN];
        let wav_path = self.dir.join(format!("{}.wav", stem));
        let raw_path = if ext == "wav" {
            self.dir.join(format!("{}.upload.wav", stem))
        } else {
            self.dir.join(format!("{}.{}", stem, ext))
        };
        upload.persist(&raw_path).await?;
        debug!("Stored upload {} as {}", display_name, raw_path.display());

        // A touch that fails means the sweeper got there first
        let reused = matches!(wav::probe(&wav_path).await, Ok(info) if info.is_playback_format())
            && touch(&wav_path).await.is_ok();
        if !reused {
            self.transcode(&raw_path, &wav_path).await?;
        }

        let url = format!("{}/{}.wav", FILES_ROUTE, stem);
        info!(file = %display_name, %url, reused, "Audio upload ready");

        self.dispatcher.play(&wav_path);

        if let Some(events) = &self.events {
            events.publish(SystemEvent::AudioUploaded {
                url: url.clone(),
                reused,
            });
        }

        Ok(UploadOutcome {
            response: UploadResponse {
                message: format!("{} is playing", display_name),
                url,
            },
            wav_path,
            reused,
        })
    }

    /// Stream `body` to a temp file, hashing as it goes
    async fn store_upload<S, E>(&self, mut body: S) -> Result<(TempFile, String)>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let temp = TempFile::new(
            self.dir
                .join(format!(".upload_{}", uuid::Uuid::new_v4().simple())),
        );
        let mut file = tokio::fs::File::create(&temp.path).await?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| AppError::Validation(format!("upload interrupted: {}", e)))?;
            total += chunk.len() as u64;
            if total > self.max_upload_bytes {
                return Err(AppError::Validation(format!(
                    "upload exceeds {} bytes",
                    self.max_upload_bytes
                )));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total == 0 {
            return Err(AppError::Validation("uploaded file is empty".into()));
        }

        let hash = hex(&hasher.finalize());
        Ok((temp, hash))
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let temp = TempFile::new(
            self.dir
                .join(format!(".transcode_{}.wav", uuid::Uuid::new_v4().simple())),
        );

        self.transcoder.transcode(input, &temp.path).await?;

        let info = wav::probe(&temp.path).await.map_err(|e| match e {
            AppError::Io(io) => AppError::Transcode(format!("no output produced: {}", io)),
            other => other,
        })?;
        if !info.is_playback_format() {
            return Err(AppError::Transcode(format!(
                "output is {} ch / {} Hz, expected {} ch / {} Hz",
                info.channels,
                info.sample_rate,
                wav::TARGET_CHANNELS,
                wav::TARGET_SAMPLE_RATE
            )));
        }

        temp.persist(output).await
    }
}

/// Set the modification time of `path` to now
async fn touch(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(|e| AppError::Internal(format!("touch task failed: {}", e)))??;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

/// Lowercased alphanumeric extension, `bin` if there is none usable
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}
