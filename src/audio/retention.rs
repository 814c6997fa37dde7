//! Upload directory retention
//!
//! Files are content-addressed and never overwritten in place, so expiry is
//! purely by modification time. Leftover temp files from interrupted uploads
//! age out the same way.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Delete regular files in `dir` older than `retention`
///
/// Returns how many files were removed.
pub async fn sweep_once(dir: &Path, retention: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= retention {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Expired {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to expire {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}

/// Run [`sweep_once`] every `interval` until `shutdown` fires
pub fn spawn_sweeper(
    dir: PathBuf,
    retention: Duration,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => match sweep_once(&dir, retention).await {
                    Ok(0) => {}
                    Ok(n) => info!("Removed {} expired audio files", n),
                    Err(e) => warn!("Audio retention sweep failed: {}", e),
                }
            }
        }
        debug!("Audio retention sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("old.wav"), b"x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sweep_once(dir.path(), Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(sweep_once(dir.path(), Duration::from_millis(10)).await.unwrap(), 1);
        assert!(!dir.path().join("old.wav").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_missing_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert_eq!(sweep_once(&missing, Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(
            dir.path().to_path_buf(),
            Duration::from_secs(60),
            Duration::from_millis(10),
            rx,
        );
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
