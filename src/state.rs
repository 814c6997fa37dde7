use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::audio::{AudioPipeline, FfmpegTranscoder, Transcoder};
use crate::config::AppConfig;
use crate::dispatch::{CommandDispatcher, ProcessPool};
use crate::events::EventBus;
use crate::robot::{ChannelConnector, SessionManager, TelemetryCache};
use crate::stream::{EncoderFactory, MjpegStreamer, MjpegStreamerConfig};
use crate::video::{DeviceOpener, FrameEncoder, JpegEncoder};

/// Application-wide state shared across handlers
pub struct AppState {
    /// Effective configuration: stored values plus command line overrides
    pub config: Arc<AppConfig>,
    /// MJPEG relay; opens the camera on demand
    pub streamer: Arc<MjpegStreamer>,
    /// Robot control session and telemetry
    pub session: Arc<SessionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub audio: Arc<AudioPipeline>,
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Wire every service from `config`
    ///
    /// The camera and robot transports are passed in so they can be
    /// replaced; `transcoder` defaults to ffmpeg.
    pub fn assemble(
        config: AppConfig,
        data_dir: &Path,
        opener: Arc<dyn DeviceOpener>,
        connector: Arc<dyn ChannelConnector>,
        transcoder: Option<Arc<dyn Transcoder>>,
    ) -> Arc<Self> {
        let cfg = Arc::new(config);
        let events = Arc::new(EventBus::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let quality = cfg.video.quality;
        let mirror = cfg.video.mirror;
        let encoder_factory: EncoderFactory = Arc::new(move || {
            Ok(Box::new(JpegEncoder::new(quality, mirror)?) as Box<dyn FrameEncoder>)
        });
        let streamer = MjpegStreamer::new(
            MjpegStreamerConfig::from_video_config(&cfg.video),
            opener,
            encoder_factory,
            Some(events.clone()),
        );

        let session = SessionManager::new(
            connector,
            Arc::new(TelemetryCache::new()),
            Some(events.clone()),
            Duration::from_secs(cfg.robot.stale_after_secs),
        );

        let pool = Arc::new(ProcessPool::new(cfg.executables.pool_size));
        let dispatcher = Arc::new(CommandDispatcher::new(
            pool.clone(),
            ProcessPool::new(1),
            session.clone(),
            Some(events.clone()),
            cfg.executables.clone(),
            cfg.robot.network_interface.clone(),
        ));

        let transcoder = transcoder.unwrap_or_else(|| {
            Arc::new(FfmpegTranscoder::new(
                &cfg.audio.ffmpeg_path,
                Duration::from_secs(cfg.audio.transcode_timeout_secs),
                pool,
            ))
        });
        let audio = Arc::new(AudioPipeline::new(
            upload_dir(&cfg, data_dir),
            transcoder,
            dispatcher.clone(),
            Some(events.clone()),
            cfg.audio.max_upload_bytes,
        ));

        Arc::new(Self {
            config: cfg,
            streamer,
            session,
            dispatcher,
            audio,
            events,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// Relative upload directories live under the data directory
pub fn upload_dir(config: &AppConfig, data_dir: &Path) -> PathBuf {
    let dir = Path::new(&config.audio.upload_dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        data_dir.join(dir)
    }
}
