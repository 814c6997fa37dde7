//! MJPEG streamer: owns the single capture session
//!
//! ```text
//!            spawn_blocking                      ArcSwap + notify
//! DeviceOpener ──> capture_loop ──encode──> MjpegStreamHandler ──> client 1..N
//! ```
//!
//! The device is opened when the first client attaches and closed once no
//! client has been attached for `idle_timeout`. Client registration and the
//! loop's decision to exit both happen under `lifecycle`, so a client that
//! arrives while the loop is winding down always triggers a fresh start.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::mjpeg::{ClientGuard, MjpegStreamHandler};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;
use crate::video::{DeviceOpener, FrameEncoder, PixelFormat, VideoFrame};
use crate::warn_throttled;

/// Back-off after a failed read so a dead device does not spin
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Builds the encoder inside the capture thread
pub type EncoderFactory = Arc<dyn Fn() -> Result<Box<dyn FrameEncoder>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MjpegStreamerConfig {
    pub max_clients: usize,
    pub idle_timeout: Duration,
}

impl MjpegStreamerConfig {
    pub fn from_video_config(config: &crate::config::VideoConfig) -> Self {
        Self {
            max_clients: config.max_clients.max(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
}

/// Single-producer, multi-consumer MJPEG publisher
pub struct MjpegStreamer {
    config: MjpegStreamerConfig,
    opener: Arc<dyn DeviceOpener>,
    encoder_factory: EncoderFactory,
    handler: Arc<MjpegStreamHandler>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stopped: Arc<AtomicBool>,
    /// Capture task handle; also serializes start attempts
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    events: Option<Arc<EventBus>>,
}

impl MjpegStreamer {
    pub fn new(
        config: MjpegStreamerConfig,
        opener: Arc<dyn DeviceOpener>,
        encoder_factory: EncoderFactory,
        events: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            opener,
            encoder_factory,
            handler: Arc::new(MjpegStreamHandler::new(events.clone())),
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
            stopped: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
            events,
        })
    }

    pub fn handler(&self) -> Arc<MjpegStreamHandler> {
        self.handler.clone()
    }

    pub fn client_count(&self) -> usize {
        self.handler.client_count()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    /// Attach a client, opening the device if no capture session is running
    ///
    /// Fails with `ResourceBusy` when the client limit is reached or the
    /// device is held elsewhere; other open failures surface as `VideoError`.
    pub async fn attach(self: &Arc<Self>) -> Result<ClientGuard> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AppError::ResourceBusy("video stream is shutting down".into()));
        }
        if self.handler.client_count() >= self.config.max_clients {
            return Err(AppError::ResourceBusy(format!(
                "video client limit ({}) reached",
                self.config.max_clients
            )));
        }

        let guard = ClientGuard::new(uuid::Uuid::new_v4().to_string(), self.handler.clone());

        let mut task = self.task.lock().await;
        let needs_start = {
            let mut lifecycle = self.lifecycle.lock();
            !std::mem::replace(&mut lifecycle.running, true)
        };
        if !needs_start {
            return Ok(guard);
        }

        if let Some(previous) = task.take() {
            let _ = previous.await;
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let ctx = CaptureContext {
            opener: self.opener.clone(),
            encoder_factory: self.encoder_factory.clone(),
            handler: self.handler.clone(),
            lifecycle: self.lifecycle.clone(),
            stopped: self.stopped.clone(),
            idle_timeout: self.config.idle_timeout,
        };
        *task = Some(tokio::task::spawn_blocking(move || capture_loop(ctx, ready_tx)));

        match ready_rx.await {
            Ok(Ok(())) => {
                self.publish_state("streaming");
                Ok(guard)
            }
            Ok(Err(e)) => {
                warn!("Capture start failed: {}", e);
                Err(e)
            }
            Err(_) => Err(AppError::Internal(
                "capture thread exited during startup".into(),
            )),
        }
    }

    /// Stop capturing and end every client stream
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.handler.set_offline();
        self.publish_state("stopped");
        info!("MJPEG streamer stopped");
    }

    fn publish_state(&self, state: &str) {
        if let Some(events) = &self.events {
            events.publish(SystemEvent::StreamStateChanged {
                state: state.to_string(),
                device: self.opener.describe(),
            });
        }
    }
}

struct CaptureContext {
    opener: Arc<dyn DeviceOpener>,
    encoder_factory: EncoderFactory,
    handler: Arc<MjpegStreamHandler>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stopped: Arc<AtomicBool>,
    idle_timeout: Duration,
}

impl CaptureContext {
    /// Flip `running` off and take the hub offline atomically w.r.t. attach
    fn finish(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.running = false;
        self.handler.set_offline();
    }
}

/// Capture loop (runs on a blocking thread)
fn capture_loop(ctx: CaptureContext, ready: oneshot::Sender<Result<()>>) {
    let opened = ctx
        .opener
        .open()
        .and_then(|device| (ctx.encoder_factory)().map(|encoder| (device, encoder)));
    let (mut device, mut encoder) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            ctx.finish();
            let _ = ready.send(Err(e));
            return;
        }
    };

    ctx.handler.clear_frame();
    ctx.handler.set_online();
    let _ = ready.send(Ok(()));
    info!("Capture started on {}", ctx.opener.describe());

    let throttler = LogThrottler::with_secs(5);
    let mut idle_since: Option<Instant> = None;
    let mut published = 0u64;

    loop {
        if ctx.stopped.load(Ordering::Relaxed) {
            break;
        }

        {
            let mut lifecycle = ctx.lifecycle.lock();
            if ctx.handler.client_count() == 0 {
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= ctx.idle_timeout {
                    lifecycle.running = false;
                    ctx.handler.set_offline();
                    info!("No MJPEG clients, closing {}", ctx.opener.describe());
                    return;
                }
            } else {
                idle_since = None;
            }
        }

        let raw = match device.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                warn_throttled!(throttler, "capture_read", "Skipping frame, read failed: {}", e);
                std::thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        };

        match encoder.encode(&raw) {
            Ok(jpeg) => {
                // Recovered: the next failure is reported at once
                throttler.clear("capture_read");
                throttler.clear("capture_encode");
                published += 1;
                ctx.handler.update_frame(VideoFrame::new(
                    jpeg,
                    raw.resolution,
                    PixelFormat::Mjpeg,
                    published,
                ));
            }
            Err(e) => {
                warn_throttled!(throttler, "capture_encode", "Skipping frame, encode failed: {}", e);
            }
        }
    }

    ctx.finish();
    info!("Capture stopped after {} frames", published);
}
