//! Robot session lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Degraded
//!       ^______________|___________|____________|   (disconnect / connect failure)
//! ```
//!
//! A session owns one control channel, the low-state updater task and a
//! staleness watchdog. Both tasks stop when the session's cancellation token
//! fires. Reconnection is always explicit.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{topics, ChannelConnector, ControlChannel};
use super::telemetry::{LowStateReport, TelemetryCache, TelemetryRecord};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Session exists but reports stopped or the link closed
    Degraded,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `/heartbeat` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(flatten)]
    pub record: TelemetryRecord,
    pub state: SessionState,
    /// RFC 3339 time of the last report, absent if none ever arrived
    pub last_update: Option<String>,
    pub stale: bool,
}

struct ActiveSession {
    id: Uuid,
    channel: Arc<dyn ControlChannel>,
    cancel: CancellationToken,
    started: Instant,
}

pub struct SessionManager {
    connector: Arc<dyn ChannelConnector>,
    telemetry: Arc<TelemetryCache>,
    events: Option<Arc<EventBus>>,
    stale_after: Duration,
    state: Mutex<SessionState>,
    active: RwLock<Option<ActiveSession>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        telemetry: Arc<TelemetryCache>,
        events: Option<Arc<EventBus>>,
        stale_after: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            telemetry,
            events,
            stale_after,
            state: Mutex::new(SessionState::Disconnected),
            active: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCache> {
        &self.telemetry
    }

    fn set_state(&self, next: SessionState) {
        let previous = {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            std::mem::replace(&mut *state, next)
        };

        info!("Robot session: {} -> {}", previous, next);
        if let Some(events) = &self.events {
            events.publish(SystemEvent::SessionStateChanged {
                state: next.to_string(),
                previous: previous.to_string(),
            });
        }
    }

    /// Establish a session
    ///
    /// Returns `false` when a healthy session already exists and was reused.
    /// A degraded session is torn down and replaced.
    pub async fn connect(self: &Arc<Self>) -> Result<bool> {
        let _guard = self.connect_lock.lock().await;

        if self.state() == SessionState::Connected && self.active.read().is_some() {
            debug!("Reusing existing robot session");
            return Ok(false);
        }

        let previous = self.active.write().take();
        if let Some(old) = previous {
            info!("Replacing robot session {}", old.id);
            old.cancel.cancel();
            old.channel.close().await;
        }

        self.set_state(SessionState::Connecting);

        let channel = match self.connector.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Robot connect failed: {}", e);
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        let reports = match channel.subscribe(topics::LOW_STATE).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Low-state subscription failed: {}", e);
                channel.close().await;
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        let session = ActiveSession {
            id: Uuid::new_v4(),
            channel,
            cancel: CancellationToken::new(),
            started: Instant::now(),
        };

        tokio::spawn(run_updater(
            reports,
            self.telemetry.clone(),
            session.cancel.clone(),
        ));
        tokio::spawn(run_watchdog(
            Arc::downgrade(self),
            session.id,
            session.cancel.clone(),
            watchdog_period(self.stale_after),
        ));

        info!("Robot session {} established", session.id);
        *self.active.write() = Some(session);
        self.set_state(SessionState::Connected);
        Ok(true)
    }

    /// Tear down the current session, if any
    pub async fn disconnect(&self) -> bool {
        let _guard = self.connect_lock.lock().await;

        let session = self.active.write().take();
        let had_session = match session {
            Some(session) => {
                session.cancel.cancel();
                session.channel.close().await;
                info!("Robot session {} closed", session.id);
                true
            }
            None => false,
        };
        self.set_state(SessionState::Disconnected);
        had_session
    }

    /// Channel of the current session
    pub fn channel(&self) -> Result<Arc<dyn ControlChannel>> {
        self.active
            .read()
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or_else(|| AppError::NotConnected("call /connect first".into()))
    }

    pub fn heartbeat(&self) -> Heartbeat {
        let snapshot = self.telemetry.snapshot();
        let stale = snapshot
            .received_at
            .map_or(true, |at| at.elapsed() > self.stale_after);

        Heartbeat {
            record: snapshot.record,
            state: self.state(),
            last_update: snapshot.last_update.map(|t| t.to_rfc3339()),
            stale,
        }
    }

    /// Watchdog tick for session `id`
    fn check_health(&self, id: Uuid) {
        // Held across the transition so a concurrent disconnect cannot be
        // overwritten with Degraded
        let active = self.active.read();
        let Some(session) = active.as_ref().filter(|s| s.id == id) else {
            return;
        };

        let last_seen = match self.telemetry.snapshot().received_at {
            Some(at) if at > session.started => at,
            _ => session.started,
        };
        let healthy = session.channel.is_open() && last_seen.elapsed() <= self.stale_after;

        match (self.state(), healthy) {
            (SessionState::Connected, false) => {
                warn!("Robot session {} degraded", id);
                self.set_state(SessionState::Degraded);
            }
            (SessionState::Degraded, true) => {
                info!("Robot session {} recovered", id);
                self.set_state(SessionState::Connected);
            }
            _ => {}
        }
    }
}

fn watchdog_period(stale_after: Duration) -> Duration {
    (stale_after / 4).clamp(Duration::from_millis(20), Duration::from_secs(1))
}

async fn run_updater(
    mut reports: mpsc::Receiver<serde_json::Value>,
    telemetry: Arc<TelemetryCache>,
    cancel: CancellationToken,
) {
    let throttler = LogThrottler::with_secs(10);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            report = reports.recv() => match report {
                Some(value) => match serde_json::from_value::<LowStateReport>(value) {
                    Ok(report) => telemetry.apply(&report),
                    Err(e) => {
                        crate::warn_throttled!(throttler, "low_state_parse", "Malformed low-state report: {}", e);
                    }
                },
                None => {
                    debug!("Low-state subscription ended");
                    break;
                }
            }
        }
    }
}

async fn run_watchdog(
    manager: Weak<SessionManager>,
    id: Uuid,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                manager.check_health(id);
            }
        }
    }
}
