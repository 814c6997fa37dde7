//! Command dispatch
//!
//! Arm and LED commands run native executables through the process pool.
//! Locomotion, posture and balance go over the robot's control channel.
//! Every parameter is resolved against its table before anything is sent.
//! Playback has a pool of its own so long clips never hold the slots that
//! arm, LED and transcode calls need.

pub mod pool;

pub use pool::{ProcessPool, ProcessSpec};

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ExecutablesConfig;
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::robot::channel::{
    loco_request, topics, wireless_controller, API_SET_BALANCE_MODE, API_SET_FSM_ID,
};
use crate::robot::{ArmAction, BalanceMode, LedColor, PostureCommand, SessionManager, WalkCommand};

/// A command as received from a client, not yet validated
#[derive(Debug, Clone)]
pub enum CommandRequest {
    Arm { id: String },
    Led { r: String, g: String, b: String },
    Walk { lx: f32, ly: f32, rx: f32, ry: f32 },
    Posture { cmd: String },
    Balance { cmd: String },
}

/// A validated command
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Arm(ArmAction),
    Led(LedColor),
    Walk(WalkCommand),
    Posture(PostureCommand),
    Balance(BalanceMode),
}

impl CommandRequest {
    pub fn resolve(&self) -> Result<Command> {
        Ok(match self {
            Self::Arm { id } => Command::Arm(ArmAction::parse_id(id)?),
            Self::Led { r, g, b } => Command::Led(LedColor::parse(r, g, b)?),
            Self::Walk { lx, ly, rx, ry } => Command::Walk(WalkCommand::new(*lx, *ly, *rx, *ry)?),
            Self::Posture { cmd } => Command::Posture(cmd.parse()?),
            Self::Balance { cmd } => Command::Balance(cmd.parse()?),
        })
    }
}

impl Command {
    fn kind(&self) -> &'static str {
        match self {
            Self::Arm(_) => "arm",
            Self::Led(_) => "led",
            Self::Walk(_) => "walk",
            Self::Posture(_) => "posture",
            Self::Balance(_) => "balance",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Arm(action) => action.to_string(),
            Self::Led(color) => color.to_string(),
            Self::Walk(w) => format!("lx={} ly={} rx={} ry={}", w.lx, w.ly, w.rx, w.ry),
            Self::Posture(cmd) => cmd.to_string(),
            Self::Balance(mode) => mode.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub message: String,
}

pub struct CommandDispatcher {
    pool: Arc<ProcessPool>,
    playback: ProcessPool,
    session: Arc<SessionManager>,
    events: Option<Arc<EventBus>>,
    executables: ExecutablesConfig,
    network_interface: String,
}

impl CommandDispatcher {
    pub fn new(
        pool: Arc<ProcessPool>,
        playback: ProcessPool,
        session: Arc<SessionManager>,
        events: Option<Arc<EventBus>>,
        executables: ExecutablesConfig,
        network_interface: String,
    ) -> Self {
        Self {
            pool,
            playback,
            session,
            events,
            executables,
            network_interface,
        }
    }

    /// Validate `request` and execute it
    ///
    /// Validation failures return before any process or channel call.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<Ack> {
        let command = request.resolve()?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Result<Ack> {
        let result = match command {
            Command::Arm(action) => self.arm(action).await,
            Command::Led(color) => self.led(color).await,
            Command::Walk(walk) => self.walk(walk).await,
            Command::Posture(cmd) => self.posture(cmd).await,
            Command::Balance(mode) => self.balance(mode).await,
        };

        let detail = command.detail();
        match &result {
            Ok(_) => info!(command = command.kind(), %detail, "Command dispatched"),
            Err(e) => warn!(command = command.kind(), %detail, "Command failed: {}", e),
        }
        self.publish(command.kind(), detail, result.is_ok());

        result.map(|message| Ack { message })
    }

    async fn arm(&self, action: ArmAction) -> Result<String> {
        let spec = ProcessSpec::new(
            &self.executables.arm,
            vec![action.code().to_string(), self.network_interface.clone()],
            self.command_timeout(),
        );
        self.pool.run(spec).await?;
        Ok(format!("Arm action executed: {}", action))
    }

    async fn led(&self, color: LedColor) -> Result<String> {
        let spec = ProcessSpec::new(
            &self.executables.vui,
            vec![color.r.to_string(), color.g.to_string(), color.b.to_string()],
            self.command_timeout(),
        );
        self.pool.run(spec).await?;
        Ok(format!("LED color set: {}", color))
    }

    async fn walk(&self, walk: WalkCommand) -> Result<String> {
        let channel = self.session.channel()?;
        channel
            .publish(topics::WIRELESS_CONTROLLER, wireless_controller(&walk))
            .await?;
        Ok("Walk command sent".to_string())
    }

    async fn posture(&self, cmd: PostureCommand) -> Result<String> {
        let channel = self.session.channel()?;
        channel
            .request(topics::LOCO_REQUEST, loco_request(API_SET_FSM_ID, cmd.code()))
            .await?;
        Ok(format!("Posture set: {}", cmd))
    }

    async fn balance(&self, mode: BalanceMode) -> Result<String> {
        let channel = self.session.channel()?;
        channel
            .request(
                topics::LOCO_REQUEST,
                loco_request(API_SET_BALANCE_MODE, mode.code()),
            )
            .await?;
        Ok(format!("Balance mode set: {}", mode))
    }

    /// Start playback of `wav` without waiting for it to finish
    pub fn play(&self, wav: &Path) {
        let spec = ProcessSpec::new(
            &self.executables.audio,
            vec![wav.display().to_string()],
            Duration::from_secs(self.executables.playback_timeout_secs),
        );
        let detail = wav.display().to_string();
        let done = self.playback.submit(spec);
        let events = self.events.clone();

        tokio::spawn(async move {
            let success = match done.await {
                Ok(Ok(_)) => {
                    info!(command = "playback", %detail, "Playback finished");
                    true
                }
                Ok(Err(e)) => {
                    warn!(command = "playback", %detail, "Playback failed: {}", e);
                    false
                }
                Err(_) => false,
            };
            if let Some(events) = events {
                events.publish(SystemEvent::CommandDispatched {
                    kind: "playback".to_string(),
                    detail,
                    success,
                });
            }
        });
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.executables.timeout_secs)
    }

    fn publish(&self, kind: &str, detail: String, success: bool) {
        if let Some(events) = &self.events {
            events.publish(SystemEvent::CommandDispatched {
                kind: kind.to_string(),
                detail,
                success,
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::robot::testing::FakeConnector;
    use crate::robot::TelemetryCache;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Write an executable shell script that logs its arguments to
    /// `<name>.log` and exits with `code`
    pub(crate) fn stub_executable(dir: &Path, name: &str, code: i32) -> PathBuf {
        let path = dir.join(name);
        let log = dir.join(format!("{}.log", name));
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{}\"\nexit {}\n",
            log.display(),
            code
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub(crate) fn stub_log(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(format!("{}.log", name))).unwrap_or_default()
    }

    struct Fixture {
        dir: TempDir,
        connector: Arc<FakeConnector>,
        session: Arc<SessionManager>,
        dispatcher: CommandDispatcher,
        events: Arc<EventBus>,
    }

    fn fixture(exit_code: i32) -> Fixture {
        fixture_with_pool(exit_code, 2)
    }

    fn fixture_with_pool(exit_code: i32, pool_size: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let executables = ExecutablesConfig {
            vui: stub_executable(dir.path(), "g1_vui", exit_code).display().to_string(),
            arm: stub_executable(dir.path(), "g1_arm", exit_code).display().to_string(),
            audio: stub_executable(dir.path(), "g1_audio", exit_code).display().to_string(),
            ..Default::default()
        };
        let connector = Arc::new(FakeConnector::default());
        let events = Arc::new(EventBus::new());
        let session = SessionManager::new(
            connector.clone(),
            Arc::new(TelemetryCache::new()),
            None,
            Duration::from_secs(5),
        );
        let dispatcher = CommandDispatcher::new(
            Arc::new(ProcessPool::new(pool_size)),
            ProcessPool::new(1),
            session.clone(),
            Some(events.clone()),
            executables,
            "eth0".to_string(),
        );
        Fixture {
            dir,
            connector,
            session,
            dispatcher,
            events,
        }
    }

    fn led(r: &str, g: &str, b: &str) -> CommandRequest {
        CommandRequest::Led {
            r: r.into(),
            g: g.into(),
            b: b.into(),
        }
    }

    #[tokio::test]
    async fn test_led_runs_vui_with_channels() {
        let f = fixture(0);
        let mut events = f.events.subscribe();

        let ack = f.dispatcher.dispatch(led("255", "0", "0")).await.unwrap();
        assert_eq!(ack.message, "LED color set: (255,0,0)");
        assert_eq!(stub_log(f.dir.path(), "g1_vui").trim(), "255 0 0");

        match events.recv().await.unwrap() {
            SystemEvent::CommandDispatched { kind, success, .. } => {
                assert_eq!(kind, "led");
                assert!(success);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_executable_is_process_error() {
        let f = fixture(1);
        let err = f.dispatcher.dispatch(led("255", "0", "0")).await.unwrap_err();
        assert!(matches!(err, AppError::Process { .. }));
        assert!(!err.status_code().is_success());
    }

    #[tokio::test]
    async fn test_arm_passes_code_and_interface() {
        let f = fixture(0);
        let ack = f
            .dispatcher
            .dispatch(CommandRequest::Arm { id: "hug".into() })
            .await
            .unwrap();
        assert!(ack.message.contains("hug (19)"));

        f.dispatcher
            .dispatch(CommandRequest::Arm { id: "26".into() })
            .await
            .unwrap();
        assert_eq!(stub_log(f.dir.path(), "g1_arm"), "19 eth0\n26 eth0\n");
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_collaborators() {
        let f = fixture(0);
        f.session.connect().await.unwrap();
        let channel = f.connector.latest();

        let invalid = [
            CommandRequest::Arm { id: "moonwalk".into() },
            CommandRequest::Arm { id: "5".into() },
            led("256", "0", "0"),
            led("red", "0", "0"),
            CommandRequest::Posture { cmd: "backflip".into() },
            CommandRequest::Balance { cmd: "hover".into() },
            CommandRequest::Walk { lx: f32::NAN, ly: 0.0, rx: 0.0, ry: 0.0 },
        ];
        for request in invalid {
            let err = f.dispatcher.dispatch(request.clone()).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{:?} gave {:?}", request, err);
        }

        assert_eq!(channel.calls(), 0);
        assert!(stub_log(f.dir.path(), "g1_arm").is_empty());
        assert!(stub_log(f.dir.path(), "g1_vui").is_empty());
    }

    #[tokio::test]
    async fn test_channel_commands_require_session() {
        let f = fixture(0);
        let walk = CommandRequest::Walk { lx: 0.5, ly: 0.0, rx: 0.0, ry: 0.0 };
        let err = f.dispatcher.dispatch(walk.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::NotConnected(_)));

        f.session.connect().await.unwrap();
        let ack = f.dispatcher.dispatch(walk).await.unwrap();
        assert_eq!(ack.message, "Walk command sent");
        let ack = f
            .dispatcher
            .dispatch(CommandRequest::Posture { cmd: "stand_up".into() })
            .await
            .unwrap();
        assert!(ack.message.starts_with("Posture set: stand_up"), "{}", ack.message);
        let ack = f
            .dispatcher
            .dispatch(CommandRequest::Balance { cmd: "continuous_gait".into() })
            .await
            .unwrap();
        assert!(ack.message.starts_with("Balance mode set: continuous_gait"), "{}", ack.message);

        let channel = f.connector.latest();
        let published = channel.published.lock().clone();
        assert_eq!(published[0].0, topics::WIRELESS_CONTROLLER);
        assert_eq!(published[0].1["lx"], 0.5);

        let requests = channel.requests.lock().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1["header"]["identity"]["api_id"], API_SET_FSM_ID);
        assert_eq!(requests[0].1["parameter"], r#"{"data":4}"#);
        assert_eq!(requests[1].1["header"]["identity"]["api_id"], API_SET_BALANCE_MODE);
        assert_eq!(requests[1].1["parameter"], r#"{"data":1}"#);
    }

    #[tokio::test]
    async fn test_play_returns_before_playback_finishes() {
        let f = fixture(0);
        let mut events = f.events.subscribe();
        let wav = f.dir.path().join("clip.wav");

        f.dispatcher.play(&wav);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SystemEvent::CommandDispatched { ref kind, success: true, .. } if kind == "playback"));
        assert_eq!(stub_log(f.dir.path(), "g1_audio").trim(), wav.display().to_string());
    }

    #[tokio::test]
    async fn test_playback_does_not_hold_command_slots() {
        let f = fixture_with_pool(0, 1);
        let slow = f.dir.path().join("slow_audio");
        std::fs::write(&slow, "#!/bin/sh\nsleep 2\n").unwrap();
        std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();
        let dispatcher = CommandDispatcher {
            executables: ExecutablesConfig {
                audio: slow.display().to_string(),
                ..f.dispatcher.executables.clone()
            },
            ..f.dispatcher
        };

        dispatcher.play(&f.dir.path().join("a.wav"));
        dispatcher.play(&f.dir.path().join("b.wav"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let ack = dispatcher.dispatch(led("0", "255", "0")).await.unwrap();
        assert_eq!(ack.message, "LED color set: (0,255,0)");
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
