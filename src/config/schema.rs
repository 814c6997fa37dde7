use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Camera capture and MJPEG relay settings
    pub video: VideoConfig,
    /// Robot control channel settings
    pub robot: RobotConfig,
    /// Native command executables
    pub executables: ExecutablesConfig,
    /// Audio upload and transcode settings
    pub audio: AudioConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    pub http_port: u16,
    pub bind_address: String,
    /// Maximum request body size in bytes (applies to uploads)
    pub max_body_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            bind_address: "0.0.0.0".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Video device path (e.g., /dev/video6)
    pub device: String,
    /// Requested pixel format ("MJPEG", "YUYV" or "RGB24")
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// JPEG quality (1-100), used when the device delivers raw frames
    pub quality: u32,
    /// Mirror every frame horizontally before it is published
    pub mirror: bool,
    /// Maximum concurrent /video clients
    pub max_clients: usize,
    /// Seconds the device stays open after the last client leaves
    pub idle_timeout_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video6".to_string(),
            format: "MJPEG".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            quality: 80,
            mirror: true,
            max_clients: 8,
            idle_timeout_secs: 5,
        }
    }
}

/// Robot control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RobotConfig {
    /// WebSocket URL of the robot bridge
    pub bridge_url: String,
    /// Network interface passed to the native arm executable
    pub network_interface: String,
    pub connect_timeout_ms: u64,
    /// Timeout for request/acknowledge round trips
    pub request_timeout_ms: u64,
    /// Telemetry older than this marks the session degraded
    pub stale_after_secs: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://192.168.123.161:8081/bridge".to_string(),
            network_interface: "eth0".to_string(),
            connect_timeout_ms: 5000,
            request_timeout_ms: 3000,
            stale_after_secs: 5,
        }
    }
}

/// Native executable configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutablesConfig {
    /// LED color tool, invoked as `<vui> r g b`
    pub vui: String,
    /// Arm action tool, invoked as `<arm> action_id iface`
    pub arm: String,
    /// Audio player, invoked as `<audio> file.wav`
    pub audio: String,
    /// Per-invocation timeout for waited commands
    pub timeout_secs: u64,
    /// Playback may run longer than a command
    pub playback_timeout_secs: u64,
    /// Maximum concurrently running native processes
    pub pool_size: usize,
}

impl Default for ExecutablesConfig {
    fn default() -> Self {
        Self {
            vui: "./g1_vui".to_string(),
            arm: "./g1_arm".to_string(),
            audio: "./g1_audio".to_string(),
            timeout_secs: 10,
            playback_timeout_secs: 300,
            pool_size: 4,
        }
    }
}

/// Audio upload configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Directory for uploaded and transcoded files; relative paths live under the data dir
    pub upload_dir: String,
    pub ffmpeg_path: String,
    pub transcode_timeout_secs: u64,
    /// Artifacts older than this are removed by the sweeper (0 disables)
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_upload_bytes: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploaded_audio".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            transcode_timeout_secs: 60,
            retention_secs: 24 * 3600,
            sweep_interval_secs: 600,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}
