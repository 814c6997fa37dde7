use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use g1_gateway::audio;
use g1_gateway::config::{AppConfig, ConfigStore};
use g1_gateway::robot::WsConnector;
use g1_gateway::state::{self, AppState};
use g1_gateway::utils::bind_tcp_listener;
use g1_gateway::video::{CaptureConfig, V4l2Opener};
use g1_gateway::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// G1 gateway command line arguments
#[derive(Parser, Debug)]
#[command(name = "g1-gateway")]
#[command(version, about = "HTTP command gateway for the G1 humanoid", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: ./data)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Camera device node (overrides database config)
    #[arg(long, value_name = "PATH")]
    device: Option<String>,

    /// Robot bridge WebSocket URL (overrides database config)
    #[arg(long, value_name = "URL")]
    bridge_url: Option<String>,

    /// Disable horizontal mirroring of the camera image
    #[arg(long)]
    no_mirror: bool,
}

impl CliArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(address) = &self.address {
            config.web.bind_address = address.clone();
        }
        if let Some(port) = self.port {
            config.web.http_port = port;
        }
        if let Some(device) = &self.device {
            config.video.device = device.clone();
        }
        if let Some(url) = &self.bridge_url {
            config.robot.bridge_url = url.clone();
        }
        if self.no_mirror {
            config.video.mirror = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!(
        "Starting G1 gateway v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("config.db")).await?;
    let config = effective_config(&config_store, &args);

    let upload_dir = state::upload_dir(&config, &data_dir);
    tokio::fs::create_dir_all(&upload_dir).await?;

    let capture = CaptureConfig::from_video_config(&config.video)?;
    tracing::info!(
        "Camera {} at {}x{} {} {} fps",
        capture.device_path.display(),
        capture.resolution.width,
        capture.resolution.height,
        capture.format,
        capture.fps
    );
    let opener = Arc::new(V4l2Opener::new(capture));
    let connector = Arc::new(WsConnector::from_robot_config(&config.robot));

    let state = AppState::assemble(config.clone(), &data_dir, opener, connector, None);

    let sweeper = audio::spawn_sweeper(
        upload_dir,
        Duration::from_secs(config.audio.retention_secs),
        Duration::from_secs(config.audio.sweep_interval_secs.max(1)),
        state.shutdown_signal(),
    );

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", config.web.bind_address, e))?;
    let addr = SocketAddr::new(ip, config.web.http_port);
    let listener = bind_tcp_listener(addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!("Starting HTTP server on {}", addr);

    let app = web::create_router(state.clone());
    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        cleanup(&shutdown_state).await;
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!("HTTP server error: {}", e);
        cleanup(&state).await;
    }

    let _ = sweeper.await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Stored configuration with command line overrides applied
///
/// Overrides only last for this run; the database keeps its values.
fn effective_config(store: &ConfigStore, args: &CliArgs) -> AppConfig {
    let mut config = (*store.get()).clone();
    args.apply(&mut config);
    config
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "g1_gateway=error,tower_http=error",
        LogLevel::Warn => "g1_gateway=warn,tower_http=warn",
        LogLevel::Info => "g1_gateway=info,tower_http=info",
        LogLevel::Verbose => "g1_gateway=debug,tower_http=info",
        LogLevel::Debug => "g1_gateway=debug,tower_http=debug",
        LogLevel::Trace => "g1_gateway=trace,tower_http=debug",
    };

    // RUST_LOG wins over the CLI level
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("G1_GATEWAY_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("./data")
}

/// Stop background work so open streams and sockets can drain
async fn cleanup(state: &Arc<AppState>) {
    let _ = state.shutdown_tx.send(());
    state.streamer.stop().await;
    state.session.disconnect().await;
    tracing::info!("Services stopped");
}
