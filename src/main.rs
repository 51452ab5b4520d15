//! facegate - doorbell face-recognition door controller
//!
//! A doorbell press captures a still, identifies the visitor through a face
//! recognition service, speaks the verdict and, for enrolled visitors, runs the
//! lock/servo unlock cycle.
//!
//! Module structure:
//! - `domain/` - Core types (PressEvent, RecognitionResult, DoorSession, errors)
//! - `io/` - External interfaces (GPIO, doorbell, Face API, camera, speech, HTTP)
//! - `services/` - Door logic (Orchestrator, RecognitionPipeline, DoorActuator, SoftPwm)
//! - `infra/` - Infrastructure (Config, Metrics, group-id store)

use anyhow::Context;
use clap::Parser;
use facegate::domain::error::HardwareError;
use facegate::domain::types::Level;
use facegate::infra::{group_store, Config, Metrics};
use facegate::io::gpio::SysfsPin;
use facegate::io::{
    Camera, CommandCamera, CommandSpeaker, DoorbellMonitor, FaceApiClient, GpioController,
    LogSpeaker, Speaker, StillCamera,
};
use facegate::services::{
    DoorActuation, DoorActuator, Orchestrator, PulseSpec, RecognitionPipeline, SessionGate,
    SoftPwm,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Extra time granted on shutdown, beyond the door hold, to a session that has not yet unlocked
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// facegate - face-recognition doorbell
#[derive(Parser, Debug)]
#[command(name = "facegate", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/facegate.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "facegate starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        face_endpoint = %config.face_endpoint(),
        button_pin = %config.button_pin(),
        lock_pin = %config.lock_pin(),
        servo_pin = %config.servo_pin(),
        door_hold_secs = %config.door_hold_secs(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let gate = SessionGate::new();

    let group_id = group_store::load_or_init(&config.group_id_path(), config.person_group_id())?;
    let face_api = FaceApiClient::from_config(&config).context("Failed to build face API client")?;
    let pipeline = Arc::new(RecognitionPipeline::new(
        Arc::new(face_api),
        group_id,
        Duration::from_millis(config.face_timeout_ms()),
    ));

    let camera: Arc<dyn Camera> = match config.camera_still_file() {
        Some(path) => Arc::new(StillCamera::new(path)),
        None => Arc::new(
            CommandCamera::new(
                config.camera_command(),
                config.camera_capture_dir(),
                config.camera_extension(),
            )
            .context("Invalid camera command")?,
        ),
    };
    let speaker = build_speaker(&config);

    // Physical I/O is optional: without GPIO the door still answers virtual presses
    let (actuator, monitor) = init_gpio(&config, gate.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        camera,
        speaker,
        pipeline,
        actuator,
        gate.clone(),
        metrics.clone(),
        config.messages().clone(),
    ));

    // Doorbell presses feed the orchestrator through a small bounded channel
    let (press_tx, press_rx) = mpsc::channel(16);
    if let Some(mut monitor) = monitor {
        monitor.on_press(move |event| {
            if let Err(e) = press_tx.try_send(event) {
                warn!(error = %e, "press_channel_full");
            }
        });
        let monitor_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });
    }

    let run_shutdown = shutdown_rx.clone();
    tokio::spawn(orchestrator.clone().run(press_rx, run_shutdown));

    // Start control/metrics HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let http_metrics = metrics.clone();
        let http_orchestrator = orchestrator.clone();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = facegate::io::http::start_http_server(
                http_port,
                http_metrics,
                http_orchestrator,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let announcer = orchestrator.clone();
    tokio::spawn(async move {
        announcer.announce_ready().await;
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // A started unlock always runs to relock; otherwise stop waiting after the bound
    let drain = Duration::from_secs(config.door_hold_secs()) + SHUTDOWN_GRACE;
    if !orchestrator.drain(drain).await {
        warn!(waited_secs = %drain.as_secs(), "shutdown_session_abandoned");
    }

    info!("facegate shutdown complete");
    Ok(())
}

fn build_speaker(config: &Config) -> Arc<dyn Speaker> {
    if !config.speech_enabled() {
        info!("speech_disabled_logging_only");
        return Arc::new(LogSpeaker);
    }
    match CommandSpeaker::new(config.speech_command()) {
        Ok(speaker) => Arc::new(speaker),
        Err(e) => {
            warn!(error = %e, "speech_command_invalid_logging_only");
            Arc::new(LogSpeaker)
        }
    }
}

fn init_gpio(
    config: &Config,
    gate: SessionGate,
) -> (Option<Arc<dyn DoorActuation>>, Option<DoorbellMonitor<SysfsPin>>) {
    let controller = match GpioController::open(config.gpio_sysfs_root()) {
        Ok(controller) => controller,
        Err(e) => {
            warn!(error = %e, "gpio_disabled");
            return (None, None);
        }
    };

    let monitor = match DoorbellMonitor::initialize(&controller, config, gate) {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            warn!(error = %e, "doorbell_monitoring_disabled");
            None
        }
    };

    let actuator = match open_actuator(&controller, config) {
        Ok(actuator) => Some(Arc::new(actuator) as Arc<dyn DoorActuation>),
        Err(e) => {
            warn!(error = %e, "door_actuator_disabled");
            None
        }
    };

    (actuator, monitor)
}

fn open_actuator(
    controller: &GpioController,
    config: &Config,
) -> Result<DoorActuator<SysfsPin, SysfsPin>, HardwareError> {
    let unlocked = config.lock_unlocked_level();
    let lock_pin = controller.open_output(config.lock_pin(), unlocked.inverted())?;
    let servo_pin = controller.open_output(config.servo_pin(), Level::Low)?;

    let pwm = SoftPwm::new(servo_pin, Duration::from_millis(config.pwm().settle_ms));
    Ok(DoorActuator::new(
        lock_pin,
        pwm,
        unlocked,
        Duration::from_secs(config.door_hold_secs()),
        PulseSpec::open_from(config.pwm()),
        PulseSpec::closed_from(config.pwm()),
    ))
}
