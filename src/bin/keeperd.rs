//! keeperd - goalkeeper control daemon
//!
//! This daemon:
//! 1. Loads `KeeperConfig` (file, environment, command line)
//! 2. Opens the serial link to the leg microcontroller and rests the actuators
//! 3. Runs the frame loop: detect, track with the pan servo, trigger blocks
//! 4. On Ctrl-C, cancels any blocking session and logs final statistics

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use goalkeeper::{
    open_source, shared_link, BallBlocker, BallTracker, BrightBlobBackend, KeeperConfig,
    KeeperLoop, NullPanSink, PanSink, PidController, SerialLink, SerialPanSink,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Goalkeeper robot control daemon")]
struct Args {
    /// Optional config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "KEEPER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial device of the leg microcontroller (`stub://` for the simulator).
    #[arg(long, env = "KEEPER_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Frame source url (`stub://` for the synthetic pitch).
    #[arg(long, env = "KEEPER_SOURCE_URL")]
    source_url: Option<String>,

    /// Debug logging.
    #[arg(long)]
    debug: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    let ui = ui::Ui::from_args(Some(&args.ui), args.debug);

    let config = {
        let _stage = ui.stage("Load configuration");
        KeeperConfig::load_from(args.config.as_deref())?
            .with_overrides(args.serial_port, args.source_url)?
    };

    let link = {
        let _stage = ui.stage("Open serial link");
        shared_link(SerialLink::open(&config.serial)?)
    };
    {
        let stage = ui.stage("Initialize actuators");
        let ok = link
            .lock()
            .map_err(|_| anyhow!("serial link lock poisoned"))?
            .initialize_actuators();
        if !ok {
            stage.fail();
            log::warn!("actuator initialization failed; continuing");
        }
    }

    let mut keeper = {
        let _stage = ui.stage("Start frame loop");
        let source = open_source(
            &config.camera.url,
            config.camera.width,
            config.camera.height,
            config.camera.target_fps,
        )?;
        let detector = Box::new(BrightBlobBackend::new(config.detection.geometry));
        let tracker = BallTracker::new(
            PidController::new(config.tracking.pid),
            config.tracker_config(),
        );
        let blocker = Arc::new(BallBlocker::new(link.clone(), config.blocking.clone()));
        let pan: Box<dyn PanSink> = match config.tracking.pan {
            Some(servo) => Box::new(SerialPanSink::new(link.clone(), servo)?),
            None => Box::new(NullPanSink),
        };
        KeeperLoop::new(
            source,
            detector,
            config.detection.filter.clone(),
            config.detection.geometry,
            tracker,
            blocker,
            pan,
        )?
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let loop_shutdown = shutdown.clone();
    let worker = std::thread::Builder::new()
        .name("keeper-loop".to_string())
        .spawn(move || {
            let result = keeper.run(&loop_shutdown);
            keeper.close();
            let snapshot = keeper.snapshot();
            let _ = tx.send(());
            (result, snapshot)
        })?;

    log::info!(
        "keeperd running: source={} serial={} (Ctrl-C to stop)",
        config.camera.url,
        config.serial.port
    );
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping frame loop...");
    shutdown.store(true, Ordering::SeqCst);

    let (result, snapshot) = worker
        .join()
        .map_err(|_| anyhow!("frame loop thread panicked"))?;

    let stats = &snapshot.blocker;
    log::info!(
        "final statistics: frames={} detections={} blocks={} successful={} failed={} success_rate={:.1}%",
        snapshot.frames,
        stats.total_detections,
        snapshot.blocks_started,
        stats.successful_blocks,
        stats.failed_blocks,
        stats.success_rate
    );
    log::debug!("final snapshot: {}", serde_json::to_string(&snapshot)?);

    match link.lock() {
        Ok(mut link) => link.disconnect(),
        Err(poisoned) => poisoned.into_inner().disconnect(),
    }
    result
}
