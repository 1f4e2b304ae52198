//! keeper_probe - exercise the leg microcontroller protocol by hand.
//!
//! One command per invocation; exits non-zero when the controller does not
//! answer as expected.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

use goalkeeper::serial::{parse_monitor_line, MonitorLine};
use goalkeeper::{BlockSide, SerialConfig, SerialLink};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "keeper_probe",
    about = "Send single protocol commands to the goalkeeper leg controller"
)]
struct Args {
    /// Serial device (`stub://` for the simulator).
    #[arg(long, env = "KEEPER_SERIAL_PORT", default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(long, env = "KEEPER_SERIAL_BAUD", default_value_t = 9600)]
    baud: u32,

    /// Reply timeout for request/response commands.
    #[arg(long, default_value_t = 1.0)]
    timeout_secs: f64,

    /// Wait after opening for the controller to come out of reset.
    #[arg(long, default_value_t = 2.0)]
    reset_delay_secs: f64,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: ProbeCommand,
}

#[derive(Subcommand, Debug)]
enum ProbeCommand {
    /// Move every actuator to rest (`I`).
    Init,
    /// Read one distance sample (`D<side>`).
    Distance {
        #[arg(value_parser = parse_side)]
        side: BlockSide,
    },
    /// Set one actuator (`S<id><value>`).
    Set { id: u8, value: u16 },
    /// Run the canned block motion (`B<side>`).
    Block {
        #[arg(value_parser = parse_side)]
        side: BlockSide,
    },
    /// Open a monitoring window and print every streamed line (`H<side>`).
    Monitor {
        #[arg(value_parser = parse_side)]
        side: BlockSide,
        /// How long to keep reading.
        #[arg(long, default_value_t = 5.0)]
        window_secs: f64,
    },
}

fn parse_side(value: &str) -> Result<BlockSide, String> {
    match value.to_ascii_uppercase().as_str() {
        "L" | "LEFT" => Ok(BlockSide::Left),
        "R" | "RIGHT" => Ok(BlockSide::Right),
        other => Err(format!("side must be L or R, got {other:?}")),
    }
}

fn secs(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| anyhow!("invalid --{}: {}", name, e))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), false);

    let config = SerialConfig {
        port: args.port.clone(),
        baud_rate: args.baud,
        timeout: secs(args.timeout_secs, "timeout-secs")?,
        reset_delay: secs(args.reset_delay_secs, "reset-delay-secs")?,
    };
    let mut link = {
        let _stage = ui.stage("Open serial link");
        SerialLink::open(&config)?
    };

    let stage = ui.stage("Run command");
    let outcome = run(&mut link, args.command);
    if outcome.is_err() {
        stage.fail();
    } else {
        drop(stage);
    }
    link.disconnect();
    outcome
}

fn run(link: &mut SerialLink, command: ProbeCommand) -> Result<()> {
    match command {
        ProbeCommand::Init => {
            if !link.initialize_actuators() {
                return Err(anyhow!("controller did not acknowledge I"));
            }
            println!("init: OK");
        }
        ProbeCommand::Distance { side } => {
            let cm = link
                .read_distance(side)
                .ok_or_else(|| anyhow!("no valid distance reply for {}", side))?;
            println!("distance {}: {:.1} cm", side, cm);
        }
        ProbeCommand::Set { id, value } => {
            if !link.set_actuator(id, value) {
                return Err(anyhow!("set actuator {} to {} failed", id, value));
            }
            println!("set {}: {}", id, value);
        }
        ProbeCommand::Block { side } => {
            if !link.block(side) {
                return Err(anyhow!("block {} failed", side));
            }
            println!("block {}: OK", side);
        }
        ProbeCommand::Monitor { side, window_secs } => {
            monitor(link, side, secs(window_secs, "window-secs")?)?;
        }
    }
    Ok(())
}

fn monitor(link: &mut SerialLink, side: BlockSide, window: Duration) -> Result<()> {
    link.flush_input();
    link.start_monitoring(side)?;
    let start = Instant::now();
    let deadline = start + window;
    let mut samples = 0usize;
    while let Some(line) = link.next_line(deadline)? {
        match parse_monitor_line(&line) {
            MonitorLine::BallDetected => {
                println!(
                    "monitor {}: BALL_DETECTED after {} ms ({} samples)",
                    side,
                    start.elapsed().as_millis(),
                    samples
                );
                return Ok(());
            }
            MonitorLine::Completed => {
                println!("monitor {}: window closed, no ball ({} samples)", side, samples);
                return Ok(());
            }
            MonitorLine::Sample(sample) => {
                samples += 1;
                println!(
                    "  D:{:.1} cm T:{} N:{}",
                    sample.distance_cm,
                    sample.elapsed_ms.map_or("-".to_string(), |t| t.to_string()),
                    sample.sequence.map_or("-".to_string(), |n| n.to_string())
                );
            }
            MonitorLine::Ignored(other) => println!("  ? {}", other),
        }
    }
    Err(anyhow!(
        "monitor {}: no terminal reply within {:?} ({} samples)",
        side,
        window,
        samples
    ))
}
