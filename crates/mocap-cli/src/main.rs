//! `mocap-bridge` – Motion capture to robotics bridge
//!
//! This binary streams the pose of one rigid body from a Qualisys Track
//! Manager real-time server to a robotics transport.  It:
//!
//! 1. Loads `~/.mocap-bridge/config.toml` (or `--config <path>`), falling back
//!    to defaults, and applies `MOCAP_*` environment overrides.
//! 2. Connects the configured publisher (`bus`, `rosbridge` or `udp`).
//! 3. Runs one streaming session until **Ctrl-C** is pressed or the capture
//!    server goes away, then prints the session statistics.  With
//!    `playback_file` set, QTM replays that recorded measurement instead of
//!    streaming live data.
//!
//! `--simulate` replaces the capture server with an in-process simulation so
//! the publishing side can be exercised without a capture system.

mod config;

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use mocap_core::CaptureConnector;
use mocap_core::sim::{SimCapture, describe_bodies};
use mocap_middleware::{PoseBus, PosePublisher, RosbridgePublisher, UdpPublisher};
use mocap_qtm::QtmConnector;
use mocap_runtime::{SessionReport, StreamingDriver};
use mocap_types::{BodyPose, BridgeError, RawFrame};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use config::{Config, PublisherKind};

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    simulate: bool,
    init_config: bool,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, BridgeError> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| BridgeError::Config(format!("{arg} needs a path")))?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--simulate" => parsed.simulate = true,
            "--init-config" => parsed.init_config = true,
            "--help" | "-h" => parsed.help = true,
            other => {
                return Err(BridgeError::Config(format!("unknown argument '{other}'")));
            }
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    // Hold the guard until exit so pending spans are flushed.
    let _telemetry = mocap_runtime::init_tracing("mocap-bridge");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };
    if args.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    print_banner();

    let path = args.config_path.clone().unwrap_or_else(config::config_path);
    if args.init_config {
        return init_config(&path);
    }

    let cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    println!("  Config      {}", path.display().to_string().bold());
    println!(
        "  Capture     {}{}",
        cfg.server_address.bold(),
        if args.simulate { " (simulated)".yellow().to_string() } else { String::new() }
    );
    println!("  Body        {}", cfg.target_body_name.bold());
    println!(
        "  Publisher   {} → {}",
        cfg.publisher.to_string().bold(),
        cfg.output_channel.bold()
    );
    if let Some(file) = &cfg.playback_file {
        println!("  Playback    {}", file.bold());
    }
    println!();
    debug!(config = ?cfg, "effective configuration");

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the stream …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; the session will run until the stream ends"
        );
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, args.simulate, shutdown_rx)) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {e}", "Session failed".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_config(path: &std::path::Path) -> ExitCode {
    if path.exists() {
        println!("  Config already exists at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save_to(&Config::default(), path) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {e}", "Error saving config".red());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

async fn run(
    cfg: Config,
    simulate: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionReport, BridgeError> {
    let publisher = connect_publisher(&cfg).await?;
    if simulate {
        run_session(simulated_capture(&cfg.target_body_name), publisher, &cfg, shutdown).await
    } else {
        run_session(QtmConnector::new(), publisher, &cfg, shutdown).await
    }
}

async fn run_session<C: CaptureConnector>(
    connector: C,
    publisher: Box<dyn PosePublisher>,
    cfg: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionReport, BridgeError> {
    let mut driver = StreamingDriver::new(connector, publisher, cfg.driver_config());
    driver.run(shutdown).await
}

async fn connect_publisher(cfg: &Config) -> Result<Box<dyn PosePublisher>, BridgeError> {
    match cfg.publisher {
        PublisherKind::Bus => {
            let bus = PoseBus::default();
            let mut sub = bus.subscribe(&cfg.output_channel);
            tokio::spawn(async move {
                while let Some(sample) = sub.recv().await {
                    info!(
                        channel = sub.channel(),
                        frame = sample.frame_number,
                        x = sample.position.x,
                        y = sample.position.y,
                        z = sample.position.z,
                        "pose"
                    );
                }
            });
            Ok(Box::new(bus))
        }
        PublisherKind::Rosbridge => {
            let publisher = RosbridgePublisher::connect(&cfg.rosbridge_url)
                .await?
                .with_frame_id(cfg.frame_id.clone());
            Ok(Box::new(publisher))
        }
        PublisherKind::Udp => {
            let publisher = UdpPublisher::connect(&cfg.udp_host, cfg.udp_port).await?;
            Ok(Box::new(publisher))
        }
    }
}

/// A capture server streaming `target` on a 1 m circle at 1.5 m height,
/// 100 frames per second, next to a static wand.
fn simulated_capture(target: &str) -> SimCapture {
    const FRAMES: u32 = 200;
    let frames = (0..FRAMES)
        .map(|n| {
            let angle = TAU * n as f32 / FRAMES as f32;
            RawFrame::new(
                n,
                vec![
                    BodyPose::at_mm(0.0, 0.0, 0.0),
                    BodyPose::at_mm(1000.0 * angle.cos(), 1000.0 * angle.sin(), 1500.0),
                ],
            )
        })
        .collect();
    SimCapture::new(describe_bodies(&["wand", target]))
        .with_frames(frames)
        .looping()
        .with_frame_interval(Duration::from_millis(10))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_report(report: &SessionReport) {
    let stats = &report.stats;
    println!();
    println!("  {} Session {:?}", "✓".green().bold(), report.reason);
    println!("    frames received   {}", stats.frames_received);
    println!("    samples published {}", stats.samples_published.to_string().bold());
    if stats.no_sample > 0 {
        println!("    no sample         {}", stats.no_sample.to_string().yellow());
    }
    if stats.index_drops > 0 {
        println!("    index drops       {}", stats.index_drops.to_string().yellow());
    }
    if stats.publish_failures > 0 {
        println!("    publish failures  {}", stats.publish_failures.to_string().red());
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "mocap-bridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Motion capture → robotics pose bridge");
    println!();
}

fn print_usage() {
    println!("Usage: mocap-bridge [--config <path>] [--simulate] [--init-config]");
    println!();
    println!("  -c, --config <path>  Configuration file (default ~/.mocap-bridge/config.toml)");
    println!("      --simulate       Use a simulated capture server");
    println!("      --init-config    Write a default configuration file and exit");
    println!("  -h, --help           Show this message");
}
