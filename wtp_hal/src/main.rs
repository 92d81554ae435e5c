//! # WTP HAL Binary
//!
//! Runs the controller supervisor: detects attached hardware, falls back to
//! simulation, follows hot-plug changes and prints controller events as JSON
//! lines on stdout.
//!
//! # Usage
//!
//! ```bash
//! # Real serial ports (build with --features serial)
//! wtp_hal --config /etc/wtp/wtp.toml
//!
//! # Simulation only
//! wtp_hal --simulate
//!
//! # In-process pendant + motion controller, run the demo sequence
//! wtp_hal --virtual-hardware --demo -v
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use wtp_common::config::{ConfigError, ConfigLoader, LogLevel, WtpConfig};
use wtp_common::controller::MotionController;
use wtp_hal::controller_factory::DefaultControllerFactory;
use wtp_hal::discovery::{DeviceDiscovery, PortProvider, VirtualPortProvider};
use wtp_hal::supervisor::ControllerSupervisor;

/// WTP HAL - wafer transfer robot motion-control core
#[derive(Parser, Debug)]
#[command(name = "wtp_hal")]
#[command(version)]
#[command(about = "Motion-control core with hardware detection and simulation fallback")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/wtp/wtp.toml")]
    config: PathBuf,

    /// Force simulation (no endpoint scanning, no hot-plug)
    #[arg(short = 's', long)]
    simulate: bool,

    /// Use the in-process device bench instead of serial ports
    #[arg(long, conflicts_with = "simulate")]
    virtual_hardware: bool,

    /// Run a home / move / pick / place sequence, then exit
    #[arg(long)]
    demo: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run().await {
        error!("wtp_hal failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = WtpConfig::load(&args.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => WtpConfig::default(),
    };
    setup_tracing(&args, config.shared.log_level);

    info!("WTP HAL v{} starting...", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration from {}", args.config.display()),
        Err(ConfigError::FileNotFound) => warn!(
            "Configuration {} not found, using defaults",
            args.config.display()
        ),
        Err(e) => return Err(e.into()),
    }
    config.validate()?;

    if args.simulate {
        info!("Simulation mode (exclusive)");
        config.discovery.monitor = false;
    }
    let provider = port_provider(&args);

    let discovery = DeviceDiscovery::new(
        Arc::clone(&provider),
        config.discovery.clone(),
        config.pendant.serial(),
    );
    let factory = Arc::new(DefaultControllerFactory::new(config.clone(), provider));
    let supervisor = ControllerSupervisor::new(config, discovery, factory);

    let printer = tokio::spawn(print_events(supervisor.clone()));
    let kind = supervisor.initialize().await??;
    info!(%kind, "Controller ready");

    if args.demo {
        run_demo(supervisor.current_controller()).await;
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
    }

    supervisor.shutdown().await;
    printer.abort();
    info!("WTP HAL shutdown complete");
    Ok(())
}

fn port_provider(args: &Args) -> Arc<dyn PortProvider> {
    if args.simulate {
        return Arc::new(VirtualPortProvider::new());
    }
    if args.virtual_hardware {
        info!("Using virtual device bench");
        return Arc::new(VirtualPortProvider::demo_bench());
    }
    serial_provider()
}

#[cfg(feature = "serial")]
fn serial_provider() -> Arc<dyn PortProvider> {
    Arc::new(wtp_hal::discovery::TokioSerialProvider::new())
}

#[cfg(not(feature = "serial"))]
fn serial_provider() -> Arc<dyn PortProvider> {
    warn!("Built without the `serial` feature, no physical endpoints available");
    Arc::new(VirtualPortProvider::new())
}

/// Print supervisor and controller events as JSON lines.
async fn print_events(supervisor: ControllerSupervisor) {
    let mut swaps = supervisor.subscribe();
    let mut events = supervisor.subscribe_controller_events();
    loop {
        tokio::select! {
            Ok(event) = events.recv() => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Event serialization failed: {e}"),
            },
            Ok(swap) = swaps.recv() => info!(?swap, "Controller swapped"),
            else => break,
        }
    }
}

async fn run_demo(controller: Arc<dyn MotionController>) {
    info!(controller = controller.name(), "Running demo sequence");
    let steps: [(&str, bool); 6] = [
        ("home", controller.home().await),
        ("move to load port", controller.move_to(50.0, 90.0, 10.0).await),
        ("pick", controller.pick().await),
        ("move to stage", controller.move_to(120.0, -45.0, 25.0).await),
        ("place", controller.place().await),
        ("return home", controller.home().await),
    ];
    for (step, ok) in steps {
        if ok {
            info!(step, "ok");
        } else {
            warn!(step, error = ?controller.status().last_error, "failed");
        }
    }
    info!("Demo finished at {}", controller.position());
}

fn setup_tracing(args: &Args, configured: LogLevel) {
    let directive = match args.verbose {
        0 => configured.as_directive(),
        1 => "debug",
        _ => "trace",
    };
    let level = directive
        .parse::<Directive>()
        .unwrap_or_else(|_| Level::INFO.into());

    let filter = EnvFilter::from_default_env().add_directive(level);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
