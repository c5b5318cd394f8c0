//! `robotik` – command line entry point for the edge and the agent.
//!
//! ```text
//! robotik edge [--config edge.toml] [--once] [--skill pick --square e2]
//! robotik agent [--config agent.toml]
//! robotik init-db [--config agent.toml]
//! robotik calibrate-board [--config edge.toml]
//! robotik diagnostics [--config edge.toml]
//! ```

mod calibrate;
mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use robotik_hal::{Camera, MotionDriver, SerialLink, SnapshotCamera};
use robotik_memory::TrialStore;
use robotik_runtime::{EdgeCore, init_tracing};
use robotik_types::{Context, SkillOutcome, Square, Theta};
use tracing::{info, warn};

const CYCLE_SPACING: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "robotik", version, about = "Robotic skill execution and online learning")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the edge orchestrator against the motion controller.
    Edge {
        #[arg(long, default_value = config::DEFAULT_EDGE_CONFIG)]
        config: PathBuf,
        /// Run a single agent-driven cycle and exit.
        #[arg(long)]
        once: bool,
        /// Execute one skill with default theta instead of asking the agent.
        #[arg(long, requires = "square")]
        skill: Option<String>,
        #[arg(long)]
        square: Option<String>,
    },
    /// Serve the learning agent HTTP API.
    Agent {
        #[arg(long, default_value = config::DEFAULT_AGENT_CONFIG)]
        config: PathBuf,
    },
    /// Create the trial database and its schema.
    InitDb {
        #[arg(long, default_value = config::DEFAULT_AGENT_CONFIG)]
        config: PathBuf,
    },
    /// Record robot XY for the four corner squares.
    CalibrateBoard {
        #[arg(long, default_value = config::DEFAULT_EDGE_CONFIG)]
        config: PathBuf,
    },
    /// Query controller status and grab one frame per camera.
    Diagnostics {
        #[arg(long, default_value = config::DEFAULT_EDGE_CONFIG)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let service = match &cli.command {
        Command::Agent { .. } | Command::InitDb { .. } => "robotik-agent",
        _ => "robotik-edge",
    };
    let _guard = init_tracing(service);

    let result = match cli.command {
        Command::Edge {
            config,
            once,
            skill,
            square,
        } => run_edge(&config, once, skill.as_deref(), square.as_deref()),
        Command::Agent { config } => run_agent(&config),
        Command::InitDb { config } => init_db(&config),
        Command::CalibrateBoard { config } => calibrate_board(&config),
        Command::Diagnostics { config } => diagnostics(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

// ─────────────────────────────────────────────────────────────────────────────
// Edge
// ─────────────────────────────────────────────────────────────────────────────

fn run_edge(path: &Path, once: bool, skill: Option<&str>, square: Option<&str>) -> CliResult {
    let cfg = config::load_edge(path)?;
    let mut core = EdgeCore::from_config(cfg)?;
    core.start()?;

    if let (Some(skill), Some(square)) = (skill, square) {
        let square: Square = square.parse()?;
        let outcome = core.execute_skill(skill, &Context::for_square(square), &Theta::default());
        print_outcome(skill, &outcome);
        core.stop();
        return Ok(());
    }

    if once {
        let outcome = core.run_once_from_agent();
        core.stop();
        print_outcome("cycle", &outcome?);
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\n{}", "Ctrl-C received, finishing current cycle …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    info!("edge loop running");
    while !shutdown.load(Ordering::SeqCst) {
        match core.run_once_from_agent() {
            Ok(outcome) => print_outcome("cycle", &outcome),
            Err(e) => warn!(error = %e, "cycle failed"),
        }
        std::thread::sleep(CYCLE_SPACING);
    }
    core.stop();
    println!("{}", "  ✓ edge stopped".green());
    Ok(())
}

fn print_outcome(label: &str, outcome: &SkillOutcome) {
    match outcome.failure_code() {
        None => println!("  {} {}", label.bold(), "success".green()),
        Some(code) if code.is_retryable() => {
            println!("  {} {}", label.bold(), code.as_str().yellow())
        }
        Some(code) => println!("  {} {}", label.bold(), code.as_str().red()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

fn run_agent(path: &Path) -> CliResult {
    let cfg = config::load_agent(path)?;
    // Built after init_tracing; the OTLP exporter does not need a runtime.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(robotik_agent::serve(cfg))?;
    Ok(())
}

fn init_db(path: &Path) -> CliResult {
    let cfg = config::load_agent(path)?;
    let store = TrialStore::open(&cfg.database.path)?;
    println!(
        "  {} {} (journal_mode={})",
        "✓ database ready:".green(),
        cfg.database.path.display().to_string().bold(),
        store.journal_mode()?
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Calibration and diagnostics
// ─────────────────────────────────────────────────────────────────────────────

fn calibrate_board(path: &Path) -> CliResult {
    let mut cfg: robotik_runtime::EdgeConfig = config::load_or_default(path)?;
    let Some(corners) = calibrate::prompt_corners(cfg.calibration.robot_board)? else {
        println!("  {}", "aborted, nothing saved".yellow());
        return Ok(());
    };
    calibrate::check_corners(&corners)?;
    cfg.calibration.robot_board = corners;
    cfg.validate()?;
    config::save_to(&cfg, path)?;
    println!("  {} {}", "✓ calibration saved to".green(), path.display().to_string().bold());
    Ok(())
}

fn diagnostics(path: &Path) -> CliResult {
    let cfg = config::load_edge(path)?;
    let serial = &cfg.serial;
    println!("{}", "Controller".bold().underline());
    let link = SerialLink::new(serial.port.clone(), serial.baudrate, Duration::from_millis(50));
    let mut driver = MotionDriver::new(
        Box::new(link),
        Duration::from_secs_f64(serial.timeout_s),
        Duration::from_millis(serial.settle_ms),
    );
    match driver.connect().and_then(|()| driver.poll_status()) {
        Ok(status) => println!("  {} {status}", serial.port.bold()),
        Err(e) => println!("  {} {}", serial.port.bold(), e.to_string().red()),
    }
    driver.disconnect();

    println!("{}", "Cameras".bold().underline());
    for device in &cfg.cameras.devices {
        let mut cam = SnapshotCamera::new(device.name.clone(), device.path.clone());
        let result = cam.open().and_then(|()| cam.capture());
        cam.close();
        match result {
            Ok(frame) if frame.width != device.width || frame.height != device.height => println!(
                "  {} {}x{} {}",
                device.name.bold(),
                frame.width,
                frame.height,
                format!("(expected {}x{})", device.width, device.height).yellow()
            ),
            Ok(frame) => println!("  {} {}x{} {}", device.name.bold(), frame.width, frame.height, "ok".green()),
            Err(e) => println!("  {} {}", device.name.bold(), e.to_string().red()),
        }
    }
    Ok(())
}
