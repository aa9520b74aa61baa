//! CLI Entry Point for SIA
//!
//! Provides command-line interface for:
//! - Listing serial ports
//! - Checking routine files
//! - Playing a routine headless (`run`)
//! - The interactive operator shell
//!
//! # Usage
//!
//! ```bash
//! sia ports
//! sia check scan.sia
//! sia run scan.sia --repetitions 3 --x-port /dev/ttyUSB0 --y-port /dev/ttyUSB1
//! sia shell --mock
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sia::config::SiaConfig;
use sia::hardware::{serial, MockController};
use sia::logging::{self, OutputFormat, TracingConfig};
use sia::playback::{progress, PlaybackEvent, PlaybackState};
use sia::protocol::Axis;
use sia::routine::file;
use sia::session::Session;
use sia::shell::Shell;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sia")]
#[command(about = "Shear Interferometer Automation: two-axis stage routines", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = sia::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Parse a routine file and print its steps
    Check {
        /// Routine file
        file: PathBuf,
    },

    /// Play a routine file once and exit
    Run {
        /// Routine file
        file: PathBuf,

        /// Repetition count
        #[arg(short, long, default_value_t = 1)]
        repetitions: u32,

        /// Serial port of the X axis
        #[arg(long)]
        x_port: Option<String>,

        /// Serial port of the Y axis
        #[arg(long)]
        y_port: Option<String>,

        /// Use simulated controllers instead of serial ports
        #[arg(long)]
        mock: bool,
    },

    /// Interactive operator shell
    Shell {
        /// Use simulated controllers instead of serial ports
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SiaConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, "Starting");

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Check { file } => check_routine(&config, &file),
        Commands::Run {
            file,
            repetitions,
            x_port,
            y_port,
            mock,
        } => run_routine(config, &file, repetitions, [x_port, y_port], mock).await,
        Commands::Shell { mock } => run_shell(config, mock).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = serial::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<20} {}", port.port_name, port.description);
    }
    Ok(())
}

fn check_routine(config: &SiaConfig, path: &Path) -> Result<()> {
    let routine = file::load(path).with_context(|| format!("Invalid routine {}", path.display()))?;
    for (index, step) in routine.steps().iter().enumerate() {
        println!("{:>3}. {}", index + 1, step);
    }
    println!(
        "{} steps, one pass takes {:?}",
        routine.len(),
        routine.pass_time(config.playback.move_buffer)
    );
    Ok(())
}

async fn run_routine(
    config: SiaConfig,
    path: &Path,
    repetitions: u32,
    ports: [Option<String>; 2],
    mock: bool,
) -> Result<()> {
    let mut session = Session::new(config);
    session
        .load_routine(path)
        .with_context(|| format!("Invalid routine {}", path.display()))?;
    session.routine_mut().set_repetitions(repetitions)?;

    let mut mocks = Vec::new();
    for (axis, port) in Axis::ALL.into_iter().zip(ports) {
        if mock {
            let (controller, stream) = MockController::spawn(axis);
            session.attach(axis, &format!("mock-{}", axis), stream).await?;
            mocks.push(controller);
            continue;
        }
        match port.or_else(|| session.default_port(axis)) {
            Some(port) => session
                .connect(axis, &port)
                .await
                .with_context(|| format!("Failed to connect {} axis", axis))?,
            None => warn!(axis = %axis, "No port given, axis stays disconnected"),
        }
    }
    if !Axis::ALL.iter().any(|axis| session.is_connected(*axis)) {
        bail!("No axis connected; pass --x-port/--y-port or configure [axes]");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.set_playback_events(Some(tx));
    let control = session.playback_control();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PlaybackEvent::StepStarted {
                    repetition,
                    repetitions,
                    now,
                    next,
                    ..
                } => println!("[{} of {}] {} (next: {})", repetition, repetitions, now, next),
                PlaybackEvent::Progress {
                    fraction,
                    remaining,
                } => println!(
                    "{:>3.0}% {}",
                    fraction * 100.0,
                    progress::time_left_text(remaining)
                ),
                PlaybackEvent::Started { .. } | PlaybackEvent::Finished { .. } => {}
            }
        }
    });

    let outcome = {
        let run = session.run_routine();
        tokio::pin!(run);
        tokio::select! {
            outcome = &mut run => outcome,
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping after the current step...");
                control.request_stop();
                run.await
            }
        }
    };

    session.set_playback_events(None);
    let _ = printer.await;
    session.shutdown().await;
    drop(mocks);

    match outcome.context("Playback failed")? {
        PlaybackState::Completed => {
            println!("Measurement has been successful");
            Ok(())
        }
        other => bail!("Measurement has been aborted ({})", other),
    }
}

async fn run_shell(config: SiaConfig, mock: bool) -> Result<()> {
    let mut shell = Shell::new(Session::new(config));
    if mock {
        shell
            .attach_mocks()
            .await
            .context("Failed to attach simulated controllers")?;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    shell.run(stdin, &mut stdout).await?;
    Ok(())
}
