//! Command line, bus selection and the run itself.
//!
//! [`run_experiment`] wires the two concurrent units together: the operator
//! console runs as a spawned task, the sweep runs in the caller's task,
//! and the console is cancelled once the sweep has released everything.

use crate::bus::{DeviceBus, InstrumentBus, SimulatedBus};
use crate::console::{self, InterpreterExit};
use crate::metrics::SweepMetrics;
use crate::models::{AppConfig, BusKind};
use crate::services::{AcquireError, ResourceStack, StackPlan, SweepOutcome};
use crate::state::{RunState, StopReason};
use camino::Utf8PathBuf;
use clap::Parser;
use indexmap::IndexMap;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::watch;

/// Process exit codes
pub mod exit_code {
    /// Sweep completed or stopped by the operator
    pub const SUCCESS: i32 = 0;
    /// Resources could not be acquired or the sweep aborted
    pub const RUN_FAILED: i32 = 1;
    pub const BAD_ARGUMENTS: i32 = -1;
    pub const EXPERIMENT_DIR: i32 = -2;
    /// Configuration, logging or runtime setup failed
    pub const SETUP_FAILED: i32 = -3;
}

/// Fatal errors before any resource is acquired
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration: {0:#}")]
    Config(#[source] anyhow::Error),

    #[error("Logging: {0:#}")]
    Logging(#[source] anyhow::Error),

    #[error("{0:#}")]
    ExperimentDir(#[source] anyhow::Error),

    #[error("Failed to start runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::ExperimentDir(_) => exit_code::EXPERIMENT_DIR,
            StartupError::Config(_) | StartupError::Logging(_) | StartupError::Runtime(_) => {
                exit_code::SETUP_FAILED
            }
        }
    }
}

/// Automated I-V sweep: steps a power supply, reads back supply and meter,
/// logs every step and plots it live.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "vac", version, about)]
pub struct Cli {
    /// Experiment name, appended to the timestamped output directory
    pub experiment_name: String,

    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Use the simulated bench instead of the configured bus
    #[arg(long)]
    pub simulate: bool,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,
}

/// Build the instrument bus named by the configuration
pub fn select_bus(config: &AppConfig, simulate: bool) -> Box<dyn InstrumentBus> {
    let instruments = &config.instruments;

    if simulate || instruments.bus == BusKind::Simulated {
        tracing::info!(
            "Using simulated bench ({} ohm load)",
            instruments.simulated_load_ohms
        );
        return Box::new(
            SimulatedBus::new(&instruments.supply, &instruments.meter)
                .with_load(instruments.simulated_load_ohms),
        );
    }

    let devices: IndexMap<String, Utf8PathBuf> = instruments
        .devices
        .iter()
        .map(|entry| (entry.name.clone(), entry.path.clone()))
        .collect();
    if devices.is_empty() {
        tracing::warn!("No instruments.devices configured; opening any instrument will fail");
    }
    tracing::info!("Using device bus with {} instruments", devices.len());
    Box::new(DeviceBus::new(devices))
}

/// Result of one experiment run
#[derive(Debug)]
pub struct RunSummary {
    pub result: Result<SweepOutcome, AcquireError>,
    pub stop_reason: Option<StopReason>,
    pub console: Option<InterpreterExit>,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(outcome) if !outcome.is_failure() => exit_code::SUCCESS,
            _ => exit_code::RUN_FAILED,
        }
    }
}

/// Run one experiment: start the console, acquire, sweep, release, stop
/// the console.
pub async fn run_experiment<R, W>(
    config: &AppConfig,
    bus: &dyn InstrumentBus,
    plan: &StackPlan,
    input: R,
    output: W,
) -> RunSummary
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let run_state = RunState::new();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let interpreter = tokio::spawn(console::interpret(
        input,
        output,
        run_state.clone(),
        cancel_rx,
    ));

    let metrics = SweepMetrics::new();
    let result = match ResourceStack::acquire(bus, plan).await {
        Ok(stack) => stack.run(&config.sweep, &run_state, &metrics).await,
        Err(e) => {
            run_state.stop(StopReason::AcquireFailed);
            Err(e)
        }
    };

    if cancel_tx.send(true).is_err() {
        tracing::debug!("Command interpreter already finished");
    }
    let console = match interpreter.await {
        Ok(exit) => Some(exit),
        Err(e) => {
            tracing::warn!("Command interpreter task failed: {}", e);
            None
        }
    };

    // Failures were already reported where they happened
    if result.is_ok() {
        metrics.log_summary();
    }

    RunSummary {
        result,
        stop_reason: run_state.stop_reason(),
        console,
    }
}
