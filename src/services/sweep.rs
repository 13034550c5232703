//! The step loop.
//!
//! One iteration: set the voltage, wait for it to settle, read back supply
//! voltage, supply current and meter current, append the line to the data
//! log, refresh the plot. The loop ends when the next set point would pass
//! `voltage_max`, when the run state is cleared from outside, or on a
//! [`StepError`]. The supply is always switched off afterwards.

use crate::metrics::SweepMetrics;
use crate::models::{SweepConfig, SweepStep};
use crate::services::dialect;
use crate::services::{DataLog, InstrumentSession, PlotSink, SessionError};
use crate::state::{RunState, StopReason};
use std::io;
use thiserror::Error;
use tokio::time::Instant;

/// Errors that end the sweep early
#[derive(Error, Debug)]
pub enum StepError {
    #[error("step {index}: {source}")]
    Query {
        index: u32,
        #[source]
        source: SessionError,
    },

    #[error("step {index}: unable to write data log: {source}")]
    LogWrite {
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("step {index}: unable to refresh plot: {source}")]
    PlotWrite {
        index: u32,
        #[source]
        source: io::Error,
    },
}

/// How the loop left the stepping state
#[derive(Debug)]
pub enum SweepState {
    /// The next set point would exceed `voltage_max`
    Completed,
    /// The run state was cleared by the operator or end of input
    Stopped,
    Aborted(StepError),
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub state: SweepState,
    /// Steps recorded in the data log
    pub steps: u32,
    pub setup: SetupReport,
}

impl SweepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.state, SweepState::Aborted(_))
    }
}

/// Per-command result of the instrument setup phase
#[derive(Debug, Default)]
pub struct SetupReport {
    pub outcomes: Vec<(String, Result<(), SessionError>)>,
}

impl SetupReport {
    fn run(&mut self, session: &mut InstrumentSession, commands: &[String]) {
        for command in commands {
            let result = session.send(command);
            self.outcomes.push((command.clone(), result));
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &SessionError> {
        self.outcomes.iter().filter_map(|(_, result)| result.as_ref().err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Everything the loop drives, borrowed from the resource stack
pub struct Rig<'a> {
    pub supply: &'a mut InstrumentSession,
    pub meter: &'a mut InstrumentSession,
    pub log: &'a mut DataLog,
    pub plot: &'a mut PlotSink,
}

/// Set point for step `index`
pub fn commanded_voltage(index: u32, voltage_step: f64) -> f64 {
    index as f64 * voltage_step
}

/// Send the setup sequences to both instruments. Failures are collected,
/// never fatal.
pub fn configure_instruments(rig: &mut Rig<'_>, config: &SweepConfig) -> SetupReport {
    let mut report = SetupReport::default();
    report.run(rig.supply, &dialect::supply_setup(config));
    report.run(rig.meter, &dialect::meter_setup());

    if tracing::enabled!(tracing::Level::DEBUG) {
        for session in [&mut *rig.supply, &mut *rig.meter] {
            match session.query_text(dialect::ERROR_QUERY) {
                Ok(reply) => tracing::debug!("{} error queue: {}", session.name(), reply),
                Err(e) => tracing::debug!("{} error queue unavailable: {}", session.name(), e),
            }
        }
    }

    report
}

fn read(
    session: &mut InstrumentSession,
    command: &str,
    index: u32,
    metrics: &SweepMetrics,
) -> Result<f64, StepError> {
    let value = session
        .query(command)
        .map_err(|source| StepError::Query { index, source })?;
    if value.is_nan() {
        metrics.record_nan_reading();
    }
    Ok(value)
}

/// Output off, set point to zero. Best effort.
fn shutdown_supply(supply: &mut InstrumentSession, metrics: &SweepMetrics) {
    tracing::info!("Switching off {}", supply.name());
    for command in dialect::SHUTDOWN {
        if supply.send(command).is_err() {
            metrics.record_command_failure();
        }
    }
}

/// Run the sweep to a terminal state, then switch the supply off.
///
/// The settle wait is the only suspension point. A stop request during it
/// lets the current step finish; it is observed before the next one.
pub async fn run_sweep(
    mut rig: Rig<'_>,
    config: &SweepConfig,
    run_state: &RunState,
    metrics: &SweepMetrics,
) -> SweepOutcome {
    let setup = configure_instruments(&mut rig, config);
    let setup_failures = setup.failures().count();
    if setup_failures > 0 {
        tracing::warn!("Instrument setup: {} commands failed", setup_failures);
        for _ in 0..setup_failures {
            metrics.record_command_failure();
        }
    }

    let log_path = rig.log.path().to_path_buf();
    let settle = config.settle_delay();
    let mut clock: Option<Instant> = None;
    let mut index: u32 = 0;

    tracing::info!(
        "Sweeping 0..{} V in {} V steps, limit {} A",
        config.voltage_max,
        config.voltage_step,
        config.current_limit
    );

    let state = loop {
        if !run_state.is_running() {
            break SweepState::Stopped;
        }

        let commanded = commanded_voltage(index, config.voltage_step);
        if commanded > config.voltage_max {
            run_state.stop(StopReason::Completed);
            break SweepState::Completed;
        }

        if rig.supply.send(&dialect::set_voltage(commanded)).is_err() {
            metrics.record_command_failure();
        }

        tokio::time::sleep(settle).await;

        let elapsed_seconds = match clock {
            Some(started) => started.elapsed().as_secs_f64(),
            None => {
                clock = Some(Instant::now());
                0.0
            }
        };

        let step = async {
            let step = SweepStep {
                index,
                elapsed_seconds,
                commanded_voltage: commanded,
                supply_voltage: read(rig.supply, dialect::MEASURE_VOLTAGE, index, metrics)?,
                supply_current: read(rig.supply, dialect::MEASURE_CURRENT, index, metrics)?,
                meter_current: read(rig.meter, dialect::METER_READ, index, metrics)?,
            };

            rig.log
                .append(&step)
                .map_err(|source| StepError::LogWrite { index, source })?;
            metrics.record_step();

            rig.plot
                .refresh(index, elapsed_seconds, &log_path)
                .await
                .map_err(|source| StepError::PlotWrite { index, source })?;
            metrics.record_plot_refresh();

            Ok::<_, StepError>(step)
        };

        match step.await {
            Ok(step) => {
                tracing::debug!(
                    "Step {}: {:.3} V set, {} V / {} A read, meter {} A",
                    step.index,
                    step.commanded_voltage,
                    step.supply_voltage,
                    step.supply_current,
                    step.meter_current
                );
            }
            Err(e) => {
                tracing::error!("Sweep aborted: {}", e);
                run_state.stop(StopReason::Aborted);
                break SweepState::Aborted(e);
            }
        }

        index += 1;
    };

    shutdown_supply(rig.supply, metrics);

    let steps = metrics.steps() as u32;
    match &state {
        SweepState::Completed => tracing::info!("Sweep completed after {} steps", steps),
        SweepState::Stopped => tracing::info!(
            "Sweep stopped after {} steps ({})",
            steps,
            run_state
                .stop_reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        SweepState::Aborted(_) => tracing::warn!("Sweep aborted after {} steps", steps),
    }

    SweepOutcome {
        state,
        steps,
        setup,
    }
}
