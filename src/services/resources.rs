//! Staged acquisition and ordered teardown of everything a sweep holds.
//!
//! Resources are pushed onto a stack as they are acquired and popped on
//! release, so teardown always runs in reverse acquisition order and each
//! resource is released exactly once. A failure at any stage unwinds the
//! stages before it and nothing else.

use crate::bus::InstrumentBus;
use crate::metrics::SweepMetrics;
use crate::models::{AppConfig, SweepConfig};
use crate::services::sweep::{Rig, SweepOutcome, run_sweep};
use crate::services::{DataLog, InstrumentSession, PlotSink, SessionError, SessionOptions};
use crate::state::RunState;
use camino::Utf8PathBuf;
use std::fmt;
use std::io;
use thiserror::Error;

/// Acquisition order. Release runs from the highest stage down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Supply = 0,
    Meter = 1,
    DataLog = 2,
    PlotSink = 3,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Supply => write!(f, "supply"),
            Stage::Meter => write!(f, "meter"),
            Stage::DataLog => write!(f, "data log"),
            Stage::PlotSink => write!(f, "plot"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Supply: {0}")]
    Supply(#[source] SessionError),

    #[error("Meter: {0}")]
    Meter(#[source] SessionError),

    #[error("Unable to create data log {path}: {source}")]
    DataLog {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to start plot process {program}: {source}")]
    PlotSink {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Resource stack has no {0}")]
    Missing(Stage),
}

impl AcquireError {
    /// The stage that failed
    pub fn stage(&self) -> Stage {
        match self {
            AcquireError::Supply(_) => Stage::Supply,
            AcquireError::Meter(_) => Stage::Meter,
            AcquireError::DataLog { .. } => Stage::DataLog,
            AcquireError::PlotSink { .. } => Stage::PlotSink,
            AcquireError::Missing(stage) => *stage,
        }
    }
}

/// Everything [`ResourceStack::acquire`] needs to know
#[derive(Debug, Clone)]
pub struct StackPlan {
    pub supply: String,
    pub meter: String,
    pub session: SessionOptions,
    pub data_log: Utf8PathBuf,
    pub plot_log: Utf8PathBuf,
    /// `None` runs without a plot process
    pub plot_program: Option<(String, Vec<String>)>,
    pub voltage_min: f64,
    pub voltage_max: f64,
}

impl StackPlan {
    /// Build a plan from the configuration and the experiment's file paths
    pub fn from_config(config: &AppConfig, data_log: Utf8PathBuf, plot_log: Utf8PathBuf) -> Self {
        let instruments = &config.instruments;
        Self {
            supply: instruments.supply.clone(),
            meter: instruments.meter.clone(),
            session: SessionOptions {
                read_buffer_len: instruments.read_buffer_len,
                close_grace: instruments.close_grace(),
            },
            data_log,
            plot_log,
            plot_program: config
                .plot
                .enabled
                .then(|| (config.plot.program.clone(), config.plot.args.clone())),
            voltage_min: config.sweep.voltage_min,
            voltage_max: config.sweep.voltage_max,
        }
    }
}

enum Resource {
    Session(InstrumentSession),
    DataLog(DataLog),
    Plot(PlotSink),
}

struct Acquired {
    stage: Stage,
    resource: Resource,
}

/// What happened during release
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Stages in the order they were released
    pub released: Vec<Stage>,
    pub problems: Vec<(Stage, String)>,
}

/// Ordered set of acquired sweep resources
pub struct ResourceStack {
    acquired: Vec<Acquired>,
}

impl fmt::Debug for ResourceStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.acquired.iter().map(|a| a.stage))
            .finish()
    }
}

impl ResourceStack {
    /// Acquire supply, meter, data log and plot process, in that order.
    ///
    /// On failure, whatever was acquired is released in reverse order
    /// before the error is returned.
    pub async fn acquire(bus: &dyn InstrumentBus, plan: &StackPlan) -> Result<Self, AcquireError> {
        let mut stack = Self {
            acquired: Vec::with_capacity(4),
        };

        if let Err(e) = stack.acquire_all(bus, plan).await {
            tracing::error!("Acquiring {} failed: {}", e.stage(), e);
            stack.release().await;
            return Err(e);
        }

        tracing::info!("All sweep resources acquired");
        Ok(stack)
    }

    async fn acquire_all(&mut self, bus: &dyn InstrumentBus, plan: &StackPlan) -> Result<(), AcquireError> {
        let supply = InstrumentSession::open(bus, &plan.supply, plan.session)
            .map_err(AcquireError::Supply)?;
        self.push(Stage::Supply, Resource::Session(supply));

        let meter =
            InstrumentSession::open(bus, &plan.meter, plan.session).map_err(AcquireError::Meter)?;
        self.push(Stage::Meter, Resource::Session(meter));

        let log = DataLog::create(&plan.data_log).map_err(|source| AcquireError::DataLog {
            path: plan.data_log.clone(),
            source,
        })?;
        self.push(Stage::DataLog, Resource::DataLog(log));

        let (program, mut plot) = match &plan.plot_program {
            Some((program, args)) => {
                let plot = PlotSink::spawn(program, args, &plan.plot_log).map_err(|source| {
                    AcquireError::PlotSink {
                        program: program.clone(),
                        source,
                    }
                })?;
                (program.as_str(), plot)
            }
            None => {
                tracing::info!("Plotting disabled");
                ("none", PlotSink::discard())
            }
        };

        if let Err(source) = plot.setup(plan.voltage_min, plan.voltage_max).await {
            // Not on the stack yet, so it is closed here
            if let Err(e) = plot.close().await {
                tracing::warn!("Closing plot process: {}", e);
            }
            return Err(AcquireError::PlotSink {
                program: program.to_string(),
                source,
            });
        }
        self.push(Stage::PlotSink, Resource::Plot(plot));

        Ok(())
    }

    /// Assemble a full stack from resources opened elsewhere
    pub fn from_resources(
        supply: InstrumentSession,
        meter: InstrumentSession,
        log: DataLog,
        plot: PlotSink,
    ) -> Self {
        let mut stack = Self {
            acquired: Vec::with_capacity(4),
        };
        stack.push(Stage::Supply, Resource::Session(supply));
        stack.push(Stage::Meter, Resource::Session(meter));
        stack.push(Stage::DataLog, Resource::DataLog(log));
        stack.push(Stage::PlotSink, Resource::Plot(plot));
        stack
    }

    fn push(&mut self, stage: Stage, resource: Resource) {
        tracing::debug!("Acquired {}", stage);
        self.acquired.push(Acquired { stage, resource });
    }

    /// Stages currently held, in acquisition order
    pub fn stages(&self) -> Vec<Stage> {
        self.acquired.iter().map(|a| a.stage).collect()
    }

    fn rig(&mut self) -> Result<Rig<'_>, Stage> {
        let mut supply = None;
        let mut meter = None;
        let mut log = None;
        let mut plot = None;

        for entry in self.acquired.iter_mut() {
            match (entry.stage, &mut entry.resource) {
                (Stage::Supply, Resource::Session(session)) => supply = Some(session),
                (Stage::Meter, Resource::Session(session)) => meter = Some(session),
                (_, Resource::DataLog(data_log)) => log = Some(data_log),
                (_, Resource::Plot(sink)) => plot = Some(sink),
                _ => {}
            }
        }

        Ok(Rig {
            supply: supply.ok_or(Stage::Supply)?,
            meter: meter.ok_or(Stage::Meter)?,
            log: log.ok_or(Stage::DataLog)?,
            plot: plot.ok_or(Stage::PlotSink)?,
        })
    }

    /// Run the sweep over the acquired resources, then release them all
    /// regardless of the outcome.
    pub async fn run(
        mut self,
        config: &SweepConfig,
        run_state: &RunState,
        metrics: &SweepMetrics,
    ) -> Result<SweepOutcome, AcquireError> {
        let outcome = match self.rig() {
            Ok(rig) => Ok(run_sweep(rig, config, run_state, metrics).await),
            Err(stage) => {
                let err = AcquireError::Missing(stage);
                tracing::error!("{}", err);
                Err(err)
            }
        };

        self.release().await;
        outcome
    }

    /// Release everything in reverse acquisition order.
    ///
    /// Every resource is released even if an earlier release failed.
    pub async fn release(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        while let Some(Acquired { stage, resource }) = self.acquired.pop() {
            tracing::debug!("Releasing {}", stage);

            let problems: Vec<String> = match resource {
                Resource::Session(session) => session
                    .close()
                    .await
                    .into_iter()
                    .map(|e| e.to_string())
                    .collect(),
                Resource::DataLog(log) => {
                    let path = log.path().to_path_buf();
                    match log.close() {
                        Ok(()) => Vec::new(),
                        Err(e) => {
                            tracing::error!("Unable to close data log {} ({})", path, e);
                            vec![e.to_string()]
                        }
                    }
                }
                Resource::Plot(plot) => match plot.close().await {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        tracing::error!("Unable to close plot pipe ({})", e);
                        vec![e.to_string()]
                    }
                },
            };

            report.released.push(stage);
            report
                .problems
                .extend(problems.into_iter().map(|problem| (stage, problem)));
        }

        if !report.problems.is_empty() {
            tracing::warn!("Teardown finished with {} problems", report.problems.len());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, SimulatedBus};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_subscriber::util::SubscriberInitExt;

    const SUPPLY: &str = "pps";
    const METER: &str = "vm";

    fn plan(temp_dir: &TempDir) -> StackPlan {
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        StackPlan {
            supply: SUPPLY.to_string(),
            meter: METER.to_string(),
            session: SessionOptions {
                read_buffer_len: 100,
                close_grace: Duration::from_millis(1),
            },
            data_log: dir.join("vac.dat"),
            plot_log: dir.join("gnuplot.log"),
            plot_program: None,
            voltage_min: 0.0,
            voltage_max: 1.0,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release_in_reverse() {
        let temp_dir = TempDir::new().unwrap();
        let bus = SimulatedBus::new(SUPPLY, METER);

        let mut stack = ResourceStack::acquire(&bus, &plan(&temp_dir)).await.unwrap();
        assert_eq!(
            stack.stages(),
            vec![Stage::Supply, Stage::Meter, Stage::DataLog, Stage::PlotSink]
        );

        let report = stack.release().await;
        assert_eq!(
            report.released,
            vec![Stage::PlotSink, Stage::DataLog, Stage::Meter, Stage::Supply]
        );
        assert!(report.problems.is_empty());

        // A second release has nothing left to do
        assert!(stack.release().await.released.is_empty());
    }

    #[tokio::test]
    async fn test_supply_failure_acquires_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let plan = plan(&temp_dir);
        let bus = SimulatedBus::new(SUPPLY, METER).refuse_open(SUPPLY);

        let err = ResourceStack::acquire(&bus, &plan).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Supply);
        assert!(!plan.data_log.exists());
        assert_eq!(bus.journal(), vec![BusEvent::OpenRefused(SUPPLY.to_string())]);
    }

    #[tokio::test]
    async fn test_data_log_failure_releases_both_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let plan = plan(&temp_dir);
        std::fs::write(&plan.data_log, "existing\n").unwrap();
        let bus = SimulatedBus::new(SUPPLY, METER);

        let err = ResourceStack::acquire(&bus, &plan).await.unwrap_err();
        assert_eq!(err.stage(), Stage::DataLog);

        let released: Vec<BusEvent> = bus
            .journal()
            .into_iter()
            .filter(|e| matches!(e, BusEvent::Released(_)))
            .collect();
        assert_eq!(
            released,
            vec![
                BusEvent::Released(METER.to_string()),
                BusEvent::Released(SUPPLY.to_string())
            ]
        );
    }

    /// Accepts every write; flushes fail once `flushes_left` runs out
    struct FlushFailsOnClose {
        flushes_left: usize,
    }

    impl Write for FlushFailsOnClose {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.flushes_left == 0 {
                return Err(io::Error::other("device went away"));
            }
            self.flushes_left -= 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_data_log_close_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let plan = plan(&temp_dir);
        let bus = SimulatedBus::new(SUPPLY, METER);

        let captured = Captured::default();
        let writer = captured.clone();
        let _subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish()
            .set_default();

        let supply = InstrumentSession::open(&bus, SUPPLY, plan.session).unwrap();
        let meter = InstrumentSession::open(&bus, METER, plan.session).unwrap();
        // One flush per header line; the flush in close fails
        let log = DataLog::from_writer(
            &plan.data_log,
            Box::new(FlushFailsOnClose { flushes_left: 5 }),
        )
        .unwrap();
        let mut stack = ResourceStack::from_resources(supply, meter, log, PlotSink::discard());

        let report = stack.release().await;

        assert_eq!(report.released.len(), 4);
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].0, Stage::DataLog);
        assert!(report.problems[0].1.contains("device went away"));

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("ERROR"));
        assert!(text.contains("Unable to close data log"));
        assert!(text.contains("device went away"));
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Supply < Stage::Meter);
        assert!(Stage::DataLog < Stage::PlotSink);
        assert_eq!(Stage::PlotSink as u8, 3);
    }
}
