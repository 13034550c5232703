//! Services - the sweep itself and everything it drives.
//!
//! These modules hold no global state. All inputs are explicit, so every
//! piece can be exercised against a [`SimulatedBus`](crate::bus::SimulatedBus),
//! an in-memory writer or a mock link.
//!
//! # Components
//!
//! - [`InstrumentSession`]: command/query channel to one named instrument,
//!   with reply parsing and the best-effort close sequence
//! - [`DataLog`]: the line-flushed `vac.dat` writer
//! - [`PlotSink`]: the gnuplot process and its text protocol
//! - [`ResourceStack`]: staged acquisition and reverse-order release of the
//!   four resources above
//! - [`run_sweep`]: the step loop and the supply shutdown action
//! - [`dialect`]: command strings for the supply/meter pair
//!
//! # Flow
//!
//! ```ignore
//! let stack = ResourceStack::acquire(&bus, &plan).await?;
//! let outcome = stack.run(&config.sweep, &run_state, &metrics).await?;
//! ```

pub mod data_log;
pub mod dialect;
pub mod plot;
pub mod resources;
pub mod session;
pub mod sweep;

pub use data_log::DataLog;
pub use plot::PlotSink;
pub use resources::{AcquireError, ResourceStack, StackPlan, Stage, TeardownReport};
pub use session::{InstrumentSession, SessionError, SessionOptions, parse_reading};
pub use sweep::{
    Rig, SetupReport, StepError, SweepOutcome, SweepState, commanded_voltage, run_sweep,
};
