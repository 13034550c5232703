//! Data models for the sweep controller.
//!
//! - [`AppConfig`]: everything loaded from `vac.yaml` (sweep parameters,
//!   instrument names and bus, plot program, output layout, logging)
//! - [`SweepConfig`]: the sweep parameters, fixed for one run
//! - [`SweepStep`]: one completed iteration, as logged and plotted
//! - [`LogRecord`]: a data line parsed back from `vac.dat`
//!
//! Config structs derive `Serialize`/`Deserialize` and default every field,
//! so partial files are accepted.

pub mod config;
pub mod step;

pub use config::{
    AppConfig, BusKind, ConfigValidationError, DeviceEntry, InstrumentSettings, LoggingSettings,
    OutputSettings, PlotSettings, SweepConfig,
};
pub use step::{LOG_HEADER, LogParseError, LogRecord, SweepStep, format_scientific};
