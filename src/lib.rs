// vac - automated I-V sweep for a supply/voltmeter bench
//
// This is the library crate containing the sweep controller, the instrument
// bus abstraction and the supporting models. The binary crate (main.rs)
// provides the command line entry point.

pub mod app;
pub mod bus;
pub mod config;
pub mod console;
pub mod experiment;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use app::{Cli, RunSummary, run_experiment, select_bus};
pub use config::ConfigManager;
pub use experiment::ExperimentLayout;
pub use models::{AppConfig, SweepConfig, SweepStep};
pub use state::{RunState, StopReason};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
