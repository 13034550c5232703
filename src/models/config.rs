use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Complete configuration from `vac.yaml`
///
/// Every section has defaults matching the bench this program was written
/// for, so an empty or missing file yields a usable configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sweep: SweepConfig,
    pub instruments: InstrumentSettings,
    pub plot: PlotSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

/// Sweep parameters, fixed for the duration of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Lower bound of the plot range, V
    pub voltage_min: f64,

    /// Last voltage that may be commanded, V
    pub voltage_max: f64,

    /// Increment between consecutive steps, V
    pub voltage_step: f64,

    /// Supply current limit on the sweep channel, A
    pub current_limit: f64,

    /// Wait between commanding a voltage and reading it back
    pub settle_delay_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            voltage_min: 0.0,
            voltage_max: 10.0,
            voltage_step: 0.1,
            current_limit: 0.1,
            settle_delay_ms: 1000,
        }
    }
}

impl SweepConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Which transport backs the instrument bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Character devices listed in `devices`
    #[default]
    Device,

    /// In-process bench model
    Simulated,
}

/// Maps an instrument name to its device node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Bus name of the programmable power supply
    pub supply: String,

    /// Bus name of the voltmeter
    pub meter: String,

    pub bus: BusKind,

    #[serde(default)]
    pub devices: Vec<DeviceEntry>,

    /// Settle time after the reset command on close
    pub close_grace_ms: u64,

    /// Maximum response length accepted from one read
    pub read_buffer_len: usize,

    /// Load resistance of the simulated bench, ohms
    pub simulated_load_ohms: f64,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            supply: "AKIP-1142/3G".to_string(),
            meter: "AKIP-V7-78/1".to_string(),
            bus: BusKind::Device,
            devices: Vec::new(),
            close_grace_ms: 1000,
            read_buffer_len: 100,
            simulated_load_ohms: 100.0,
        }
    }
}

impl InstrumentSettings {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    /// Launch the live plot at all
    pub enabled: bool,

    /// Plot program reading commands on stdin
    pub program: String,

    pub args: Vec<String>,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "gnuplot".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory that receives the experiment directories
    pub base_dir: Utf8PathBuf,

    /// Data log name inside the experiment directory
    pub data_file: String,

    /// Plot program stdout/stderr capture inside the experiment directory
    pub plot_log_file: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            base_dir: Utf8PathBuf::from("."),
            data_file: "vac.dat".to_string(),
            plot_log_file: "gnuplot.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: Utf8PathBuf,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from("logs"),
            prefix: "vac".to_string(),
            debug: false,
            console: true,
        }
    }
}

/// Semantic problems in an otherwise well-formed configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("voltage_step must be positive (got {0})")]
    NonPositiveStep(f64),

    #[error("voltage_max ({max}) is below voltage_min ({min})")]
    InvertedRange { min: f64, max: f64 },

    #[error("current_limit must be positive (got {0})")]
    NonPositiveCurrentLimit(f64),

    #[error("voltage_max / voltage_step gives more steps than can be counted ({0})")]
    TooManySteps(f64),

    #[error("read_buffer_len must be at least 1")]
    EmptyReadBuffer,

    #[error("{0} instrument name is empty")]
    EmptyInstrumentName(&'static str),

    #[error("simulated_load_ohms must be positive (got {0})")]
    NonPositiveLoad(f64),
}

impl AppConfig {
    /// Check values that parse fine but cannot drive a sweep
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let sweep = &self.sweep;

        // `!(x > 0.0)` also rejects NaN
        if !(sweep.voltage_step > 0.0) {
            return Err(ConfigValidationError::NonPositiveStep(sweep.voltage_step));
        }
        if !(sweep.voltage_max >= sweep.voltage_min) {
            return Err(ConfigValidationError::InvertedRange {
                min: sweep.voltage_min,
                max: sweep.voltage_max,
            });
        }
        // The step index must still fit after the last step
        let last_index = (sweep.voltage_max / sweep.voltage_step).floor();
        if !(last_index < u32::MAX as f64) {
            return Err(ConfigValidationError::TooManySteps(last_index));
        }
        if !(sweep.current_limit > 0.0) {
            return Err(ConfigValidationError::NonPositiveCurrentLimit(
                sweep.current_limit,
            ));
        }

        let instruments = &self.instruments;
        if instruments.read_buffer_len == 0 {
            return Err(ConfigValidationError::EmptyReadBuffer);
        }
        if instruments.supply.trim().is_empty() {
            return Err(ConfigValidationError::EmptyInstrumentName("supply"));
        }
        if instruments.meter.trim().is_empty() {
            return Err(ConfigValidationError::EmptyInstrumentName("meter"));
        }
        if !(instruments.simulated_load_ohms > 0.0) {
            return Err(ConfigValidationError::NonPositiveLoad(
                instruments.simulated_load_ohms,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_defaults() {
        let sweep = SweepConfig::default();
        assert_eq!(sweep.voltage_max, 10.0);
        assert_eq!(sweep.voltage_step, 0.1);
        assert_eq!(sweep.current_limit, 0.1);
        assert_eq!(sweep.settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validation_rejects_bad_step() {
        let mut config = AppConfig::default();
        config.sweep.voltage_step = 0.0;
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::NonPositiveStep(0.0))
        );

        config.sweep.voltage_step = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_uncountable_sweep() {
        let mut config = AppConfig::default();
        config.sweep.voltage_max = 1e10;
        config.sweep.voltage_step = 1e-3;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::TooManySteps(_))
        ));

        config.sweep.voltage_max = f64::INFINITY;
        config.sweep.voltage_step = 0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::TooManySteps(_))
        ));

        // Large but countable
        config.sweep.voltage_max = 4.0e9;
        config.sweep.voltage_step = 1.0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validation_rejects_inverted_range() {
        let mut config = AppConfig::default();
        config.sweep.voltage_min = 5.0;
        config.sweep.voltage_max = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "sweep:\n  voltage_max: 2.5\ninstruments:\n  bus: simulated\n";
        let config: AppConfig = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.sweep.voltage_max, 2.5);
        assert_eq!(config.sweep.voltage_step, 0.1);
        assert_eq!(config.instruments.bus, BusKind::Simulated);
        assert_eq!(config.instruments.supply, "AKIP-1142/3G");
        assert_eq!(config.output.data_file, "vac.dat");
    }
}
