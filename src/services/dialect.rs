//! Command strings for the supply/meter pair on the bench.
//!
//! Only the commands the sweep needs are here. The supply is a two-channel
//! unit: channel 1 feeds the device's auxiliary rail at a fixed 5 V, channel
//! 2 is swept. The meter measures DC current in series with the device.

use crate::models::SweepConfig;

pub const MEASURE_VOLTAGE: &str = "measure:voltage?";
pub const MEASURE_CURRENT: &str = "measure:current?";
pub const METER_READ: &str = "read?";
pub const RESET: &str = "*rst";
pub const ERROR_QUERY: &str = "system:error?";

/// Commands issued after the sweep leaves the stepping state
pub const SHUTDOWN: [&str; 2] = ["output 0", "voltage 0"];

/// Supply set point for one step (`voltage 1.200`)
pub fn set_voltage(volts: f64) -> String {
    format!("voltage {:.3}", volts)
}

/// Supply initialization: auxiliary rail on channel 1, sweep channel 2 at
/// 0 V with over-voltage protection one volt above the sweep maximum.
/// Channel 2 stays selected so measurements read it.
pub fn supply_setup(sweep: &SweepConfig) -> Vec<String> {
    vec![
        "output 0".to_string(),
        "instrument:nselect 1".to_string(),
        "voltage:protection:clear".to_string(),
        "voltage:protection:state on".to_string(),
        "voltage:protection:level 5.5V".to_string(),
        "voltage 5.0".to_string(),
        "current 0.5".to_string(),
        "channel:output 1".to_string(),
        "instrument:nselect 2".to_string(),
        "voltage:protection:clear".to_string(),
        "voltage:protection:state on".to_string(),
        format!("voltage:protection:level {}V", sweep.voltage_max + 1.0),
        "voltage 0.0".to_string(),
        format!("current {}", sweep.current_limit),
        "channel:output 1".to_string(),
    ]
}

/// Meter initialization: DC current, auto range, 10 NPLC, one immediate
/// sample per `read?`.
pub fn meter_setup() -> Vec<String> {
    [
        "function \"current:dc\"",
        "current:dc:range:auto on",
        "current:dc:nplcycles 10",
        "trigger:source immediate",
        "trigger:delay:auto off",
        "trigger:delay 0",
        "trigger:count 1",
        "sample:count 1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
