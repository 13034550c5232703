use thiserror::Error;

/// Comment header written at the top of every data log
pub const LOG_HEADER: [&str; 5] = [
    "# 1: index",
    "# 2: time, s",
    "# 3: pps voltage, V",
    "# 4: pps current, A",
    "# 5: vm current, A",
];

/// Digits after the decimal point for each logged column
const ELAPSED_DIGITS: usize = 6;
const SUPPLY_DIGITS: usize = 3;
const METER_DIGITS: usize = 8;

/// One completed sweep iteration.
///
/// Produced exactly once per step, immutable afterwards. NaN in a reading
/// field marks a reply that could not be obtained or parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepStep {
    pub index: u32,
    pub elapsed_seconds: f64,
    pub commanded_voltage: f64,
    pub supply_voltage: f64,
    pub supply_current: f64,
    pub meter_current: f64,
}

impl SweepStep {
    /// Render the tab-separated data line (without newline)
    pub fn to_log_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.index,
            format_scientific(self.elapsed_seconds, ELAPSED_DIGITS),
            format_scientific(self.supply_voltage, SUPPLY_DIGITS),
            format_scientific(self.supply_current, SUPPLY_DIGITS),
            format_scientific(self.meter_current, METER_DIGITS),
        )
    }
}

/// A data line read back from a log.
///
/// The commanded voltage is not persisted, so this is a subset of
/// [`SweepStep`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    pub index: u32,
    pub elapsed_seconds: f64,
    pub supply_voltage: f64,
    pub supply_current: f64,
    pub meter_current: f64,
}

#[derive(Error, Debug, PartialEq)]
pub enum LogParseError {
    #[error("expected 5 columns, found {0}")]
    ColumnCount(usize),

    #[error("invalid index '{0}'")]
    Index(String),

    #[error("invalid number '{value}' in column {column}")]
    Number { column: usize, value: String },
}

impl LogRecord {
    /// Parse one data line. Comment lines are the caller's business.
    pub fn parse(line: &str) -> Result<Self, LogParseError> {
        let columns: Vec<&str> = line.trim_end().split('\t').collect();
        if columns.len() != 5 {
            return Err(LogParseError::ColumnCount(columns.len()));
        }

        let index = columns[0]
            .parse()
            .map_err(|_| LogParseError::Index(columns[0].to_string()))?;

        let number = |column: usize| -> Result<f64, LogParseError> {
            columns[column].parse().map_err(|_| LogParseError::Number {
                column: column + 1,
                value: columns[column].to_string(),
            })
        };

        Ok(Self {
            index,
            elapsed_seconds: number(1)?,
            supply_voltage: number(2)?,
            supply_current: number(3)?,
            meter_current: number(4)?,
        })
    }
}

impl From<&SweepStep> for LogRecord {
    fn from(step: &SweepStep) -> Self {
        Self {
            index: step.index,
            elapsed_seconds: step.elapsed_seconds,
            supply_voltage: step.supply_voltage,
            supply_current: step.supply_current,
            meter_current: step.meter_current,
        }
    }
}

/// printf-style `%.<digits>e`: mantissa, `e`, explicit exponent sign,
/// at least two exponent digits (`1.500e+00`, `-2.00000000e-07`).
pub fn format_scientific(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let raw = format!("{:.*e}", digits, value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => raw,
    }
}
