// Run metrics
//
// Lightweight counters for one sweep, summarized in the log when it ends

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one sweep run.
///
/// Uses atomic operations so the sweep task can record while another task
/// reads a snapshot, without locks.
#[derive(Debug)]
pub struct SweepMetrics {
    /// Steps appended to the data log
    pub steps_recorded: AtomicU64,

    /// Readings that came back as NaN (timeout, fault, malformed reply)
    pub nan_readings: AtomicU64,

    /// Best-effort commands that failed (setup, set point, shutdown)
    pub command_failures: AtomicU64,

    /// Plot refreshes delivered
    pub plot_refreshes: AtomicU64,

    start_time: Instant,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self {
            steps_recorded: AtomicU64::new(0),
            nan_readings: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            plot_refreshes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_step(&self) {
        self.steps_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nan_reading(&self) {
        self.nan_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plot_refresh(&self) {
        self.plot_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn steps(&self) -> u64 {
        self.steps_recorded.load(Ordering::Relaxed)
    }

    /// Wall time since the metrics were created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Fraction of readings that were NaN (three readings per step)
    pub fn nan_ratio(&self) -> f64 {
        let steps = self.steps();
        if steps == 0 {
            return 0.0;
        }
        self.nan_readings.load(Ordering::Relaxed) as f64 / (steps * 3) as f64
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Sweep Summary ===");
        tracing::info!("Run time: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Steps: {} recorded, {} plot refreshes",
            self.steps(),
            self.plot_refreshes.load(Ordering::Relaxed)
        );

        let nan = self.nan_readings.load(Ordering::Relaxed);
        let failures = self.command_failures.load(Ordering::Relaxed);
        if nan > 0 || failures > 0 {
            tracing::warn!(
                "Readings lost: {} ({:.1}%), failed commands: {}",
                nan,
                self.nan_ratio() * 100.0,
                failures
            );
        }
    }
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SweepMetrics::new();
        assert_eq!(metrics.steps(), 0);
        assert_eq!(metrics.nan_readings.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_counters() {
        let metrics = SweepMetrics::new();

        metrics.record_step();
        metrics.record_step();
        metrics.record_plot_refresh();
        metrics.record_command_failure();

        assert_eq!(metrics.steps(), 2);
        assert_eq!(metrics.plot_refreshes.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.command_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_nan_ratio() {
        let metrics = SweepMetrics::new();
        assert_eq!(metrics.nan_ratio(), 0.0);

        metrics.record_step();
        metrics.record_step();
        metrics.record_nan_reading();
        metrics.record_nan_reading();
        metrics.record_nan_reading();
        assert_eq!(metrics.nan_ratio(), 0.5);
    }
}
