// Run state module
//
// This module provides RunState, the single flag shared between the operator
// console and the sweep loop. It wraps the flag in Arc<RwLock<T>> so both
// tasks hold a handle to the same cell instead of a process-wide global.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Why the run stopped.
///
/// Only the first stop request is recorded; later requests are ignored
/// because the flag is already down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Operator typed a stop command on the console
    Operator,

    /// Operator input reached end of file
    InputClosed,

    /// The sweep passed `voltage_max`
    Completed,

    /// A step failed (disconnected instrument, log or plot write error)
    Aborted,

    /// Resource acquisition failed before the first step
    AcquireFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Operator => "stopped by operator",
            StopReason::InputClosed => "operator input closed",
            StopReason::Completed => "sweep completed",
            StopReason::Aborted => "sweep aborted",
            StopReason::AcquireFailed => "resource acquisition failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
struct RunFlag {
    running: bool,
    reason: Option<StopReason>,
}

/// Shared "continue running" flag for cooperative cancellation.
///
/// # Invariants
///
/// - Starts `true`.
/// - Once [`stop()`](Self::stop) has been called it never returns to `true`;
///   there is deliberately no way to restart a run.
/// - Reads and writes are guarded by an `RwLock`: any number of concurrent
///   readers or one writer. Neither operation can fail; a poisoned lock is
///   recovered because a `bool` cannot be left half-written.
///
/// Cloning is cheap and every clone observes the same flag.
#[derive(Clone, Debug)]
pub struct RunState {
    flag: Arc<RwLock<RunFlag>>,
}

impl RunState {
    /// Create a new running state
    pub fn new() -> Self {
        Self {
            flag: Arc::new(RwLock::new(RunFlag {
                running: true,
                reason: None,
            })),
        }
    }

    fn read_flag(&self) -> RwLockReadGuard<'_, RunFlag> {
        self.flag.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_flag(&self) -> RwLockWriteGuard<'_, RunFlag> {
        self.flag.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the sweep should keep going
    pub fn is_running(&self) -> bool {
        self.read_flag().running
    }

    /// Request the run to stop.
    ///
    /// # Returns
    /// `true` if this call lowered the flag, `false` if it was already down
    pub fn stop(&self, reason: StopReason) -> bool {
        let mut flag = self.write_flag();
        if !flag.running {
            return false;
        }

        flag.running = false;
        flag.reason = Some(reason);
        drop(flag);

        tracing::debug!("Run state lowered: {}", reason);
        true
    }

    /// The reason recorded by the first stop request, if any
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.read_flag().reason
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_run_state_is_running() {
        let state = RunState::new();
        assert!(state.is_running());
        assert_eq!(state.stop_reason(), None);
    }

    #[test]
    fn test_stop_lowers_flag_once() {
        let state = RunState::new();

        assert!(state.stop(StopReason::Operator));
        assert!(!state.is_running());

        // Second request does not overwrite the first reason
        assert!(!state.stop(StopReason::Completed));
        assert_eq!(state.stop_reason(), Some(StopReason::Operator));
    }

    #[test]
    fn test_clones_share_flag() {
        let state = RunState::new();
        let other = state.clone();

        other.stop(StopReason::Aborted);

        assert!(!state.is_running());
        assert_eq!(state.stop_reason(), Some(StopReason::Aborted));
    }

    #[test]
    fn test_concurrent_readers_and_single_writer() {
        let state = RunState::new();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let s = state.clone();
                thread::spawn(move || {
                    // Once observed false, it must stay false
                    let mut seen_stopped = false;
                    for _ in 0..1000 {
                        let running = s.is_running();
                        if seen_stopped {
                            assert!(!running);
                        }
                        seen_stopped |= !running;
                    }
                })
            })
            .collect();

        let writer = {
            let s = state.clone();
            thread::spawn(move || s.stop(StopReason::InputClosed))
        };

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(writer.join().unwrap());
        assert!(!state.is_running());
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::Completed.to_string(), "sweep completed");
        assert_eq!(StopReason::Operator.to_string(), "stopped by operator");
    }
}
