//! Instrument bus abstraction.
//!
//! The bus is the external transport that resolves instrument names to
//! handles and moves raw command/response bytes. Everything above it
//! ([`InstrumentSession`](crate::services::InstrumentSession)) talks to a
//! [`InstrumentLink`] and never to a concrete transport.
//!
//! # Implementations
//!
//! - [`DeviceBus`]: character devices such as USBTMC nodes (`/dev/usbtmc0`),
//!   one device path per instrument name.
//! - [`SimulatedBus`]: an in-process bench model with an event journal and
//!   failure injection, used by `--simulate` and the test suite.

pub mod device;
pub mod sim;

pub use device::DeviceBus;
pub use sim::{BusEvent, SimulatedBus};

use std::io;
use thiserror::Error;

/// Errors reported by the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Instrument {0} not found on bus")]
    NotFound(String),

    #[error("Instrument {0} has no entry in instruments.devices (add one, or run with --simulate)")]
    Unconfigured(String),

    #[error("Instrument disconnected")]
    Disconnected,

    #[error("Timed out waiting for instrument")]
    Timeout,

    #[error("Bus I/O error: {0}")]
    Io(String),
}

impl BusError {
    /// Whether the link is gone for good.
    ///
    /// Only a disconnect is terminal for a sweep; timeouts and other faults
    /// degrade to sentinel readings.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BusError::Disconnected)
    }
}

/// `ENODEV`, returned by USB character devices after unplug
#[cfg(target_os = "linux")]
const ENODEV: i32 = 19;

impl From<io::Error> for BusError {
    fn from(err: io::Error) -> Self {
        #[cfg(target_os = "linux")]
        if err.raw_os_error() == Some(ENODEV) {
            return BusError::Disconnected;
        }

        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => BusError::Disconnected,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => BusError::Timeout,
            _ => BusError::Io(err.to_string()),
        }
    }
}

/// An open handle to one named instrument.
///
/// Calls are synchronous: a write returns once the transport accepted the
/// bytes, a read blocks until a response or a transport timeout.
#[cfg_attr(test, mockall::automock)]
pub trait InstrumentLink: Send {
    /// Write raw command bytes, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, BusError>;

    /// Read one response into `buf`, returning the transport's byte count
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError>;

    /// Device clear (abort pending I/O on the instrument)
    fn clear(&mut self) -> Result<(), BusError>;

    /// Return the instrument to front-panel control
    fn go_to_local(&mut self) -> Result<(), BusError>;

    /// Release the handle. The link must not be used afterwards.
    fn release(&mut self) -> Result<(), BusError>;
}

/// Named-instrument lookup
pub trait InstrumentBus: Send + Sync {
    /// Open a link to the instrument registered under `name`
    fn open(&self, name: &str) -> Result<Box<dyn InstrumentLink>, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(BusError::from(broken), BusError::Disconnected);

        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(BusError::from(timeout), BusError::Timeout);

        let other = io::Error::new(io::ErrorKind::InvalidInput, "bad");
        assert!(matches!(BusError::from(other), BusError::Io(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_enodev_is_disconnect() {
        let err = io::Error::from_raw_os_error(ENODEV);
        assert!(BusError::from(err).is_disconnect());
    }
}
