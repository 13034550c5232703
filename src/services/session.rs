use crate::bus::{BusError, InstrumentBus, InstrumentLink};
use crate::services::dialect;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Leading numeric prefix of an instrument reply
static READING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)").expect("Invalid reading regex")
});

/// Errors raised by an instrument session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Unable to open {name}: {source}")]
    ConnectFailed {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("{name} rejected '{command}': {source}")]
    WriteFailed {
        name: String,
        command: String,
        #[source]
        source: BusError,
    },

    #[error("Unable to read {name} after '{command}': {source}")]
    ReadFailed {
        name: String,
        command: String,
        #[source]
        source: BusError,
    },

    #[error("{name}: {action} failed: {source}")]
    ControlFailed {
        name: String,
        action: &'static str,
        #[source]
        source: BusError,
    },
}

/// Per-session transport parameters
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Maximum reply length accepted from one read
    pub read_buffer_len: usize,

    /// Wait after the reset command before handing back local control
    pub close_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_buffer_len: 100,
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Parse an instrument reply into a number.
///
/// Accepts the leading numeric prefix (`"5.000V"` reads as 5.0), returns
/// `None` when the reply does not start with a number.
pub fn parse_reading(reply: &str) -> Option<f64> {
    READING_PATTERN
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Synchronous command/response channel to one named instrument.
///
/// The session owns its link. Only the sweep task touches it, so there is
/// no locking.
pub struct InstrumentSession {
    name: String,
    link: Box<dyn InstrumentLink>,
    options: SessionOptions,
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl InstrumentSession {
    /// Look up `name` on the bus and open a session to it
    pub fn open(
        bus: &dyn InstrumentBus,
        name: &str,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let link = bus.open(name).map_err(|source| SessionError::ConnectFailed {
            name: name.to_string(),
            source,
        })?;

        tracing::info!("Connected to {}", name);
        Ok(Self::from_link(name, link, options))
    }

    /// Wrap an already open link
    pub fn from_link(name: &str, link: Box<dyn InstrumentLink>, options: SessionOptions) -> Self {
        Self {
            name: name.to_string(),
            link,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_command(&mut self, command: &str) -> Result<(), BusError> {
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(b'\n');
        self.link.write(&bytes).map(|_| ())
    }

    /// Fire-and-forget command.
    ///
    /// A failure is logged here. The outcome is still returned so setup
    /// phases can report it, but callers are free to ignore it.
    pub fn send(&mut self, command: &str) -> Result<(), SessionError> {
        tracing::trace!("{} <- {}", self.name, command);

        self.write_command(command).map_err(|source| {
            tracing::warn!("{}: command '{}' failed: {}", self.name, command, source);
            SessionError::WriteFailed {
                name: self.name.clone(),
                command: command.to_string(),
                source,
            }
        })
    }

    /// Send a query and return the raw reply text.
    ///
    /// The reply is cut at the byte count the transport reports.
    pub fn query_text(&mut self, command: &str) -> Result<String, SessionError> {
        let read_failed = |name: &str, source: BusError| SessionError::ReadFailed {
            name: name.to_string(),
            command: command.to_string(),
            source,
        };

        self.write_command(command)
            .map_err(|source| read_failed(&self.name, source))?;

        let mut buf = vec![0u8; self.options.read_buffer_len];
        let count = self
            .link
            .read(&mut buf)
            .map_err(|source| read_failed(&self.name, source))?;
        let count = count.min(buf.len());

        let reply = String::from_utf8_lossy(&buf[..count])
            .trim_end_matches(['\0', '\r', '\n'])
            .to_string();
        tracing::trace!("{} -> {}", self.name, reply);
        Ok(reply)
    }

    /// Query a numeric value.
    ///
    /// Timeouts, transport faults and unparseable replies yield NaN so one
    /// bad reading does not stop the sweep. Only a disconnected transport
    /// is returned as [`SessionError::ReadFailed`].
    pub fn query(&mut self, command: &str) -> Result<f64, SessionError> {
        match self.query_text(command) {
            Ok(reply) => Ok(parse_reading(&reply).unwrap_or_else(|| {
                tracing::warn!(
                    "{}: malformed reply to '{}': {:?}",
                    self.name,
                    command,
                    reply
                );
                f64::NAN
            })),
            Err(SessionError::ReadFailed { source, .. }) if !source.is_disconnect() => {
                tracing::warn!("{}: no reading for '{}': {}", self.name, command, source);
                Ok(f64::NAN)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort close: device clear, reset, grace wait, local control,
    /// release.
    ///
    /// Every step runs even if an earlier one failed. Failures are logged
    /// and returned for reporting; they never propagate.
    pub async fn close(mut self) -> Vec<SessionError> {
        let mut problems = Vec::new();
        let control_failed = |name: &str, action: &'static str, source: BusError| {
            SessionError::ControlFailed {
                name: name.to_string(),
                action,
                source,
            }
        };

        if let Err(source) = self.link.clear() {
            problems.push(control_failed(&self.name, "device clear", source));
        }

        if let Err(e) = self.send(dialect::RESET) {
            problems.push(e);
        }

        tokio::time::sleep(self.options.close_grace).await;

        if let Err(source) = self.link.go_to_local() {
            problems.push(control_failed(&self.name, "local control", source));
        }

        if let Err(source) = self.link.release() {
            problems.push(control_failed(&self.name, "release", source));
        }

        for problem in &problems {
            tracing::error!("{}", problem);
        }
        tracing::info!("Closed {}", self.name);

        problems
    }
}
