// Simulated bench
//
// A two-instrument model: a dual-channel supply whose channel 2 drives a
// resistive load, and a DC ammeter in series with that load. Every bus
// interaction is appended to a journal so callers can check ordering.

use super::{BusError, InstrumentBus, InstrumentLink};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// One observable interaction with the simulated bus
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    Opened(String),
    OpenRefused(String),
    Write { instrument: String, command: String },
    Read { instrument: String, reply: String },
    Cleared(String),
    Local(String),
    Released(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Supply,
    Meter,
}

#[derive(Clone, Copy, Debug)]
struct Channel {
    voltage: f64,
    current_limit: f64,
    enabled: bool,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            current_limit: 0.1,
            enabled: false,
        }
    }
}

#[derive(Debug)]
struct Bench {
    supply_name: String,
    meter_name: String,
    load_ohms: f64,
    meter_offset: f64,

    channels: [Channel; 2],
    selected: usize,
    output_on: bool,

    journal: Vec<BusEvent>,
    pending_supply: Option<String>,
    pending_meter: Option<String>,

    refuse: HashSet<String>,
    reads: usize,
    disconnect_after_reads: Option<usize>,
    failing_writes: Option<String>,
}

impl Bench {
    fn channel_output(&self, index: usize) -> (f64, f64) {
        let channel = &self.channels[index];
        if !self.output_on || !channel.enabled {
            return (0.0, 0.0);
        }

        // Constant-voltage until the load would exceed the limit, then
        // constant-current.
        let cv_current = channel.voltage / self.load_ohms;
        if cv_current <= channel.current_limit {
            (channel.voltage, cv_current)
        } else {
            (channel.current_limit * self.load_ohms, channel.current_limit)
        }
    }

    fn disconnected(&self) -> bool {
        self.disconnect_after_reads
            .is_some_and(|limit| self.reads >= limit)
    }

    fn apply_supply(&mut self, command: &str) {
        let (head, arg) = split_command(command);
        let value = arg.and_then(parse_number);
        let selected = self.selected;

        match head {
            "output" => self.output_on = value.is_some_and(|v| v != 0.0),
            "instrument:nselect" => {
                if let Some(n) = value {
                    self.selected = if n >= 2.0 { 1 } else { 0 };
                }
            }
            "voltage" => {
                if let Some(v) = value {
                    self.channels[selected].voltage = v;
                }
            }
            "current" => {
                if let Some(i) = value {
                    self.channels[selected].current_limit = i;
                }
            }
            "channel:output" => {
                self.channels[selected].enabled = value.is_some_and(|v| v != 0.0);
            }
            "*rst" => {
                self.channels = [Channel::default(); 2];
                self.selected = 0;
                self.output_on = false;
            }
            "measure:voltage?" => {
                let (v, _) = self.channel_output(selected);
                self.pending_supply = Some(format!("{:.3}", v));
            }
            "measure:current?" => {
                let (_, i) = self.channel_output(selected);
                self.pending_supply = Some(format!("{:.4}", i));
            }
            "system:error?" => self.pending_supply = Some("0,\"No error\"".to_string()),
            _ => {}
        }
    }

    fn apply_meter(&mut self, command: &str) {
        match split_command(command).0 {
            "read?" => {
                let (_, i) = self.channel_output(1);
                self.pending_meter = Some(format!("{:+.8E}", i + self.meter_offset));
            }
            "system:error?" => self.pending_meter = Some("+0,\"No error\"".to_string()),
            _ => {}
        }
    }
}

fn split_command(command: &str) -> (&str, Option<&str>) {
    let command = command.trim();
    match command.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, Some(arg.trim())),
        None => (command, None),
    }
}

fn parse_number(arg: &str) -> Option<f64> {
    arg.trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

/// In-process bench model implementing [`InstrumentBus`].
///
/// Cloning shares the same bench, so a test can keep one handle for
/// inspection while the sweep owns another.
#[derive(Clone, Debug)]
pub struct SimulatedBus {
    bench: Arc<Mutex<Bench>>,
}

impl SimulatedBus {
    /// Create a bench with the given instrument names and a 100 ohm load
    pub fn new(supply_name: &str, meter_name: &str) -> Self {
        Self {
            bench: Arc::new(Mutex::new(Bench {
                supply_name: supply_name.to_string(),
                meter_name: meter_name.to_string(),
                load_ohms: 100.0,
                meter_offset: 0.0,
                channels: [Channel::default(); 2],
                selected: 0,
                output_on: false,
                journal: Vec::new(),
                pending_supply: None,
                pending_meter: None,
                refuse: HashSet::new(),
                reads: 0,
                disconnect_after_reads: None,
                failing_writes: None,
            })),
        }
    }

    fn bench(&self) -> MutexGuard<'_, Bench> {
        self.bench.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Use a different load resistance
    pub fn with_load(self, ohms: f64) -> Self {
        self.bench().load_ohms = ohms;
        self
    }

    /// Refuse to open `name`, as if the instrument were absent
    pub fn refuse_open(self, name: &str) -> Self {
        self.bench().refuse.insert(name.to_string());
        self
    }

    /// Drop every link after `reads` successful reads in total
    pub fn disconnect_after_reads(self, reads: usize) -> Self {
        self.bench().disconnect_after_reads = Some(reads);
        self
    }

    /// Fail every write whose command contains `pattern`
    pub fn fail_writes_containing(self, pattern: &str) -> Self {
        self.bench().failing_writes = Some(pattern.to_string());
        self
    }

    /// Snapshot of all interactions so far
    pub fn journal(&self) -> Vec<BusEvent> {
        self.bench().journal.clone()
    }

    /// Commands written to `instrument`, in order
    pub fn writes_to(&self, instrument: &str) -> Vec<String> {
        self.bench()
            .journal
            .iter()
            .filter_map(|event| match event {
                BusEvent::Write {
                    instrument: name,
                    command,
                } if name == instrument => Some(command.clone()),
                _ => None,
            })
            .collect()
    }
}

impl InstrumentBus for SimulatedBus {
    fn open(&self, name: &str) -> Result<Box<dyn InstrumentLink>, BusError> {
        let mut bench = self.bench();

        let role = if name == bench.supply_name {
            Role::Supply
        } else if name == bench.meter_name {
            Role::Meter
        } else {
            bench.journal.push(BusEvent::OpenRefused(name.to_string()));
            return Err(BusError::NotFound(name.to_string()));
        };

        if bench.refuse.contains(name) {
            bench.journal.push(BusEvent::OpenRefused(name.to_string()));
            return Err(BusError::NotFound(name.to_string()));
        }

        bench.journal.push(BusEvent::Opened(name.to_string()));
        Ok(Box::new(SimLink {
            name: name.to_string(),
            role,
            bench: Arc::clone(&self.bench),
            released: false,
        }))
    }
}

struct SimLink {
    name: String,
    role: Role,
    bench: Arc<Mutex<Bench>>,
    released: bool,
}

impl SimLink {
    fn bench(&self) -> Result<MutexGuard<'_, Bench>, BusError> {
        if self.released {
            return Err(BusError::Disconnected);
        }
        let bench = self.bench.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if bench.disconnected() {
            return Err(BusError::Disconnected);
        }
        Ok(bench)
    }
}

impl InstrumentLink for SimLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, BusError> {
        let role = self.role;
        let name = self.name.clone();
        let mut bench = self.bench()?;

        let command = String::from_utf8_lossy(data).trim().to_string();
        bench.journal.push(BusEvent::Write {
            instrument: name,
            command: command.clone(),
        });

        if let Some(pattern) = &bench.failing_writes {
            if command.contains(pattern.as_str()) {
                return Err(BusError::Io(format!("write rejected: {}", command)));
            }
        }

        let lowered = command.to_ascii_lowercase();
        match role {
            Role::Supply => bench.apply_supply(&lowered),
            Role::Meter => bench.apply_meter(&lowered),
        }

        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        let role = self.role;
        let name = self.name.clone();
        let mut bench = self.bench()?;

        let pending = match role {
            Role::Supply => bench.pending_supply.take(),
            Role::Meter => bench.pending_meter.take(),
        };
        let reply = pending.ok_or(BusError::Timeout)?;
        bench.reads += 1;

        let bytes = format!("{}\n", reply).into_bytes();
        let count = bytes.len().min(buf.len());
        buf[..count].copy_from_slice(&bytes[..count]);

        bench.journal.push(BusEvent::Read {
            instrument: name,
            reply,
        });
        Ok(count)
    }

    fn clear(&mut self) -> Result<(), BusError> {
        let name = self.name.clone();
        let mut bench = self.bench()?;
        match self.role {
            Role::Supply => bench.pending_supply = None,
            Role::Meter => bench.pending_meter = None,
        }
        bench.journal.push(BusEvent::Cleared(name));
        Ok(())
    }

    fn go_to_local(&mut self) -> Result<(), BusError> {
        let name = self.name.clone();
        self.bench()?.journal.push(BusEvent::Local(name));
        Ok(())
    }

    fn release(&mut self) -> Result<(), BusError> {
        if self.released {
            return Ok(());
        }
        // Release is journaled even after a disconnect
        self.bench
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .journal
            .push(BusEvent::Released(self.name.clone()));
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(link: &mut Box<dyn InstrumentLink>, command: &str) -> String {
        link.write(command.as_bytes()).unwrap();
        let mut buf = [0u8; 100];
        let count = link.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..count]).trim().to_string()
    }

    #[test]
    fn test_unknown_instrument_refused() {
        let bus = SimulatedBus::new("pps", "vm");
        assert!(matches!(bus.open("scope"), Err(BusError::NotFound(_))));
        assert_eq!(bus.journal(), vec![BusEvent::OpenRefused("scope".to_string())]);
    }

    #[test]
    fn test_supply_drives_load_on_channel_two() {
        let bus = SimulatedBus::new("pps", "vm");
        let mut pps = bus.open("pps").unwrap();
        let mut vm = bus.open("vm").unwrap();

        for cmd in ["instrument:nselect 2", "current 0.1", "channel:output 1", "output 1", "voltage 2.0"] {
            pps.write(cmd.as_bytes()).unwrap();
        }

        assert_eq!(query(&mut pps, "measure:voltage?"), "2.000");
        assert_eq!(query(&mut pps, "measure:current?"), "0.0200");
        let meter: f64 = query(&mut vm, "read?").parse().unwrap();
        assert!((meter - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_current_limit_clamps_voltage() {
        let bus = SimulatedBus::new("pps", "vm").with_load(10.0);
        let mut pps = bus.open("pps").unwrap();

        for cmd in ["instrument:nselect 2", "current 0.1", "channel:output 1", "output 1", "voltage 5.0"] {
            pps.write(cmd.as_bytes()).unwrap();
        }

        assert_eq!(query(&mut pps, "measure:voltage?"), "1.000");
    }

    #[test]
    fn test_read_without_query_times_out() {
        let bus = SimulatedBus::new("pps", "vm");
        let mut vm = bus.open("vm").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(vm.read(&mut buf), Err(BusError::Timeout));
    }

    #[test]
    fn test_disconnect_after_reads() {
        let bus = SimulatedBus::new("pps", "vm").disconnect_after_reads(1);
        let mut vm = bus.open("vm").unwrap();

        query(&mut vm, "read?");
        assert_eq!(vm.write(b"read?"), Err(BusError::Disconnected));
        assert!(vm.release().is_ok());
        assert!(bus.journal().contains(&BusEvent::Released("vm".to_string())));
    }

    #[test]
    fn test_failing_writes_are_journaled() {
        let bus = SimulatedBus::new("pps", "vm").fail_writes_containing("*rst");
        let mut pps = bus.open("pps").unwrap();

        assert!(matches!(pps.write(b"*rst"), Err(BusError::Io(_))));
        assert_eq!(bus.writes_to("pps"), vec!["*rst".to_string()]);
    }
}
