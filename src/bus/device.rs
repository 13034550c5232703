use super::{BusError, InstrumentBus, InstrumentLink};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

/// Bus backed by one character device per instrument.
///
/// Instrument names are resolved through a name -> device path table taken
/// from configuration, e.g. `"AKIP-1142/3G": /dev/usbtmc1`. Each open gets
/// its own file handle; USBTMC nodes deliver one response message per read.
#[derive(Debug, Clone, Default)]
pub struct DeviceBus {
    devices: IndexMap<String, Utf8PathBuf>,
}

impl DeviceBus {
    pub fn new(devices: IndexMap<String, Utf8PathBuf>) -> Self {
        Self { devices }
    }

    /// Device path registered for `name`
    pub fn device_path(&self, name: &str) -> Option<&Utf8Path> {
        self.devices.get(name).map(|p| p.as_path())
    }
}

impl InstrumentBus for DeviceBus {
    fn open(&self, name: &str) -> Result<Box<dyn InstrumentLink>, BusError> {
        let path = self
            .device_path(name)
            .ok_or_else(|| BusError::Unconfigured(name.to_string()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BusError::NotFound(format!("{} ({})", name, path))
                } else {
                    BusError::from(e)
                }
            })?;

        tracing::debug!("Opened {} at {}", name, path);

        Ok(Box::new(DeviceLink {
            name: name.to_string(),
            file: Some(file),
        }))
    }
}

struct DeviceLink {
    name: String,
    file: Option<File>,
}

impl DeviceLink {
    fn file(&mut self) -> Result<&mut File, BusError> {
        self.file.as_mut().ok_or(BusError::Disconnected)
    }
}

impl InstrumentLink for DeviceLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, BusError> {
        let file = self.file()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        Ok(self.file()?.read(buf)?)
    }

    fn clear(&mut self) -> Result<(), BusError> {
        // Character devices expose clear only through ioctl, which this
        // transport does not issue.
        tracing::debug!("Device clear not available for {}", self.name);
        Ok(())
    }

    fn go_to_local(&mut self) -> Result<(), BusError> {
        tracing::debug!("Local control not available for {}", self.name);
        Ok(())
    }

    fn release(&mut self) -> Result<(), BusError> {
        self.file.take();
        Ok(())
    }
}
