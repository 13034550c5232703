use crate::models::{LOG_HEADER, SweepStep};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::OpenOptions;
use std::io::{self, Write};

/// Append-only, line-flushed writer for `vac.dat`.
///
/// The header is written on creation, then one line per [`SweepStep`].
/// Every line is flushed immediately so the plot process reads complete
/// data while the sweep is running.
pub struct DataLog {
    path: Utf8PathBuf,
    writer: Box<dyn Write + Send>,
    lines_written: usize,
}

impl std::fmt::Debug for DataLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLog")
            .field("path", &self.path)
            .field("lines_written", &self.lines_written)
            .finish_non_exhaustive()
    }
}

impl DataLog {
    /// Create a new log file (it must not exist yet) and write the header
    pub fn create(path: &Utf8Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Self::from_writer(path, Box::new(file))
    }

    /// Use an arbitrary writer. `path` is what the plot process is told to
    /// read.
    pub fn from_writer(path: &Utf8Path, writer: Box<dyn Write + Send>) -> io::Result<Self> {
        let mut log = Self {
            path: path.to_path_buf(),
            writer,
            lines_written: 0,
        };
        for line in LOG_HEADER {
            log.write_line(line)?;
        }

        tracing::debug!("Data log opened: {}", log.path);
        Ok(log)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.lines_written += 1;
        Ok(())
    }

    /// Append one step
    pub fn append(&mut self, step: &SweepStep) -> io::Result<()> {
        self.write_line(&step.to_log_line())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Header lines included
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    /// Flush and close the file
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        tracing::info!("Closed data log {} ({} lines)", self.path, self.lines_written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogRecord;
    use std::fs;
    use tempfile::TempDir;

    fn step(index: u32) -> SweepStep {
        SweepStep {
            index,
            elapsed_seconds: index as f64,
            commanded_voltage: 0.1 * index as f64,
            supply_voltage: 0.1 * index as f64,
            supply_current: 0.001 * index as f64,
            meter_current: 0.001 * index as f64,
        }
    }

    fn temp_log_path(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().join("vac.dat")).unwrap()
    }

    #[test]
    fn test_header_then_steps() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_log_path(&temp_dir);

        let mut log = DataLog::create(&path).unwrap();
        log.append(&step(0)).unwrap();
        log.append(&step(1)).unwrap();
        assert_eq!(log.lines_written(), 7);
        log.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(&lines[..5], &LOG_HEADER);
        assert_eq!(LogRecord::parse(lines[6]).unwrap().index, 1);
    }

    #[test]
    fn test_lines_are_visible_before_close() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_log_path(&temp_dir);

        let mut log = DataLog::create(&path).unwrap();
        log.append(&step(0)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 6);
        drop(log);
    }

    #[test]
    fn test_refuses_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_log_path(&temp_dir);
        fs::write(&path, "old data\n").unwrap();

        let err = DataLog::create(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
