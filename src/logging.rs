use crate::models::LoggingSettings;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use tracing::{Event, Level, Subscriber};
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Console prefix for a log level, e.g. `# E: ` for errors.
///
/// The `#` keeps console output usable as a gnuplot/data comment.
pub fn level_prefix(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "# E: ",
        Level::WARN => "# W: ",
        Level::INFO => "# I: ",
        Level::DEBUG => "# D: ",
        Level::TRACE => "# T: ",
    }
}

/// Console formatter: level prefix, then the message and fields. No
/// timestamps, targets or colors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFormat;

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{}", level_prefix(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Setup logging with a rotating file appender and, optionally, console
/// output on stderr.
///
/// File logs go to `<dir>/<prefix>.<date>` with daily rotation. `debug`
/// overrides `settings.debug` when set.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    settings: &LoggingSettings,
    debug: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    if !settings.dir.exists() {
        fs::create_dir_all(&settings.dir)
            .with_context(|| format!("Failed to create log directory: {}", settings.dir))?;
    }

    let file_appender = rolling::daily(&settings.dir, &settings.prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let debug_mode = debug || settings.debug;
    let env_filter = if debug_mode {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = settings.console.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(ConsoleFormat)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        settings.dir,
        settings.prefix,
        debug_mode,
        settings.console
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_level_prefixes() {
        assert_eq!(level_prefix(&Level::ERROR), "# E: ");
        assert_eq!(level_prefix(&Level::WARN), "# W: ");
        assert_eq!(level_prefix(&Level::INFO), "# I: ");
        assert_eq!(level_prefix(&Level::DEBUG), "# D: ");
    }

    #[test]
    fn test_console_format() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .event_format(ConsoleFormat)
                .with_writer(move || writer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Unknown command ({})", "volts");
            tracing::warn!("second");
        });

        assert_eq!(captured.text(), "# E: Unknown command (volts)\n# W: second\n");
    }

    #[test]
    fn test_log_directory_created() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let settings = LoggingSettings {
            dir: camino::Utf8PathBuf::try_from(temp_dir.path().join("logs")).unwrap(),
            console: false,
            ..LoggingSettings::default()
        };

        // A global subscriber may already be installed by another test;
        // the directory is created either way
        let _ = setup_logging(&settings, false);
        assert!(settings.dir.exists());
    }
}
