use camino::Utf8Path;
use std::fs::File;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// How long the plot process gets to exit after its input is closed
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Live-plot channel: a gnuplot-compatible process fed commands on stdin.
///
/// The sink only speaks the text protocol. Plotting happens in the child
/// process, which re-reads the data log on every refresh.
pub struct PlotSink {
    input: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    child: Option<Child>,
}

impl std::fmt::Debug for PlotSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotSink")
            .field("open", &self.input.is_some())
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

impl PlotSink {
    /// Start `program` with piped stdin; its stdout and stderr go to
    /// `output_log`.
    pub fn spawn(program: &str, args: &[String], output_log: &Utf8Path) -> io::Result<Self> {
        let stdout = File::create(output_log)?;
        let stderr = stdout.try_clone()?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("plot process stdin not captured"))?;

        tracing::info!(
            "Started plot process {} (pid {:?}), output in {}",
            program,
            child.id(),
            output_log
        );

        Ok(Self {
            input: Some(Box::new(stdin)),
            child: Some(child),
        })
    }

    /// Feed commands into an arbitrary writer instead of a process
    pub fn from_writer(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            input: Some(writer),
            child: None,
        }
    }

    /// A sink that accepts and drops everything, for runs without plotting
    pub fn discard() -> Self {
        Self::from_writer(Box::new(tokio::io::sink()))
    }

    async fn write_commands(&mut self, commands: &str) -> io::Result<()> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "plot input closed"))?;
        input.write_all(commands.as_bytes()).await?;
        input.flush().await
    }

    /// Axis setup, sent once before the first step
    pub async fn setup(&mut self, voltage_min: f64, voltage_max: f64) -> io::Result<()> {
        let commands = format!(
            "set xrange [{}:{}]\nset xlabel \"Voltage, V\"\nset ylabel \"Current, A\"\n",
            voltage_min, voltage_max
        );
        self.write_commands(&commands).await
    }

    /// Redraw from the data log after step `index`
    pub async fn refresh(&mut self, index: u32, elapsed: f64, data_log: &Utf8Path) -> io::Result<()> {
        let commands = format!(
            "set title \"i = {}, t = {:.6} s\"\nplot \"{}\" u 3:5 w l lw 1 notitle\n",
            index, elapsed, data_log
        );
        self.write_commands(&commands).await
    }

    /// Close stdin and wait for the process to exit, killing it if it
    /// lingers.
    pub async fn close(mut self) -> io::Result<()> {
        if let Some(mut input) = self.input.take() {
            // EOF tells gnuplot to exit; a dead process is fine here
            if let Err(e) = input.shutdown().await {
                tracing::debug!("Plot input shutdown: {}", e);
            }
        }

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!("Plot process exited: {}", status);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Plot process did not exit after {:?}, killing", EXIT_TIMEOUT);
                child.kill().await
            }
        }
    }
}
