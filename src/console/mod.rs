//! Operator console.
//!
//! Reads command lines (normally stdin) while the sweep runs. The only
//! effect a command can have on the sweep is clearing the shared
//! [`RunState`]; the interpreter holds no other resources.

use crate::state::{RunState, StopReason};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

pub const HELP_TEXT: &str = "\
Commands:
  h, help          show this list
  q, quit, stop    stop the sweep (the current step is finished first)
";

/// Printed before every read
pub const PROMPT: &str = "> ";

/// One parsed operator line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "h" | "help" => Command::Help,
            "q" | "quit" | "stop" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Why the interpreter returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterExit {
    /// The operator asked to stop
    Quit,
    /// Input reached end of file or failed
    InputClosed,
    /// The run state was cleared by someone else
    Halted,
    /// The cancellation signal fired
    Cancelled,
}

/// Interpret operator commands until a quit command, end of input, a
/// cleared run state, or cancellation.
///
/// Each line read is raced against `cancel_rx`, so a finished sweep does
/// not have to wait for the operator to press enter.
pub async fn interpret<R, W>(
    input: R,
    mut output: W,
    run_state: RunState,
    mut cancel_rx: watch::Receiver<bool>,
) -> InterpreterExit
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        if !run_state.is_running() {
            return InterpreterExit::Halted;
        }

        if let Err(e) = print(&mut output, PROMPT).await {
            tracing::warn!("Unable to print prompt: {}", e);
        }

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = cancel_rx.changed() => {
                tracing::debug!("Command interpreter cancelled");
                return InterpreterExit::Cancelled;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("End of operator input, stopping sweep");
                run_state.stop(StopReason::InputClosed);
                return InterpreterExit::InputClosed;
            }
            Err(e) => {
                tracing::error!("Unable to read operator input: {}", e);
                run_state.stop(StopReason::InputClosed);
                return InterpreterExit::InputClosed;
            }
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Help => {
                if let Err(e) = print(&mut output, HELP_TEXT).await {
                    tracing::warn!("Unable to print help: {}", e);
                }
            }
            Command::Quit => {
                tracing::info!("Stop requested by operator");
                run_state.stop(StopReason::Operator);
                return InterpreterExit::Quit;
            }
            Command::Unknown(text) => {
                tracing::error!("Unknown command ({})", text);
            }
        }
    }
}

async fn print<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> std::io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}
