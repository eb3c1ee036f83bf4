//! Hand-off from decoded input lines to the command processor
//!
//! The session delivers each complete line to a [`LineHandler`]. The stock
//! handler, [`CommandDispatcher`], runs a [`CommandProcessor`] and prints a
//! one-line diagnostic per outcome followed by the prompt, like a serial
//! console would.

use std::io::Write;
use std::sync::Arc;
use thiserror::Error;

use crate::redirect::OutputRedirector;

/// Failure reported by a command processor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command not found")]
    NotFound,

    /// Empty or unparsable command line
    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Internal error: {message} (0x{code:x})")]
    Internal { code: u32, message: String },
}

impl CommandError {
    /// Stable numeric code for diagnostics
    pub fn code(&self) -> u32 {
        match self {
            CommandError::NotFound => 0x105,
            CommandError::InvalidArgument => 0x102,
            CommandError::Internal { code, .. } => *code,
        }
    }
}

/// External line-command processor
///
/// Returns the command's own status code on success. Commands print through
/// `console`.
pub trait CommandProcessor: Send + Sync {
    fn run(&self, line: &str, console: &Arc<OutputRedirector>) -> Result<i32, CommandError>;
}

/// Callback receiving decoded input lines
pub trait LineHandler: Send + Sync {
    fn handle_line(&self, line: &str, console: &Arc<OutputRedirector>);

    /// An input line exceeded the length cap and was dropped
    fn handle_overflow(&self, length: usize, max: usize, console: &Arc<OutputRedirector>) {
        let _ = (length, max, console);
    }
}

impl<F> LineHandler for F
where
    F: Fn(&str, &Arc<OutputRedirector>) + Send + Sync,
{
    fn handle_line(&self, line: &str, console: &Arc<OutputRedirector>) {
        self(line, console)
    }
}

/// Runs each line through a processor and reports the outcome
pub struct CommandDispatcher<P> {
    processor: P,
    prompt: String,
}

impl<P: CommandProcessor> CommandDispatcher<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            prompt: crate::PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Print the prompt on its own
    pub fn print_prompt(&self, console: &Arc<OutputRedirector>) {
        let _ = write!(console.writer(), "{}", self.prompt);
    }
}

impl<P: CommandProcessor> LineHandler for CommandDispatcher<P> {
    fn handle_line(&self, line: &str, console: &Arc<OutputRedirector>) {
        let mut out = console.writer();

        match self.processor.run(line, console) {
            Ok(0) => {}
            Ok(status) => {
                let _ = writeln!(out, "Command returned non-zero error code: 0x{:x}", status);
            }
            Err(CommandError::NotFound) => {
                let _ = writeln!(out, "Unrecognized command");
            }
            // Empty line, nothing to say
            Err(CommandError::InvalidArgument) => {}
            Err(err @ CommandError::Internal { .. }) => {
                tracing::debug!("Command '{}' failed: {}", line, err);
                let _ = writeln!(out, "{}", err);
            }
        }

        let _ = write!(out, "{}", self.prompt);
    }

    fn handle_overflow(&self, length: usize, max: usize, console: &Arc<OutputRedirector>) {
        let mut out = console.writer();
        let _ = writeln!(out, "Error: command too long ({} bytes, max {})", length, max);
        let _ = write!(out, "{}", self.prompt);
    }
}
