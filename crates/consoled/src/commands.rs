//! Built-in console commands
//!
//! A small registry in the spirit of a serial console's command table:
//! each command gets its arguments split like a shell would and prints
//! through the console it is handed.

use netconsole_core::{CommandError, CommandProcessor, OutputRedirector};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

type CommandFn =
    Box<dyn Fn(&[String], &Arc<OutputRedirector>) -> Result<i32, CommandError> + Send + Sync>;

struct Command {
    help: &'static str,
    hint: Option<&'static str>,
    func: CommandFn,
}

/// Name → command table
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandRegistry {
    /// Empty registry; `help` is always available
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Registry with the stock commands
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let started = Instant::now();

        registry.register("version", "Print the daemon version", None, |_, console| {
            let _ = writeln!(console.writer(), "consoled {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        });

        registry.register("uptime", "Print time since startup", None, move |_, console| {
            let secs = started.elapsed().as_secs();
            let _ = writeln!(
                console.writer(),
                "Uptime: {}h {}m {}s",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            );
            Ok(0)
        });

        registry.register("echo", "Print the arguments", Some("[text...]"), |args, console| {
            let _ = writeln!(console.writer(), "{}", args.join(" "));
            Ok(0)
        });

        registry.register(
            "mirror",
            "Show or set mirroring of console output to the local device",
            Some("[on|off]"),
            |args, console| {
                let mut out = console.writer();
                match args.first().map(String::as_str) {
                    None => {}
                    Some("on") => console.set_mirror(true),
                    Some("off") => console.set_mirror(false),
                    Some(other) => {
                        let _ = writeln!(out, "mirror: expected 'on' or 'off', got '{}'", other);
                        return Ok(1);
                    }
                }
                let state = if console.mirror_enabled() { "on" } else { "off" };
                let _ = writeln!(out, "Mirror: {}", state);
                Ok(0)
            },
        );

        registry.register("stats", "Print output buffer statistics", None, |_, console| {
            let buffer = console.buffer();
            let _ = writeln!(
                console.writer(),
                "Buffer: {} bytes, {} pending, {} dropped",
                buffer.capacity(),
                buffer.pending(),
                buffer.dropped()
            );
            Ok(0)
        });

        registry
    }

    /// Add or replace a command
    pub fn register<F>(&mut self, name: &'static str, help: &'static str, hint: Option<&'static str>, func: F)
    where
        F: Fn(&[String], &Arc<OutputRedirector>) -> Result<i32, CommandError> + Send + Sync + 'static,
    {
        self.commands.insert(
            name,
            Command {
                help,
                hint,
                func: Box::new(func),
            },
        );
    }

    fn print_help(&self, console: &Arc<OutputRedirector>) {
        let mut out = console.writer();
        let _ = writeln!(out, "help\n  Print the list of registered commands\n");
        for (name, cmd) in &self.commands {
            match cmd.hint {
                Some(hint) => {
                    let _ = writeln!(out, "{} {}", name, hint);
                }
                None => {
                    let _ = writeln!(out, "{}", name);
                }
            }
            let _ = writeln!(out, "  {}\n", cmd.help);
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProcessor for CommandRegistry {
    fn run(&self, line: &str, console: &Arc<OutputRedirector>) -> Result<i32, CommandError> {
        let argv = split_args(line)?;
        let Some((name, args)) = argv.split_first() else {
            return Err(CommandError::InvalidArgument);
        };

        if name == "help" {
            self.print_help(console);
            return Ok(0);
        }

        let cmd = self.commands.get(name.as_str()).ok_or(CommandError::NotFound)?;
        (cmd.func)(args, console)
    }
}

/// Split a command line into arguments
///
/// Whitespace separates arguments; double quotes group, backslash escapes
/// the next character.
fn split_args(line: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(CommandError::InvalidArgument)?;
                current.push(escaped);
                in_arg = true;
            }
            '"' => {
                quoted = !quoted;
                in_arg = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if quoted {
        return Err(CommandError::InvalidArgument);
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
