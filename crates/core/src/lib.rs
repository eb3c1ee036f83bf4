//! Netconsole Core - telnet bridge for a process's console
//!
//! This crate provides:
//! - Bounded drop-oldest byte buffer between console writers and the network
//! - Output redirection (stdout/stderr capture, putc hook, local mirror)
//! - Telnet negotiation and framing
//! - Line decoding and command dispatch
//! - Connection handler and single-session listener loop
//! - Bridge lifecycle (initialize, start, mirror toggle)

// Defaults for the configuration surface
pub const DEFAULT_PORT: u16 = 23;
pub const BUFFER_SIZE: usize = 4096;
pub const TX_CHUNK_SIZE: usize = 256;
pub const RX_BUF_SIZE: usize = 512;
pub const TASK_NAME: &str = "telnet";
pub const TASK_STACK_SIZE: usize = 256 * 1024;
pub const POLL_TIMEOUT_MS: u64 = 200;
pub const DRAIN_WAIT_MS: u64 = 50;
pub const BIND_RETRY_MS: u64 = 1000;
pub const MAX_LINE_LENGTH: usize = 256;
pub const PUTC_BUFFER_SIZE: usize = 128;
pub const PROMPT: &str = ">";

pub mod bridge;
pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod line;
pub mod listener;
pub mod redirect;
pub mod session;
pub mod telnet;

// Re-export common types
pub use bridge::Bridge;
pub use buffer::BoundedByteBuffer;
pub use command::{CommandDispatcher, CommandError, CommandProcessor, LineHandler};
pub use config::{BridgeConfig, TaskConfig};
pub use error::{BridgeError, Result};
pub use line::{LineDecoder, LineError};
pub use listener::Listener;
pub use redirect::{install_putc_hook, putc, ConsoleWriter, OutputRedirector, RedirectTarget};
pub use session::{serve_connection, SessionContext, SessionEnd};
pub use telnet::{NegotiationPreferences, TelnetContext, TelnetEvent};
