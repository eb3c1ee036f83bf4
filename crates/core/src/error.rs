//! Error types for netconsole-core

use thiserror::Error;

/// Bridge error type
///
/// Only initialization and lifecycle failures surface through this type.
/// Session-level I/O errors are handled inside the connection handler and
/// listener and never reach writers or the command processor.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to allocate {capacity} byte output buffer")]
    BufferAllocation { capacity: usize },

    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Invalid negotiation preferences: {0}")]
    Negotiation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Stdio capture failed: {0}")]
    StdioCapture(String),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;
