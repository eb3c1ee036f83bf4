//! Bridge configuration
//!
//! Every field defaults to the matching crate-level constant, so an embedding
//! process only overrides what it cares about. The struct deserializes from
//! JSON/TOML-style maps with missing keys filled from the defaults.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Execution context settings for the dedicated bridge task
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Thread name
    pub name: String,

    /// Thread stack size in bytes
    pub stack_size: usize,

    /// Scheduling priority as a nice value (Linux only, None = inherit)
    pub priority: Option<i32>,

    /// CPU the task is pinned to (Linux only, None = unpinned)
    pub core: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: crate::TASK_NAME.to_string(),
            stack_size: crate::TASK_STACK_SIZE,
            priority: None,
            core: None,
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listening address
    pub bind_addr: IpAddr,

    /// Listening port
    pub port: u16,

    /// Output buffer capacity in bytes
    pub buffer_capacity: usize,

    /// Maximum bytes drained from the buffer per send
    pub tx_chunk_size: usize,

    /// Per-session receive scratch size
    pub rx_buffer_size: usize,

    /// Readiness wait before the pending-output check is re-evaluated
    pub poll_timeout_ms: u64,

    /// How long a drain waits for bytes once the socket is writable
    pub drain_wait_ms: u64,

    /// Backoff between bind attempts
    pub bind_retry_ms: u64,

    /// Longest accepted input line, terminator excluded
    pub max_line_length: usize,

    /// Prompt printed after every processed line
    pub prompt: String,

    /// Initial state of the local mirror
    pub mirror: bool,

    /// Local output device opened for mirroring
    pub mirror_device: Option<PathBuf>,

    /// Rebind the process stdout/stderr into the bridge
    pub capture_stdio: bool,

    /// Dedicated task settings
    pub task: TaskConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_PORT,
            buffer_capacity: crate::BUFFER_SIZE,
            tx_chunk_size: crate::TX_CHUNK_SIZE,
            rx_buffer_size: crate::RX_BUF_SIZE,
            poll_timeout_ms: crate::POLL_TIMEOUT_MS,
            drain_wait_ms: crate::DRAIN_WAIT_MS,
            bind_retry_ms: crate::BIND_RETRY_MS,
            max_line_length: crate::MAX_LINE_LENGTH,
            prompt: crate::PROMPT.to_string(),
            mirror: true,
            mirror_device: None,
            capture_stdio: false,
            task: TaskConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create with a custom listening port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set listening address
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set output buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set initial mirror state
    pub fn with_mirror(mut self, enabled: bool) -> Self {
        self.mirror = enabled;
        self
    }

    /// Set mirror device path
    pub fn with_mirror_device(mut self, path: PathBuf) -> Self {
        self.mirror_device = Some(path);
        self
    }

    /// Enable or disable stdout/stderr capture
    pub fn with_capture_stdio(mut self, enabled: bool) -> Self {
        self.capture_stdio = enabled;
        self
    }

    /// Set bind retry backoff
    pub fn with_bind_retry(mut self, backoff: Duration) -> Self {
        self.bind_retry_ms = backoff.as_millis() as u64;
        self
    }

    /// Full socket address the listener binds
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }

    pub fn bind_retry(&self) -> Duration {
        Duration::from_millis(self.bind_retry_ms)
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(BridgeError::InvalidCapacity(0));
        }
        if self.tx_chunk_size == 0 {
            return Err(BridgeError::Config("tx_chunk_size must be non-zero".into()));
        }
        if self.rx_buffer_size == 0 {
            return Err(BridgeError::Config("rx_buffer_size must be non-zero".into()));
        }
        if self.max_line_length == 0 {
            return Err(BridgeError::Config("max_line_length must be non-zero".into()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(BridgeError::Config("poll_timeout_ms must be non-zero".into()));
        }
        if let Some(core) = self.task.core {
            validate_core(core)?;
        }
        Ok(())
    }
}

/// Affinity indexes a fixed-size CPU set
#[cfg(target_os = "linux")]
fn validate_core(core: usize) -> Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(BridgeError::Config(format!(
            "task core {} out of range (max {})",
            core,
            libc::CPU_SETSIZE - 1
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn validate_core(_core: usize) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 23);
        assert_eq!(config.buffer_capacity, crate::BUFFER_SIZE);
        assert_eq!(config.rx_buffer_size, 512);
        assert_eq!(config.max_line_length, 256);
        assert_eq!(config.poll_timeout(), Duration::from_millis(200));
        assert_eq!(config.drain_wait(), Duration::from_millis(50));
        assert_eq!(config.bind_retry(), Duration::from_secs(1));
        assert!(config.mirror);
        assert!(config.validate().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_out_of_range_core_rejected() {
        let mut config = BridgeConfig::default();
        config.task.core = Some(libc::CPU_SETSIZE as usize);
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        config.task.core = Some(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"port": 2323, "task": {"core": 1}}"#).unwrap();
        assert_eq!(config.port, 2323);
        assert_eq!(config.task.core, Some(1));
        assert_eq!(config.task.stack_size, crate::TASK_STACK_SIZE);
        assert_eq!(config.prompt, ">");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BridgeConfig::default().with_buffer_capacity(0);
        assert!(matches!(config.validate(), Err(BridgeError::InvalidCapacity(0))));
    }

    #[test]
    fn test_listen_addr() {
        let config = BridgeConfig::with_port(2323)
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:2323");
    }
}
