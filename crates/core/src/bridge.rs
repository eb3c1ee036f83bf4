//! Bridge lifecycle: initialize once, start the dedicated task, toggle mirror
//!
//! The listener and every session run on one dedicated OS thread driving a
//! current-thread tokio runtime. Writers elsewhere in the process never touch
//! that runtime; they only write into the shared buffer.

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::buffer::BoundedByteBuffer;
use crate::command::LineHandler;
use crate::config::{BridgeConfig, TaskConfig};
use crate::error::Result;
use crate::listener::Listener;
use crate::redirect::{self, OutputRedirector};
use crate::session::SessionContext;
use crate::telnet::NegotiationPreferences;

/// Console-to-telnet bridge
pub struct Bridge {
    ctx: SessionContext,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Initialize with the default negotiation table
    pub fn initialize(config: BridgeConfig, handler: Arc<dyn LineHandler>) -> Result<Arc<Self>> {
        Self::initialize_with(config, handler, NegotiationPreferences::default())
    }

    /// Allocate the buffer, build the redirector and apply process-wide
    /// redirection as configured
    ///
    /// Fails if the buffer cannot be allocated or stdio cannot be captured.
    /// A mirror device that cannot be opened only disables mirroring.
    pub fn initialize_with(
        config: BridgeConfig,
        handler: Arc<dyn LineHandler>,
        preferences: NegotiationPreferences,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let buffer = Arc::new(BoundedByteBuffer::new(config.buffer_capacity)?);
        let console = Arc::new(OutputRedirector::new(buffer, config.mirror));

        if let Some(path) = &config.mirror_device {
            match OpenOptions::new().write(true).open(path) {
                Ok(device) => {
                    console.attach_mirror_device(device);
                }
                Err(e) => tracing::error!("Failed to open mirror device {}: {}", path.display(), e),
            }
        }

        if config.capture_stdio {
            Self::capture_stdio(&console)?;
        }

        if !redirect::install_putc_hook(Arc::clone(&console)) {
            tracing::debug!("putc hook already installed by an earlier bridge");
        }

        tracing::info!(
            "Telnet bridge initialized (buffer {} bytes, port {})",
            config.buffer_capacity,
            config.port
        );

        Ok(Arc::new(Self {
            ctx: SessionContext {
                config: Arc::new(config),
                console,
                handler,
                preferences: Arc::new(preferences),
            },
            task: Mutex::new(None),
        }))
    }

    #[cfg(unix)]
    fn capture_stdio(console: &Arc<OutputRedirector>) -> Result<()> {
        tracing::info!("Redirecting stdout/stderr to telnet");
        if let Some(original) = redirect::capture_stdio(Arc::clone(console))? {
            // Explicit device from config wins
            console.attach_mirror_device(original);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn capture_stdio(_console: &Arc<OutputRedirector>) -> Result<()> {
        Err(crate::error::BridgeError::StdioCapture(
            "not supported on this platform".into(),
        ))
    }

    /// Spawn the listener task
    ///
    /// Returns `Ok(false)` without side effects if it is already running.
    pub fn start(&self) -> Result<bool> {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() {
            tracing::warn!("Telnet task already running");
            return Ok(false);
        }

        let ctx = self.ctx.clone();
        let settings = ctx.config.task.clone();

        // Built here so a failure reaches the caller
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let handle = std::thread::Builder::new()
            .name(settings.name.clone())
            .stack_size(settings.stack_size)
            .spawn(move || {
                apply_task_settings(&settings);
                runtime.block_on(Listener::new(ctx).run());
            })?;

        *task = Some(handle);
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Toggle the local mirror
    pub fn set_mirror(&self, enabled: bool) {
        self.ctx.console.set_mirror(enabled);
    }

    /// Context object for emitting console text
    pub fn console(&self) -> &Arc<OutputRedirector> {
        &self.ctx.console
    }

    pub fn buffer(&self) -> &Arc<BoundedByteBuffer> {
        self.ctx.console.buffer()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }
}

/// Pin and prioritize the calling thread where the platform allows it
#[cfg(target_os = "linux")]
fn apply_task_settings(settings: &TaskConfig) {
    if let Some(core) = settings.core.filter(|&core| {
        let in_range = core < libc::CPU_SETSIZE as usize;
        if !in_range {
            tracing::warn!("Telnet task core {} out of range, not pinning", core);
        }
        in_range
    }) {
        // SAFETY: cpu_set_t is plain data; zeroed is its empty set, and
        // the pointer passed covers exactly one cpu_set_t.
        let ret = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(core, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if ret != 0 {
            tracing::warn!(
                "Failed to pin telnet task to core {}: {}",
                core,
                std::io::Error::last_os_error()
            );
        }
    }

    if let Some(nice) = settings.priority {
        // On Linux, who = 0 with PRIO_PROCESS addresses the calling thread
        // SAFETY: plain syscall wrapper with scalar arguments.
        let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
        if ret != 0 {
            tracing::warn!(
                "Failed to set telnet task priority {}: {}",
                nice,
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_task_settings(settings: &TaskConfig) {
    if settings.core.is_some() || settings.priority.is_some() {
        tracing::warn!("Task affinity and priority are only supported on Linux");
    }
}
