//! Output redirection into the bridge
//!
//! [`OutputRedirector`] is the context object every text producer writes
//! through: command handlers, the log pipeline, the captured stdio pump and
//! the low-level [`putc`] hook. It feeds the [`BoundedByteBuffer`] and, when
//! enabled, mirrors the same bytes to a local device.
//!
//! Writes are fire-and-forget. Nothing here reports an error to a caller.

#[cfg(unix)]
mod stdio;

#[cfg(unix)]
pub use stdio::capture_stdio;

use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::BoundedByteBuffer;

/// Where console output currently goes
///
/// Both sinks may be active at once. Flags are last-write-wins.
#[derive(Debug)]
pub struct RedirectTarget {
    bridge: AtomicBool,
    mirror: AtomicBool,
}

impl RedirectTarget {
    pub fn new(bridge: bool, mirror: bool) -> Self {
        Self {
            bridge: AtomicBool::new(bridge),
            mirror: AtomicBool::new(mirror),
        }
    }

    #[inline]
    pub fn bridge(&self) -> bool {
        self.bridge.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn mirror(&self) -> bool {
        self.mirror.load(Ordering::Relaxed)
    }

    pub fn set_bridge(&self, enabled: bool) {
        self.bridge.store(enabled, Ordering::Relaxed);
    }

    pub fn set_mirror(&self, enabled: bool) {
        self.mirror.store(enabled, Ordering::Relaxed);
    }
}

impl Default for RedirectTarget {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Scratch line for single-character output
struct PutcLine {
    buf: [u8; crate::PUTC_BUFFER_SIZE],
    len: usize,
}

/// Sole destination for the process's console text
pub struct OutputRedirector {
    buffer: Arc<BoundedByteBuffer>,
    target: RedirectTarget,
    mirror_device: OnceLock<File>,
    /// Set after a mirror failure was logged, cleared on the next success
    mirror_failing: AtomicBool,
    putc_line: Mutex<PutcLine>,
}

impl OutputRedirector {
    /// Create redirector feeding `buffer`
    pub fn new(buffer: Arc<BoundedByteBuffer>, mirror: bool) -> Self {
        Self {
            buffer,
            target: RedirectTarget::new(true, mirror),
            mirror_device: OnceLock::new(),
            mirror_failing: AtomicBool::new(false),
            putc_line: Mutex::new(PutcLine {
                buf: [0; crate::PUTC_BUFFER_SIZE],
                len: 0,
            }),
        }
    }

    /// Attach the local mirror device
    ///
    /// Only the first device sticks. Returns false if one was already attached.
    pub fn attach_mirror_device(&self, device: File) -> bool {
        self.mirror_device.set(device).is_ok()
    }

    pub fn has_mirror_device(&self) -> bool {
        self.mirror_device.get().is_some()
    }

    /// Route bytes to every active sink
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.target.bridge() {
            self.buffer.write(data);
        }

        if self.target.mirror() {
            if let Some(mut device) = self.mirror_device.get() {
                match device.write_all(data) {
                    Ok(()) => self.mirror_failing.store(false, Ordering::Relaxed),
                    Err(e) => {
                        // The log line itself comes back through here; the flag
                        // stops that from recursing
                        if !self.mirror_failing.swap(true, Ordering::Relaxed) {
                            tracing::warn!("Mirror device write failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Single-character output, flushed per line or when the scratch fills
    pub fn putc(&self, byte: u8) {
        let mut line = self.putc_line.lock().unwrap_or_else(|p| p.into_inner());
        let len = line.len;
        line.buf[len] = byte;
        line.len += 1;

        if byte == b'\n' || line.len == line.buf.len() {
            let len = line.len;
            self.write(&line.buf[..len]);
            line.len = 0;
        }
    }

    /// Push out a partially filled putc line
    pub fn flush(&self) {
        let mut line = self.putc_line.lock().unwrap_or_else(|p| p.into_inner());
        if line.len > 0 {
            let len = line.len;
            self.write(&line.buf[..len]);
            line.len = 0;
        }
    }

    /// Toggle the local mirror; takes effect on the next write
    pub fn set_mirror(&self, enabled: bool) {
        self.target.set_mirror(enabled);
    }

    pub fn mirror_enabled(&self) -> bool {
        self.target.mirror()
    }

    pub fn target(&self) -> &RedirectTarget {
        &self.target
    }

    /// Buffer this redirector feeds
    pub fn buffer(&self) -> &Arc<BoundedByteBuffer> {
        &self.buffer
    }

    /// `io::Write` handle for formatted output
    pub fn writer(self: &Arc<Self>) -> ConsoleWriter {
        ConsoleWriter {
            redirector: Arc::clone(self),
        }
    }
}

/// `io::Write` adapter over an [`OutputRedirector`]
///
/// Also a `MakeWriter`, so a `tracing_subscriber::fmt` layer can log straight
/// into the bridge.
#[derive(Clone)]
pub struct ConsoleWriter {
    redirector: Arc<OutputRedirector>,
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.redirector.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ConsoleWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// The one piece of ambient global state: the runtime offers a single
// low-level character hook, so the redirector behind it is process-wide.
static PUTC_HOOK: OnceLock<Arc<OutputRedirector>> = OnceLock::new();

/// Install `redirector` as the target of [`putc`]
///
/// Only the first installation takes effect. Returns false afterwards.
pub fn install_putc_hook(redirector: Arc<OutputRedirector>) -> bool {
    PUTC_HOOK.set(redirector).is_ok()
}

/// Low-level single-character console output
///
/// Drops the byte until a hook is installed.
pub fn putc(byte: u8) {
    if let Some(redirector) = PUTC_HOOK.get() {
        redirector.putc(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn redirector(capacity: usize) -> Arc<OutputRedirector> {
        let buffer = Arc::new(BoundedByteBuffer::new(capacity).unwrap());
        Arc::new(OutputRedirector::new(buffer, true))
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("netconsole-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_write_reaches_buffer() {
        let r = redirector(64);
        r.write(b"boot ok\n");
        assert_eq!(&r.buffer().try_take(64)[..], b"boot ok\n");
    }

    #[test]
    fn test_bridge_sink_disabled() {
        let r = redirector(64);
        r.target().set_bridge(false);
        r.write(b"dropped");
        assert!(r.buffer().is_empty());
    }

    #[test]
    fn test_putc_flushes_on_newline() {
        let r = redirector(256);
        for &b in b"abc" {
            r.putc(b);
        }
        assert!(r.buffer().is_empty());

        r.putc(b'\n');
        assert_eq!(&r.buffer().try_take(256)[..], b"abc\n");
    }

    #[test]
    fn test_putc_flushes_when_scratch_full() {
        let r = redirector(512);
        for _ in 0..crate::PUTC_BUFFER_SIZE {
            r.putc(b'x');
        }
        assert_eq!(r.buffer().pending(), crate::PUTC_BUFFER_SIZE);

        r.putc(b'y');
        r.flush();
        assert_eq!(r.buffer().pending(), crate::PUTC_BUFFER_SIZE + 1);
    }

    #[test]
    fn test_mirror_device_receives_copy() {
        let path = temp_path("mirror");
        let r = redirector(64);
        assert!(r.attach_mirror_device(File::create(&path).unwrap()));

        r.write(b"both\n");
        r.set_mirror(false);
        r.write(b"bridge only\n");

        let mut mirrored = String::new();
        File::open(&path).unwrap().read_to_string(&mut mirrored).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mirrored, "both\n");
        assert_eq!(&r.buffer().try_take(64)[..], b"both\nbridge only\n");
    }

    #[test]
    fn test_mirror_failure_is_not_fatal() {
        let path = temp_path("readonly");
        File::create(&path).unwrap();
        let r = redirector(64);
        // A read-only handle makes every mirror write fail
        r.attach_mirror_device(File::open(&path).unwrap());

        r.write(b"still buffered");
        std::fs::remove_file(&path).ok();

        assert_eq!(&r.buffer().try_take(64)[..], b"still buffered");
    }

    #[test]
    fn test_console_writer_formats() {
        let r = redirector(64);
        let mut out = r.writer();
        write!(out, "code=0x{:x}", 0x105).unwrap();
        assert_eq!(&r.buffer().try_take(64)[..], b"code=0x105");
    }

    #[test]
    fn test_putc_without_hook_is_noop() {
        // Must not panic whether or not another test installed a hook
        putc(b'z');
    }
}
