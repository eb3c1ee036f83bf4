//! Process-wide stdout/stderr capture (unix)
//!
//! Points file descriptors 1 and 2 at a pipe whose read end is pumped into
//! the redirector by a dedicated thread. Any code that prints, including
//! foreign libraries writing straight to the descriptors, ends up in the
//! bridge without changes. The capture is irreversible for the life of the
//! process and happens at most once.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::sync::{Arc, Mutex};

use super::OutputRedirector;
use crate::error::{BridgeError, Result};

/// Set only once the descriptors point at the pipe
static CAPTURED: Mutex<bool> = Mutex::new(false);

const PUMP_CHUNK: usize = 256;

fn check(ret: libc::c_int, what: &str) -> Result<libc::c_int> {
    if ret < 0 {
        Err(BridgeError::StdioCapture(format!(
            "{} failed: {}",
            what,
            io::Error::last_os_error()
        )))
    } else {
        Ok(ret)
    }
}

/// Redirect stdout and stderr into `redirector`
///
/// Returns a handle to the original stdout, which is the natural local
/// mirror device. Returns `Ok(None)` if stdio was already captured. On
/// failure nothing stays redirected and a later call may retry.
pub fn capture_stdio(redirector: Arc<OutputRedirector>) -> Result<Option<File>> {
    let mut captured = CAPTURED.lock().unwrap_or_else(|p| p.into_inner());
    if *captured {
        tracing::warn!("Stdio already captured, skipping");
        return Ok(None);
    }

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: fds points at two writable c_ints as pipe(2) requires.
    check(unsafe { libc::pipe(fds.as_mut_ptr()) }, "pipe")?;
    let (read_fd, write_fd) = (fds[0], fds[1]);

    // SAFETY: read_fd was just created and is owned by nothing else.
    let mut pipe = unsafe { File::from_raw_fd(read_fd) };

    // The pump sees EOF and exits once every write end is closed
    let spawned = std::thread::Builder::new()
        .name("stdio-pump".into())
        .spawn(move || {
            let mut chunk = [0u8; PUMP_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => redirector.write(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

    // SAFETY: write_fd is owned by this function; the standard descriptors
    // are only replaced through dup2, which is checked and undone on error.
    let redirected = match spawned {
        Ok(_) => unsafe { redirect_standard_fds(write_fd) },
        Err(e) => Err(e.into()),
    };
    // SAFETY: write_fd is still ours; fds 1 and 2 hold their own copies.
    unsafe { libc::close(write_fd) };

    let original = redirected?;
    *captured = true;

    // SAFETY: original came from dup above and has no other owner.
    Ok(Some(unsafe { File::from_raw_fd(original) }))
}

/// Point fds 1 and 2 at `write_fd`, returning a duplicate of the old stdout
///
/// # Safety
/// `write_fd` must be an open descriptor owned by the caller.
unsafe fn redirect_standard_fds(write_fd: RawFd) -> Result<RawFd> {
    let original = check(libc::dup(libc::STDOUT_FILENO), "dup(stdout)")?;

    let result = check(libc::dup2(write_fd, libc::STDOUT_FILENO), "dup2(stdout)")
        .and_then(|_| check(libc::dup2(write_fd, libc::STDERR_FILENO), "dup2(stderr)"));

    if let Err(e) = result {
        libc::dup2(original, libc::STDOUT_FILENO);
        libc::close(original);
        return Err(e);
    }
    Ok(original)
}
