//! `SIGCHLD` self-pipe: the replacement for the original's
//! `setjmp`/`siglongjmp` pattern (spec.md §9 explicitly asks for this not
//! to be ported). The handler only writes one byte to a pipe; everything
//! else happens back in the dispatcher's normal `poll` loop, where a
//! readable self-pipe is just another event.

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, close, pipe};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

static SELF_PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_sigchld(_signum: i32) {
    let fd = SELF_PIPE_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        // SAFETY: async-signal-safe write of one byte; errors (e.g. a
        // full pipe) are deliberately ignored here.
        let _ = unistd::write(unsafe { BorrowedFd::borrow_raw(fd) }, &[0u8]);
    }
}

/// Installs the `SIGCHLD` handler and returns the read end of the
/// self-pipe. Only one self-pipe may be installed per process; callers
/// use this once per conduit dispatcher lifetime, not per conduit.
pub struct SigchldPipe {
    read_fd: OwnedFd,
}

impl SigchldPipe {
    pub fn install() -> nix::Result<Self> {
        let (read_fd, write_fd) = pipe()?;
        SELF_PIPE_WRITE_FD.store(write_fd.as_raw_fd(), Ordering::Relaxed);
        // `write_fd` is intentionally leaked into the static: the signal
        // handler needs it for the life of the process.
        std::mem::forget(write_fd);

        unsafe {
            signal::signal(Signal::SIGCHLD, SigHandler::Handler(on_sigchld))?;
        }
        Ok(SigchldPipe { read_fd })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    /// Drain every byte currently buffered in the pipe.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.read_fd.as_raw_fd(), &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
            }
        }
    }
}

impl Drop for SigchldPipe {
    fn drop(&mut self) {
        let write_fd = SELF_PIPE_WRITE_FD.swap(-1, Ordering::Relaxed);
        if write_fd >= 0 {
            let _ = close(write_fd);
        }
    }
}
