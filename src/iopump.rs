//! I/O pump multiplexing the child's standard streams

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read, write};

use crate::subprocess::Inner;

/// Poll interval; also bounds how long cancellation takes to be noticed.
const POLL_INTERVAL_MS: u16 = 50;

const READ_CHUNK: usize = 4096;

/// Growable capture buffer for one of the child's output streams.
///
/// Appended to by the pump, read concurrently by the caller. The cursor
/// tracks how far incremental readers have consumed the stream; it never
/// moves backwards and never truncates the underlying buffer.
pub(crate) struct CaptureBuffer {
    data: Mutex<Vec<u8>>,
    cursor: AtomicUsize,
}

impl CaptureBuffer {
    pub(crate) fn new() -> CaptureBuffer {
        CaptureBuffer {
            data: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    fn append(&self, chunk: &[u8]) {
        let mut data = self.data.lock().unwrap();
        data.extend_from_slice(chunk);
    }

    /// Everything captured so far. A snapshot of a live, growing stream.
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Bytes appended since the previous incremental read; advances the
    /// cursor past them.
    pub(crate) fn take_new(&self) -> Vec<u8> {
        let data = self.data.lock().unwrap();
        let from = self.cursor.swap(data.len(), Ordering::SeqCst);
        data[from..].to_vec()
    }
}

/// Pump loop: multiplex readiness over the child's stdout/stderr read ends
/// and stdin write end until both output streams hit end-of-data or the
/// monitor cancels the pump at child termination.
///
/// The stdin end is only polled for writability while a pending input
/// message exists, so an idle pump does not spin on an always-writable pipe.
/// After cancellation the pump keeps reading as long as data is immediately
/// ready, so output written just before the child died is not lost.
pub(crate) fn run(inner: Arc<Inner>, stdin_wr: OwnedFd, stdout_rd: OwnedFd, stderr_rd: OwnedFd) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let draining = inner.cancelled();
        let want_stdin = inner.stdin_pending.lock().unwrap().is_some();

        let stdout_events = if stdout_open { PollFlags::POLLIN } else { PollFlags::empty() };
        let stderr_events = if stderr_open { PollFlags::POLLIN } else { PollFlags::empty() };
        let stdin_events = if want_stdin { PollFlags::POLLOUT } else { PollFlags::empty() };

        let mut fds = [
            PollFd::new(stdout_rd.as_fd(), stdout_events),
            PollFd::new(stderr_rd.as_fd(), stderr_events),
            PollFd::new(stdin_wr.as_fd(), stdin_events),
        ];

        match poll(&mut fds, POLL_INTERVAL_MS) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::warn!("io pump: poll failed: {}", e);
                break;
            }
        }

        let stdout_ready = fds[0].revents().unwrap_or(PollFlags::empty());
        let stderr_ready = fds[1].revents().unwrap_or(PollFlags::empty());
        let stdin_ready = fds[2].revents().unwrap_or(PollFlags::empty());

        let mut progressed = false;

        if stdout_open && stdout_ready.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            progressed |= drain(&stdout_rd, &inner.stdout, "stdout", &mut stdout_open);
        }
        if stderr_open && stderr_ready.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            progressed |= drain(&stderr_rd, &inner.stderr, "stderr", &mut stderr_open);
        }
        if want_stdin && stdin_ready.intersects(PollFlags::POLLOUT | PollFlags::POLLERR) {
            deliver(&inner, &stdin_wr);
            progressed = true;
        }

        if draining && !progressed {
            break;
        }
    }
}

/// Read one chunk and append it to the capture buffer. Returns true when
/// bytes were appended; clears `open` on end-of-data or a read failure.
fn drain(fd: &OwnedFd, buffer: &CaptureBuffer, stream: &str, open: &mut bool) -> bool {
    let mut chunk = [0u8; READ_CHUNK];
    match read(fd.as_raw_fd(), &mut chunk) {
        Ok(0) => {
            *open = false;
            false
        }
        Ok(count) => {
            buffer.append(&chunk[..count]);
            true
        }
        Err(Errno::EINTR) => false,
        Err(e) => {
            log::warn!("io pump: read({}) failed: {}", stream, e);
            *open = false;
            false
        }
    }
}

/// Write the pending input message to the child's stdin in full, then clear
/// it so the blocked `write_stdin` caller is released. A short write is an
/// error; the message is dropped either way so the caller never hangs on an
/// undeliverable message.
fn deliver(inner: &Inner, stdin_wr: &OwnedFd) {
    let mut pending = inner.stdin_pending.lock().unwrap();
    let Some(message) = pending.take() else {
        return;
    };

    match write(stdin_wr, &message) {
        Ok(count) if count == message.len() => {}
        Ok(count) => {
            log::warn!(
                "io pump: short write to stdin ({} of {} bytes)",
                count,
                message.len()
            );
        }
        Err(e) => {
            log::warn!("io pump: write(stdin) failed: {}", e);
        }
    }
}
