//! Watchdog timing out a supervised child

use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::state::ProcessState;
use crate::subprocess::Inner;

/// Upper bound on a single signal wait, so cancellation by the monitor is
/// noticed promptly even when no SIGCHLD arrives.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Block until SIGCHLD arrives or the timeout elapses, whichever is first.
///
/// SIGCHLD is blocked in this thread's mask (inherited from the launching
/// thread, which blocked it before fork), so a child that dies between fork
/// and this wait leaves the signal pending rather than losing it. On timeout
/// the child is killed, but only if nothing else finalized the record first:
/// the status write goes through the same not-yet-terminal guard as every
/// other terminal transition, so the race against normal completion and the
/// syscall filter resolves to first writer wins.
///
/// A SIGCHLD caused by a stop or continue of the child does not disarm the
/// timer; the wait resumes with the remaining budget.
pub(crate) fn run(inner: Arc<Inner>, pid: Pid, timeout_secs: u64) {
    let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut mask);
        libc::sigaddset(&mut mask, libc::SIGCHLD);
    }

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);

    loop {
        if inner.cancelled() || inner.state().is_terminal() {
            return;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            if inner.advance(ProcessState::Timeout) {
                if let Err(e) = kill(pid, Signal::SIGKILL) {
                    log::warn!("watchdog: killing timed-out child {} failed: {}", pid, e);
                }
            }
            return;
        }

        let slice = remaining.min(WAIT_SLICE);
        let spec = libc::timespec {
            tv_sec: slice.as_secs() as libc::time_t,
            tv_nsec: slice.subsec_nanos() as libc::c_long,
        };

        let received = unsafe { libc::sigtimedwait(&mask, std::ptr::null_mut(), &spec) };
        if received == -1 {
            match Errno::last() {
                // Slice elapsed; the deadline check at the top of the loop
                // decides whether the full timeout has been reached.
                Errno::EAGAIN => continue,
                // Interrupted by an unrelated signal: retry with the
                // remaining time budget.
                Errno::EINTR => continue,
                e => {
                    log::warn!("watchdog: sigtimedwait failed: {}", e);
                    return;
                }
            }
        }
        // SIGCHLD received: loop around, the terminal check decides whether
        // the child is actually done or merely stopped/continued.
    }
}
