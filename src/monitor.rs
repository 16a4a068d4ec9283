//! Process supervisor: fork/exec launch, wait loop and final status
//! resolution

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use libc::c_char;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{kill, SigSet, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{close, dup2, fork, pipe, ForkResult, Pid};

use crate::error::{Result, SandboxError};
use crate::limits::Limits;
use crate::profile::Profile;
use crate::rlimits::RlimitSpec;
use crate::state::ProcessState;
use crate::subprocess::Inner;
use crate::{filter, iopump, watchdog};

/// Everything the launch needs, snapshotted from the record so the monitor
/// owns its own copies.
pub(crate) struct Launch {
    pub(crate) argv: Vec<CString>,
    pub(crate) envp: Option<Vec<CString>>,
    pub(crate) limits: Limits,
    pub(crate) profiling: bool,
}

/// wait4(2): like waitpid but also yields the child's resource usage.
/// Retries on EINTR.
pub(crate) fn wait4(pid: Pid, options: libc::c_int) -> nix::Result<(libc::c_int, libc::rusage)> {
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let res = unsafe { libc::wait4(pid.as_raw(), &mut status, options, &mut usage) };
        if res == -1 {
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e),
            }
        }
        return Ok((status, usage));
    }
}

/// Launch the child and start the supervision task.
///
/// Pipe creation, signal masking and the fork itself happen on the calling
/// thread, so any failure there is returned directly and no background task
/// is left behind. Only once the child exists is the monitor thread spawned
/// for the parent branch.
pub(crate) fn launch(inner: &Arc<Inner>, launch: Launch) -> Result<JoinHandle<()>> {
    // '0' = child read end, '1' = parent write end, and vice versa
    let (stdin_rd, stdin_wr) = pipe().map_err(setup_err("creating stdin pipe"))?;
    let (stdout_rd, stdout_wr) = pipe().map_err(setup_err("creating stdout pipe"))?;
    let (stderr_rd, stderr_wr) = pipe().map_err(setup_err("creating stderr pipe"))?;

    // Block SIGCHLD before forking. If the child dies immediately the
    // notification stays pending for the watchdog's signal wait instead of
    // being discarded before any waiter is registered. Threads spawned below
    // inherit this mask.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    mask.thread_block().map_err(setup_err("blocking SIGCHLD"))?;

    let start = launch.profiling.then(Instant::now);

    // Pointer arrays for exec are prepared before fork; the child branch
    // must not allocate through a heap the fork may have caught mid-update.
    let argv_ptrs: Vec<*const c_char> = launch
        .argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect();
    let envp_ptrs: Option<Vec<*const c_char>> = launch.envp.as_ref().map(|envp| {
        envp.iter()
            .map(|var| var.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect()
    });
    let rlimits = RlimitSpec::from_limits(&launch.limits);
    let trace = !launch.limits.denied_syscalls().is_empty();

    let child = match unsafe { fork() }.map_err(setup_err("fork"))? {
        ForkResult::Child => exec_child(
            &argv_ptrs,
            envp_ptrs.as_deref(),
            rlimits,
            trace,
            stdin_rd.as_raw_fd(),
            stdin_wr.as_raw_fd(),
            stdout_rd.as_raw_fd(),
            stdout_wr.as_raw_fd(),
            stderr_rd.as_raw_fd(),
            stderr_wr.as_raw_fd(),
        ),
        ForkResult::Parent { child } => child,
    };

    inner.set_pid(child);
    inner.advance(ProcessState::Running);

    // Close the child-side pipe ends in the parent.
    drop(stdin_rd);
    drop(stdout_wr);
    drop(stderr_wr);

    let monitor_inner = Arc::clone(inner);
    let timeout = launch.limits.timeout();
    let denied = launch.limits.denied_syscalls().to_vec();

    let spawned = thread::Builder::new()
        .name("procbox-monitor".into())
        .spawn(move || {
            supervise(monitor_inner, child, timeout, denied, start, stdin_wr, stdout_rd, stderr_rd)
        });

    match spawned {
        Ok(handle) => Ok(handle),
        Err(e) => {
            // The child is already alive; never leak it.
            let _ = kill(child, Signal::SIGKILL);
            let _ = waitpid(child, None);
            inner.set_retval(libc::SIGKILL);
            inner.advance(ProcessState::Killed);
            Err(SandboxError::Process(format!(
                "failed to spawn monitor task: {}",
                e
            )))
        }
    }
}

fn setup_err(context: &'static str) -> impl Fn(Errno) -> SandboxError {
    move |e| SandboxError::Process(format!("{} failed: {}", context, e))
}

/// Child branch: install resource limits, request tracing when syscall
/// filtering was asked for, wire the standard streams to the pipes and
/// replace the process image. Never returns; any failure is reported on
/// stderr and the child exits.
fn exec_child(
    argv: &[*const c_char],
    envp: Option<&[*const c_char]>,
    rlimits: RlimitSpec,
    trace: bool,
    stdin_rd: RawFd,
    stdin_wr: RawFd,
    stdout_rd: RawFd,
    stdout_wr: RawFd,
    stderr_rd: RawFd,
    stderr_wr: RawFd,
) -> ! {
    if rlimits.apply().is_err() {
        die(b"procbox: installing resource limits failed\n");
    }

    if trace && ptrace::traceme().is_err() {
        die(b"procbox: ptrace(TRACEME) failed\n");
    }

    let wired = close(stdin_wr)
        .and_then(|_| dup2(stdin_rd, libc::STDIN_FILENO))
        .and_then(|_| close(stdin_rd))
        .and_then(|_| close(stdout_rd))
        .and_then(|_| dup2(stdout_wr, libc::STDOUT_FILENO))
        .and_then(|_| close(stdout_wr))
        .and_then(|_| close(stderr_rd))
        .and_then(|_| dup2(stderr_wr, libc::STDERR_FILENO))
        .and_then(|_| close(stderr_wr));
    if wired.is_err() {
        die(b"procbox: redirecting standard streams failed\n");
    }

    unsafe {
        match envp {
            Some(envp) => libc::execve(argv[0], argv.as_ptr(), envp.as_ptr()),
            // No environment supplied: inherit the caller's.
            None => libc::execv(argv[0], argv.as_ptr()),
        };
    }
    die(b"procbox: exec failed\n");
}

fn die(msg: &[u8]) -> ! {
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(127);
    }
}

/// Parent branch, run on the monitor thread: start the watchdog and the I/O
/// pump, drive the wait loop (plain or filter-driven), resolve the final
/// status and profile, then cancel the helpers.
fn supervise(
    inner: Arc<Inner>,
    pid: Pid,
    timeout: u64,
    denied: Vec<i64>,
    start: Option<Instant>,
    stdin_wr: OwnedFd,
    stdout_rd: OwnedFd,
    stderr_rd: OwnedFd,
) {
    if timeout > 0 {
        let watchdog_inner = Arc::clone(&inner);
        let spawned = thread::Builder::new()
            .name("procbox-watchdog".into())
            .spawn(move || watchdog::run(watchdog_inner, pid, timeout));
        if let Err(e) = spawned {
            log::warn!("monitor: failed to start watchdog, timeout unenforced: {}", e);
        }
    }

    let pump_inner = Arc::clone(&inner);
    let pump = thread::Builder::new()
        .name("procbox-iopump".into())
        .spawn(move || iopump::run(pump_inner, stdin_wr, stdout_rd, stderr_rd));
    if let Err(ref e) = pump {
        log::warn!("monitor: failed to start io pump, output will be lost: {}", e);
    }

    match wait_loop(&inner, pid, &denied) {
        Ok((status, usage)) => {
            classify(&inner, status);
            if let Some(start) = start {
                let wall_us = start.elapsed().as_micros() as u64;
                *inner.profile.lock().unwrap() = Profile::from_rusage(wall_us, &usage);
            }
        }
        Err(e) => {
            // The record must still reach a terminal state with the best
            // available information.
            log::warn!("monitor: could not determine how child {} died: {}", pid, e);
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
            inner.set_retval(libc::SIGKILL);
            inner.advance(ProcessState::Killed);
        }
    }

    // Cancel the helpers; each treats a second cancellation or one after it
    // already finished as a no-op. The pump is joined so it can drain output
    // that arrived just before termination.
    inner.cancel();
    if let Ok(pump) = pump {
        let _ = pump.join();
    }
}

/// Blocking wait until the child is gone, reflecting stop/continue
/// notifications as transient Stopped/Running states. With a non-empty
/// denied set the syscall filter replaces the plain wait entirely and
/// consumes the final status itself.
fn wait_loop(inner: &Inner, pid: Pid, denied: &[i64]) -> Result<(libc::c_int, libc::rusage)> {
    if denied.is_empty() {
        loop {
            let (status, usage) = wait4(pid, libc::WUNTRACED | libc::WCONTINUED)?;
            if libc::WIFSTOPPED(status) {
                inner.set_retval(libc::WSTOPSIG(status));
                inner.advance(ProcessState::Stopped);
            } else if libc::WIFCONTINUED(status) {
                inner.set_retval(0);
                inner.advance(ProcessState::Running);
            } else {
                return Ok((status, usage));
            }
        }
    } else {
        // First stop is the trap right after exec under TRACEME, unless the
        // child already failed before reaching exec.
        let (status, usage) = wait4(pid, 0)?;
        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            return Ok((status, usage));
        }
        filter::run(inner, pid, denied)
    }
}

/// Decode the final wait status into a terminal state and the exit/signal
/// code.
///
/// The signal-keyed rule for resource classification: SIGSEGV means the
/// address-space ceiling was hit, SIGXFSZ the file-size ceiling; every other
/// fatal signal is a plain kill. The terminal write is refused if the
/// watchdog or the filter already recorded a more specific cause, but the
/// terminating signal is still recorded as the code either way.
fn classify(inner: &Inner, status: libc::c_int) {
    if libc::WIFEXITED(status) {
        inner.set_retval(libc::WEXITSTATUS(status));
        inner.advance(ProcessState::Terminated);
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        inner.set_retval(sig);
        let cause = match sig {
            libc::SIGSEGV => ProcessState::MemoryExceeded,
            libc::SIGXFSZ => ProcessState::FileSizeExceeded,
            _ => ProcessState::Killed,
        };
        inner.advance(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> libc::c_int {
        (code & 0xff) << 8
    }

    fn signaled(sig: i32) -> libc::c_int {
        sig & 0x7f
    }

    #[test]
    fn classify_normal_exit() {
        let inner = Inner::new();
        inner.advance(ProcessState::Running);
        classify(&inner, exited(3));
        assert_eq!(inner.state(), ProcessState::Terminated);
        assert_eq!(inner.retval(), 3);
    }

    #[test]
    fn classify_signal_keyed_causes() {
        let inner = Inner::new();
        inner.advance(ProcessState::Running);
        classify(&inner, signaled(libc::SIGSEGV));
        assert_eq!(inner.state(), ProcessState::MemoryExceeded);
        assert_eq!(inner.retval(), libc::SIGSEGV);

        let inner = Inner::new();
        classify(&inner, signaled(libc::SIGXFSZ));
        assert_eq!(inner.state(), ProcessState::FileSizeExceeded);

        let inner = Inner::new();
        classify(&inner, signaled(libc::SIGTERM));
        assert_eq!(inner.state(), ProcessState::Killed);
        assert_eq!(inner.retval(), libc::SIGTERM);
    }

    #[test]
    fn earlier_terminal_state_wins_but_code_is_updated() {
        // Watchdog already recorded Timeout; the classifier must keep it and
        // only record the kill signal as the code.
        let inner = Inner::new();
        inner.advance(ProcessState::Running);
        assert!(inner.advance(ProcessState::Timeout));
        classify(&inner, signaled(libc::SIGKILL));
        assert_eq!(inner.state(), ProcessState::Timeout);
        assert_eq!(inner.retval(), libc::SIGKILL);
    }
}
