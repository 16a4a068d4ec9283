//! The subprocess record: the entity the caller owns and every supervision
//! component reads and mutates

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{Result, SandboxError};
use crate::iopump::CaptureBuffer;
use crate::limits::Limits;
use crate::monitor::{self, Launch};
use crate::profile::Profile;
use crate::state::ProcessState;

const WAIT_TICK: Duration = Duration::from_millis(1);
const INPUT_TICK: Duration = Duration::from_micros(100);

/// State shared between the record and the supervision tasks.
///
/// After launch the monitor is the single writer of everything here except
/// the status field, which the watchdog and the filter may also finalize,
/// and the pending-input buffer, which the caller and the pump hand off
/// through a lock.
pub(crate) struct Inner {
    state: AtomicU8,
    pid: AtomicI32,
    retval: AtomicI32,
    shutdown: AtomicBool,
    pub(crate) stdout: CaptureBuffer,
    pub(crate) stderr: CaptureBuffer,
    pub(crate) stdin_pending: Mutex<Option<Vec<u8>>>,
    pub(crate) profile: Mutex<Profile>,
}

impl Inner {
    pub(crate) fn new() -> Inner {
        Inner {
            state: AtomicU8::new(ProcessState::Ready as u8),
            pid: AtomicI32::new(0),
            retval: AtomicI32::new(0),
            shutdown: AtomicBool::new(false),
            stdout: CaptureBuffer::new(),
            stderr: CaptureBuffer::new(),
            stdin_pending: Mutex::new(None),
            profile: Mutex::new(Profile::default()),
        }
    }

    pub(crate) fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Advance the lifecycle status, refusing any write once a
    /// Terminated-family value is present. Concurrent terminal writes
    /// (watchdog timeout, filter denial, classifier) therefore resolve to
    /// first writer wins. Returns whether the write took effect.
    pub(crate) fn advance(&self, next: ProcessState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                if ProcessState::from_u8(raw).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }

    /// Set by the monitor exactly once, before the status moves to Running.
    pub(crate) fn set_pid(&self, pid: Pid) {
        let _ = self
            .pid
            .compare_exchange(0, pid.as_raw(), Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn pid(&self) -> Option<Pid> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    pub(crate) fn set_retval(&self, value: i32) {
        self.retval.store(value, Ordering::SeqCst);
    }

    pub(crate) fn retval(&self) -> i32 {
        self.retval.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// A command to run under supervision: resource ceilings, captured standard
/// streams, optional syscall filtering and optional post-mortem profiling.
///
/// ```no_run
/// use procbox::Subprocess;
///
/// let mut child = Subprocess::new(&["/bin/echo", "hello"]).unwrap();
/// child.set_time_limit(5);
/// child.run().unwrap();
/// assert_eq!(child.wait().unwrap(), 0);
/// assert_eq!(child.read_stdout(), b"hello\n");
/// ```
pub struct Subprocess {
    argv: Vec<CString>,
    envp: Option<Vec<CString>>,
    limits: Option<Limits>,
    profiling: bool,
    inner: Arc<Inner>,
    monitor: Option<JoinHandle<()>>,
    // Serializes concurrent write_stdin callers over the whole
    // deliver-and-confirm span.
    writer: Mutex<()>,
}

impl Subprocess {
    /// Create a record in the Ready state for the given command line. The
    /// child inherits the caller's environment unless [`set_env`] is called.
    ///
    /// The command vector is copied atomically: an empty vector or an
    /// argument with an interior NUL byte fails the constructor and yields
    /// no record.
    ///
    /// [`set_env`]: Subprocess::set_env
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Result<Subprocess> {
        if argv.is_empty() {
            return Err(SandboxError::Config("empty command line".to_string()));
        }
        let argv = copy_strings(argv)?;
        Ok(Subprocess {
            argv,
            envp: None,
            limits: None,
            profiling: false,
            inner: Arc::new(Inner::new()),
            monitor: None,
            writer: Mutex::new(()),
        })
    }

    /// Replace the inherited environment with an explicit `VAR=value` list.
    pub fn set_env<S: AsRef<str>>(&mut self, envp: &[S]) -> Result<()> {
        self.envp = Some(copy_strings(envp)?);
        Ok(())
    }

    /// Request post-mortem profiling (wall/user/sys time and peak memory).
    /// Off by default: it touches the monotonic clock and the kernel's
    /// rusage accounting.
    pub fn enable_profiling(&mut self) {
        self.profiling = true;
    }

    fn limits_mut(&mut self) -> &mut Limits {
        self.limits.get_or_insert_with(Limits::new)
    }

    /// Timeout in seconds enforced by the watchdog; values at or below zero
    /// mean no ceiling.
    pub fn set_time_limit(&mut self, seconds: i64) {
        self.limits_mut().timeout = Limits::clamp(seconds);
    }

    /// Address-space ceiling in bytes; values at or below zero mean no
    /// ceiling.
    pub fn set_memory_limit(&mut self, bytes: i64) {
        self.limits_mut().memory = Limits::clamp(bytes);
    }

    /// Ceiling on the size of any file the child writes, in bytes.
    pub fn set_fsize_limit(&mut self, bytes: i64) {
        self.limits_mut().fsize = Limits::clamp(bytes);
    }

    /// Ceiling on the number of open file descriptors.
    pub fn set_fd_limit(&mut self, count: i64) {
        self.limits_mut().fd = Limits::clamp(count);
    }

    /// Ceiling on the number of processes.
    pub fn set_proc_limit(&mut self, count: i64) {
        self.limits_mut().proc = Limits::clamp(count);
    }

    /// Deny a syscall number. First use of any denied call terminates the
    /// child with [`ProcessState::DeniedSyscall`]. Order is preserved and
    /// duplicates are harmless.
    pub fn disable_syscall(&mut self, syscall: i64) {
        self.limits_mut().syscalls.push(syscall);
    }

    pub fn time_limit(&self) -> u64 {
        self.limits.as_ref().map_or(0, Limits::timeout)
    }

    pub fn memory_limit(&self) -> u64 {
        self.limits.as_ref().map_or(0, Limits::memory)
    }

    pub fn fsize_limit(&self) -> u64 {
        self.limits.as_ref().map_or(0, Limits::fsize)
    }

    pub fn fd_limit(&self) -> u64 {
        self.limits.as_ref().map_or(0, Limits::fd)
    }

    pub fn proc_limit(&self) -> u64 {
        self.limits.as_ref().map_or(0, Limits::proc)
    }

    pub fn denied_syscalls(&self) -> &[i64] {
        self.limits.as_ref().map_or(&[], Limits::denied_syscalls)
    }

    /// Launch the child and start the supervision task. Fails if the record
    /// was already started, if any pre-fork setup step fails, or if the
    /// background task could not be created.
    pub fn run(&mut self) -> Result<()> {
        if self.monitor.is_some() || self.inner.state() != ProcessState::Ready {
            return Err(SandboxError::Config(
                "subprocess already started".to_string(),
            ));
        }
        let launch = Launch {
            argv: self.argv.clone(),
            envp: self.envp.clone(),
            limits: self.limits.clone().unwrap_or_default(),
            profiling: self.profiling,
        };
        let handle = monitor::launch(&self.inner, launch)?;
        self.monitor = Some(handle);
        Ok(())
    }

    /// Current lifecycle state, without blocking.
    pub fn poll(&self) -> ProcessState {
        self.inner.state()
    }

    /// OS process id of the child; set once the launch has forked.
    pub fn pid(&self) -> Option<i32> {
        self.inner.pid().map(Pid::as_raw)
    }

    /// Block until the child reaches a Terminated-family state and return
    /// the exit code (normal exit) or terminating signal number (any
    /// signal-based termination, the watchdog's and filter's kills
    /// included).
    pub fn wait(&mut self) -> Result<i32> {
        if self.monitor.is_none() && !self.inner.state().is_terminal() {
            return Err(SandboxError::Config(
                "subprocess was never started".to_string(),
            ));
        }
        while !self.inner.state().is_terminal() {
            thread::sleep(WAIT_TICK);
        }
        if let Some(handle) = self.monitor.take() {
            if handle.join().is_err() {
                return Err(SandboxError::Process("monitor task panicked".to_string()));
            }
        }
        Ok(self.inner.retval())
    }

    /// Send an arbitrary signal to the child. Failure is reported, not
    /// fatal to the record.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        let pid = self
            .inner
            .pid()
            .ok_or_else(|| SandboxError::Process("subprocess not started".to_string()))?;
        kill(pid, signal).map_err(|e| {
            log::warn!("sending {} to {} failed: {}", signal, pid, e);
            e.into()
        })
    }

    /// Force-terminate the child with SIGKILL.
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Suspend the child with SIGSTOP; the record reflects this as a
    /// transient Stopped state.
    pub fn suspend(&self) -> Result<()> {
        self.signal(Signal::SIGSTOP)
    }

    /// Resume a suspended child with SIGCONT.
    pub fn resume(&self) -> Result<()> {
        self.signal(Signal::SIGCONT)
    }

    /// Queue bytes for the child's stdin and block until the I/O pump has
    /// delivered them or the child has terminated.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<()> {
        if self.inner.state() == ProcessState::Ready {
            return Err(SandboxError::Process(
                "subprocess not started".to_string(),
            ));
        }
        let _writer = self.writer.lock().unwrap();
        *self.inner.stdin_pending.lock().unwrap() = Some(bytes.to_vec());
        loop {
            if self.inner.stdin_pending.lock().unwrap().is_none() {
                return Ok(());
            }
            if self.inner.state().is_terminal() {
                self.inner.stdin_pending.lock().unwrap().take();
                return Err(SandboxError::Process(
                    "subprocess terminated before input was delivered".to_string(),
                ));
            }
            thread::sleep(INPUT_TICK);
        }
    }

    /// Everything the child has written to stdout so far. A snapshot of a
    /// live, growing stream, not a stable view.
    pub fn read_stdout(&self) -> Vec<u8> {
        self.inner.stdout.contents()
    }

    /// Everything the child has written to stderr so far.
    pub fn read_stderr(&self) -> Vec<u8> {
        self.inner.stderr.contents()
    }

    /// Stdout bytes appended since the previous incremental read.
    pub fn read_stdout_new(&self) -> Vec<u8> {
        self.inner.stdout.take_new()
    }

    /// Stderr bytes appended since the previous incremental read.
    pub fn read_stderr_new(&self) -> Vec<u8> {
        self.inner.stderr.take_new()
    }

    /// Post-mortem profile; present only when profiling was enabled before
    /// launch. All zero until the child has fully terminated.
    pub fn profile(&self) -> Option<Profile> {
        self.profiling.then(|| *self.inner.profile.lock().unwrap())
    }
}

impl Drop for Subprocess {
    /// Deleting a record whose child may still run must not leak a live
    /// process: the child is killed (with a warning) and the monitor joined,
    /// which also reaps it.
    fn drop(&mut self) {
        let state = self.inner.state();
        if state != ProcessState::Ready && !state.is_terminal() {
            log::warn!(
                "subprocess {:?} still running at delete, killing it",
                self.inner.pid()
            );
            let _ = self.kill();
        }
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}

fn copy_strings<S: AsRef<str>>(strings: &[S]) -> Result<Vec<CString>> {
    strings
        .iter()
        .map(|s| {
            CString::new(s.as_ref()).map_err(|_| {
                SandboxError::Config(format!(
                    "string contains an interior NUL byte: {:?}",
                    s.as_ref()
                ))
            })
        })
        .collect()
}
