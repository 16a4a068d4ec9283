//! Syscall interception loop, single-stepping a traced child between
//! system-call boundaries

use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::Result;
use crate::monitor::wait4;
use crate::state::ProcessState;
use crate::subprocess::Inner;

/// Syscall number currently being entered or exited by the stopped tracee.
///
/// The register holding it is architecture-specific; this accessor is the
/// only place that knows which one.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub(crate) fn current_syscall(pid: Pid) -> Result<i64> {
    Ok(ptrace::getregs(pid)?.orig_rax as i64)
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
pub(crate) fn current_syscall(pid: Pid) -> Result<i64> {
    Ok(ptrace::getregs(pid)?.orig_eax as i64)
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "x86"))))]
pub(crate) fn current_syscall(_pid: Pid) -> Result<i64> {
    Err(crate::error::SandboxError::UnsupportedPlatform)
}

/// Step the traced child from one syscall boundary to the next until it
/// terminates or enters a denied call.
///
/// Each traced call stops twice, on entry and on exit; the denied set is
/// only checked on the entry half, before the call takes effect. On the
/// first match the record is finalized to DeniedSyscall (unless something
/// already finalized it), the child is killed and its death notification is
/// consumed so the caller still gets a final wait status and rusage.
///
/// The child is expected to be in a ptrace stop when this is called (the
/// trap right after exec under TRACEME).
pub(crate) fn run(
    inner: &Inner,
    pid: Pid,
    denied: &[i64],
) -> Result<(libc::c_int, libc::rusage)> {
    let mut entering = true;

    loop {
        ptrace::syscall(pid, None)?;
        let (status, usage) = wait4(pid, 0)?;

        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            return Ok((status, usage));
        }

        let id = current_syscall(pid)?;
        if entering && denied.contains(&id) {
            inner.advance(ProcessState::DeniedSyscall);
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                log::warn!("filter: killing child {} after denied syscall failed: {}", pid, e);
            }
            // SIGKILL terminates even a ptrace-stopped child; reap it so the
            // kill signal ends up in the wait status.
            return wait4(pid, 0).map_err(Into::into);
        }

        entering = !entering;
    }
}
