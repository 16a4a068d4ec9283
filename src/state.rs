//! Lifecycle states of a supervised subprocess

use serde::{Deserialize, Serialize};

/// State of a supervised subprocess.
///
/// The numeric ordering is meaningful: every state at or past `Terminated`
/// means the child will never run again, and once such a state is recorded it
/// is never overwritten. `Running` and `Stopped` may alternate while the
/// child is delivered stop/continue signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessState {
    /// Ready to start
    Ready = 0,
    /// Running
    Running = 1,
    /// Currently not scheduled
    Sleeping = 2,
    /// Interrupted and waiting
    Stopped = 3,
    /// Waiting for its parent before terminating
    Zombie = 4,
    /// Exited normally
    Terminated = 5,
    /// Execution interrupted by a signal
    Killed = 6,
    /// Killed by the watchdog after the time limit elapsed
    Timeout = 7,
    /// Out of memory
    MemoryExceeded = 8,
    /// File size limit exceeded
    FileSizeExceeded = 9,
    /// Open file descriptor limit exceeded
    FdExceeded = 10,
    /// Process count limit exceeded
    ProcessExceeded = 11,
    /// Used a denied syscall
    DeniedSyscall = 12,
}

impl ProcessState {
    /// True once the child will never run again.
    pub fn is_terminal(self) -> bool {
        self >= ProcessState::Terminated
    }

    pub(crate) fn from_u8(raw: u8) -> ProcessState {
        match raw {
            0 => ProcessState::Ready,
            1 => ProcessState::Running,
            2 => ProcessState::Sleeping,
            3 => ProcessState::Stopped,
            4 => ProcessState::Zombie,
            5 => ProcessState::Terminated,
            6 => ProcessState::Killed,
            7 => ProcessState::Timeout,
            8 => ProcessState::MemoryExceeded,
            9 => ProcessState::FileSizeExceeded,
            10 => ProcessState::FdExceeded,
            11 => ProcessState::ProcessExceeded,
            _ => ProcessState::DeniedSyscall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_start_at_terminated() {
        assert!(!ProcessState::Ready.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(!ProcessState::Sleeping.is_terminal());
        assert!(!ProcessState::Stopped.is_terminal());
        assert!(!ProcessState::Zombie.is_terminal());
        assert!(ProcessState::Terminated.is_terminal());
        assert!(ProcessState::Killed.is_terminal());
        assert!(ProcessState::Timeout.is_terminal());
        assert!(ProcessState::MemoryExceeded.is_terminal());
        assert!(ProcessState::FileSizeExceeded.is_terminal());
        assert!(ProcessState::FdExceeded.is_terminal());
        assert!(ProcessState::ProcessExceeded.is_terminal());
        assert!(ProcessState::DeniedSyscall.is_terminal());
    }

    #[test]
    fn ordering_matches_lifecycle() {
        assert!(ProcessState::Ready < ProcessState::Running);
        assert!(ProcessState::Running < ProcessState::Terminated);
        assert!(ProcessState::Stopped < ProcessState::Terminated);
    }

    #[test]
    fn round_trips_through_raw_repr() {
        for raw in 0..=12u8 {
            assert_eq!(ProcessState::from_u8(raw) as u8, raw);
        }
    }
}
