//! Resource ceilings requested for a subprocess

use serde::{Deserialize, Serialize};

/// Ceilings to enforce on a subprocess. A value of zero means the
/// corresponding resource is left at the OS default.
///
/// Allocated lazily by the first limit setter on a [`Subprocess`] and owned
/// by it for the record's lifetime.
///
/// [`Subprocess`]: crate::Subprocess
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Timeout in seconds enforced by the watchdog
    pub(crate) timeout: u64,
    /// Maximum address-space size in bytes (RLIMIT_AS)
    pub(crate) memory: u64,
    /// Maximum size of any file the child writes, in bytes (RLIMIT_FSIZE)
    pub(crate) fsize: u64,
    /// Maximum number of open file descriptors (RLIMIT_NOFILE)
    pub(crate) fd: u64,
    /// Maximum number of processes (RLIMIT_NPROC)
    pub(crate) proc: u64,
    /// Denied syscall numbers, in insertion order. Duplicates are harmless.
    pub(crate) syscalls: Vec<i64>,
}

impl Limits {
    pub fn new() -> Self {
        Limits::default()
    }

    /// Clamp a caller-supplied limit: anything at or below zero means
    /// "no ceiling".
    pub(crate) fn clamp(value: i64) -> u64 {
        if value > 0 {
            value as u64
        } else {
            0
        }
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub fn fsize(&self) -> u64 {
        self.fsize
    }

    pub fn fd(&self) -> u64 {
        self.fd
    }

    pub fn proc(&self) -> u64 {
        self.proc
    }

    pub fn denied_syscalls(&self) -> &[i64] {
        &self.syscalls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlimited() {
        let limits = Limits::new();
        assert_eq!(limits.timeout(), 0);
        assert_eq!(limits.memory(), 0);
        assert_eq!(limits.fsize(), 0);
        assert_eq!(limits.fd(), 0);
        assert_eq!(limits.proc(), 0);
        assert!(limits.denied_syscalls().is_empty());
    }

    #[test]
    fn non_positive_values_mean_no_ceiling() {
        assert_eq!(Limits::clamp(0), 0);
        assert_eq!(Limits::clamp(-5), 0);
        assert_eq!(Limits::clamp(4096), 4096);
    }
}
