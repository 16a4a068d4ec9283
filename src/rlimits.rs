//! OS resource-limit installation, executed in the child between fork and exec

use nix::errno::Errno;
use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::limits::Limits;

/// Flattened copy of the rlimit ceilings, taken before fork so the child
/// branch never reads through the parent's heap structures.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RlimitSpec {
    memory: u64,
    fsize: u64,
    fd: u64,
    proc: u64,
}

impl RlimitSpec {
    pub(crate) fn from_limits(limits: &Limits) -> RlimitSpec {
        RlimitSpec {
            memory: limits.memory(),
            fsize: limits.fsize(),
            fd: limits.fd(),
            proc: limits.proc(),
        }
    }

    /// Install the configured ceilings on the calling process.
    ///
    /// Runs in the child after fork and before exec, so it must not allocate:
    /// the parent may have been mid-allocation when fork duplicated the heap.
    /// For each ceiling greater than zero the current limit is read and only
    /// the soft value overwritten; the hard limit stays as inherited. The
    /// first failure aborts the whole installation.
    pub(crate) fn apply(&self) -> Result<(), Errno> {
        let entries = [
            (Resource::RLIMIT_AS, self.memory),
            (Resource::RLIMIT_FSIZE, self.fsize),
            (Resource::RLIMIT_NOFILE, self.fd),
            (Resource::RLIMIT_NPROC, self.proc),
        ];

        for (resource, ceiling) in entries {
            if ceiling == 0 {
                continue;
            }
            let (_soft, hard) = getrlimit(resource)?;
            setrlimit(resource, ceiling, hard)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_touches_nothing() {
        // All ceilings zero: apply must succeed without altering any limit.
        let before = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        RlimitSpec::default().apply().unwrap();
        let after = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn spec_copies_limit_values() {
        let mut limits = Limits::new();
        limits.memory = 64 * 1024 * 1024;
        limits.fd = 32;
        let spec = RlimitSpec::from_limits(&limits);
        assert_eq!(spec.memory, 64 * 1024 * 1024);
        assert_eq!(spec.fsize, 0);
        assert_eq!(spec.fd, 32);
        assert_eq!(spec.proc, 0);
    }
}
