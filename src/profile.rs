//! Post-mortem resource-usage profile of a finished subprocess

use serde::{Deserialize, Serialize};

/// Timing and memory measurements for a completed child.
///
/// All fields stay zero until the child has fully terminated. Collected only
/// when profiling was requested before launch, since it touches the monotonic
/// clock and the kernel's per-child rusage accounting.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Wall-clock time from fork to termination, in microseconds
    pub real_time_us: u64,
    /// Time spent in user land by the child and its descendants, in microseconds
    pub user_time_us: u64,
    /// Time spent in kernel land by the child and its descendants, in microseconds
    pub sys_time_us: u64,
    /// Peak resident set size, in kilobytes
    pub memory_kb: u64,
}

impl Profile {
    pub(crate) fn from_rusage(wall_us: u64, usage: &libc::rusage) -> Profile {
        Profile {
            real_time_us: wall_us,
            user_time_us: usage.ru_utime.tv_sec as u64 * 1_000_000
                + usage.ru_utime.tv_usec as u64,
            sys_time_us: usage.ru_stime.tv_sec as u64 * 1_000_000
                + usage.ru_stime.tv_usec as u64,
            memory_kb: usage.ru_maxrss as u64,
        }
    }
}
