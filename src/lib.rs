//! Procbox: process sandboxing and resource supervision
//!
//! Launches a child command under hard ceilings on wall-clock time, address
//! space, output-file size, open descriptors, process count and the set of
//! syscalls it may invoke, while capturing its standard streams and,
//! optionally, a post-mortem resource-usage profile.
//!
//! Linux only: supervision is built on fork/exec, rlimits, SIGCHLD timing
//! and ptrace syscall stepping.

pub mod error;
pub mod limits;
pub mod profile;
pub mod state;
pub mod subprocess;

mod filter;
mod iopump;
mod monitor;
mod rlimits;
mod watchdog;

pub use error::{Result, SandboxError};
pub use limits::Limits;
pub use profile::Profile;
pub use state::ProcessState;
pub use subprocess::Subprocess;

// Signal numbers accepted by Subprocess::signal.
pub use nix::sys::signal::Signal;
