//! Error types for the procbox supervision engine

use thiserror::Error;

/// Errors reported across the public boundary.
///
/// Helper-local failures (a single failed read in the I/O pump, a kill of an
/// already-reaped pid) are logged as warnings and do not surface here; only
/// failures that abort a launch or an operation do.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {0}")]
    Sys(#[from] nix::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Syscall interception is not supported on this platform")]
    UnsupportedPlatform,
}

/// Result type alias for procbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
