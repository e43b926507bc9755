// src/error.rs

//! Error types for tinyprov
//!
//! Fatal errors abort the orchestration run and map to a process exit code.
//! `TransientFetch` never leaves the resolver: exhausting every attempt is
//! what turns into `PackageUnavailable`.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Package '{name}' is unavailable: managed install and every mirror failed")]
    PackageUnavailable { name: String },

    #[error("No writable storage found: no mounted or mountable device can hold the persistent store")]
    NoWritableStorage,

    #[error("Insufficient space on persistent store: {available_kb} KB free, {required_kb} KB required")]
    InsufficientSpace { available_kb: u64, required_kb: u64 },

    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Mount error: {0}")]
    MountError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PackageUnavailable { .. } => 2,
            Self::NoWritableStorage => 3,
            Self::InsufficientSpace { .. } => 4,
            _ => 1,
        }
    }
}
