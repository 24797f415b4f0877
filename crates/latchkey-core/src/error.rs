//! Error taxonomy shared across the latchkey crates.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type LatchkeyResult<T> = Result<T, LatchkeyError>;

#[derive(Debug, Error)]
pub enum LatchkeyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by an external subsystem (cryptsetup, blkid, mount).
    #[error("{0}")]
    Subsystem(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid archive member `{}`: {reason}", name.display())]
    InvalidArchiveMember { name: PathBuf, reason: String },
}
