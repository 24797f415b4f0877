#![forbid(unsafe_code)]

//! LUKS volume discovery and single-passphrase unlock sessions.
//!
//! Integrates with the host via:
//! - `blkid` (candidate enumeration)
//! - `cryptsetup` (header validation, status, open)
//! - an interactive recovery shell for rejected credentials

mod command;

pub mod blkdev;
pub mod console;
pub mod cryptsetup;
pub mod orchestrator;

pub use blkdev::{discover, BlkidCommand, CandidateVolume};
pub use console::{RecoveryConsole, SystemConsole};
pub use cryptsetup::{FailReason, SkipReason, UnlockOutcome, VolumeUnlocker};
pub use orchestrator::{run_session, SessionOptions};
