#![forbid(unsafe_code)]

//! Core building blocks shared by latchkey binaries.
//!
//! The unlock hook and the initramfs injector both live on top of this crate:
//! error and logging plumbing, the volume allow-list, the volatile keystore,
//! the newc archive writer, and the `/proc/mounts` parser.

pub mod config;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod mounts;
pub mod newc;

pub use error::{LatchkeyError, LatchkeyResult};
