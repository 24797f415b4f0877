//! Boot-entry selection contract with the external boot manager.
//!
//! The boot manager exports four variables naming the selected boot
//! environment; injection is skipped entirely when any of them is unset.

use std::env;
use std::path::PathBuf;

pub const SELECTED_BE_ENV: &str = "LATCHKEY_SELECTED_BE";
pub const SELECTED_KERNEL_ENV: &str = "LATCHKEY_SELECTED_KERNEL";
pub const SELECTED_INITRAMFS_ENV: &str = "LATCHKEY_SELECTED_INITRAMFS";
pub const SELECTED_MOUNTPOINT_ENV: &str = "LATCHKEY_SELECTED_MOUNTPOINT";

/// Immutable description of the selected boot entry for one injector run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub boot_env_id: String,
    /// Kernel path relative to the boot-entry mountpoint.
    pub kernel: PathBuf,
    /// Initramfs path relative to the boot-entry mountpoint.
    pub initramfs: PathBuf,
    pub mountpoint: PathBuf,
}

impl BootEntry {
    /// Read the selection from the environment.
    ///
    /// Returns `None` when any of the four variables is unset or empty,
    /// meaning nothing has been selected yet.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            boot_env_id: non_empty(SELECTED_BE_ENV)?,
            kernel: PathBuf::from(non_empty(SELECTED_KERNEL_ENV)?),
            initramfs: PathBuf::from(non_empty(SELECTED_INITRAMFS_ENV)?),
            mountpoint: PathBuf::from(non_empty(SELECTED_MOUNTPOINT_ENV)?),
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
