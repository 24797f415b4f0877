//! Initramfs patching: stage, append the key segment, swap the mountpoint.
//!
//! The unmount/remount swap is a critical section: nothing else may touch the
//! boot-entry mountpoint between the unmount and the final copy. On failure no
//! rollback is attempted; the caller treats a partially-swapped entry as a
//! fatal boot-selection error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use latchkey_core::{newc, LatchkeyError, LatchkeyResult};

use crate::bootenv::BootEntry;

pub const DEFAULT_STAGING_ROOT: &str = "/run/latchkey.staging";
pub const STAGING_ENV: &str = "LATCHKEY_STAGING";

/// Resolve the scratch staging directory from the environment or the default.
pub fn staging_root() -> PathBuf {
    env::var_os(STAGING_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_ROOT))
}

/// Patch the selected boot entry with the keystore contents.
///
/// No-op when the keystore holds no records. Otherwise: stage kernel and
/// initramfs on a fresh tmpfs, append the newc key segment to the staged
/// initramfs, then unmount the boot-entry mountpoint, remount it as tmpfs,
/// and copy the patched pair back to their original relative paths.
pub fn inject(entry: &BootEntry, keystore_dir: &Path) -> LatchkeyResult<()> {
    let records = newc::directory_entries(keystore_dir)?;
    if records.is_empty() {
        info!(
            "keystore at {} is empty; nothing to inject",
            keystore_dir.display()
        );
        return Ok(());
    }
    let archive = newc::build_archive(&records)?;

    let staging = staging_root();
    fs::create_dir_all(&staging)?;
    mount_tmpfs(&staging)?;

    let kernel_src = resolve_in_mountpoint(&entry.mountpoint, &entry.kernel);
    let initramfs_src = resolve_in_mountpoint(&entry.mountpoint, &entry.initramfs);

    let staged_kernel = staging.join("kernel");
    let staged_initramfs = staging.join("initramfs");
    fs::copy(&kernel_src, &staged_kernel)?;

    let mut image = fs::read(&initramfs_src)?;
    let original_len = image.len();
    newc::append_segment(&mut image, &archive);
    fs::write(&staged_initramfs, &image)?;

    info!(
        "appended {} key record(s) to {} ({} -> {} bytes)",
        records.len(),
        entry.initramfs.display(),
        original_len,
        image.len()
    );

    // Critical section: swap the live boot-entry mountpoint.
    unmount(&entry.mountpoint)?;
    mount_tmpfs(&entry.mountpoint)?;

    let kernel_dest = resolve_in_mountpoint(&entry.mountpoint, &entry.kernel);
    let initramfs_dest = resolve_in_mountpoint(&entry.mountpoint, &entry.initramfs);
    for dest in [&kernel_dest, &initramfs_dest] {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::copy(&staged_kernel, &kernel_dest)?;
    fs::copy(&staged_initramfs, &initramfs_dest)?;

    debug!(
        "boot entry `{}` now serves patched images from {}",
        entry.boot_env_id,
        entry.mountpoint.display()
    );

    unmount(&staging)?;
    let _ = fs::remove_dir(&staging);
    Ok(())
}

/// Join a boot-entry-relative path onto the mountpoint.
fn resolve_in_mountpoint(mountpoint: &Path, path: &Path) -> PathBuf {
    let relative = path.strip_prefix("/").unwrap_or(path);
    mountpoint.join(relative)
}

fn mount_tmpfs(target: &Path) -> LatchkeyResult<()> {
    let status = Command::new("mount")
        .args(["-t", "tmpfs", "tmpfs"])
        .arg(target)
        .status()?;
    if !status.success() {
        return Err(LatchkeyError::Subsystem(format!(
            "mount -t tmpfs {} exited with status {:?}",
            target.display(),
            status.code()
        )));
    }
    Ok(())
}

fn unmount(target: &Path) -> LatchkeyResult<()> {
    let status = Command::new("umount").arg(target).status()?;
    if !status.success() {
        return Err(LatchkeyError::Subsystem(format!(
            "umount {} exited with status {:?}",
            target.display(),
            status.code()
        )));
    }
    Ok(())
}
