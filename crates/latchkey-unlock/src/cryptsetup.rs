//! Single-attempt LUKS unlock with precondition checks.
//!
//! Validation short-circuits on the first failure: device existence, LUKS
//! header, live-mapping idempotence, then one `cryptsetup open` attempt.
//! Retry policy belongs to the orchestrator via the recovery console.

use std::env;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};

use latchkey_core::{mounts, LatchkeyResult};

use crate::blkdev::resolve_binary;
use crate::command::ExternalCommand;
use crate::console::RecoveryConsole;

const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];

/// Unlocking can legitimately take a while (memory-hard KDF benchmarks).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Override for the `/dev/mapper` root so tests can fake live mappings.
pub const MAPPER_ROOT_ENV: &str = "LATCHKEY_MAPPER_ROOT";

/// When set, regular files are accepted as devices (loopback-style tests).
pub const FILE_DEVICES_ENV: &str = "LATCHKEY_ALLOW_FILE_DEVICES";

/// Outcome of one unlock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    Skipped(SkipReason),
    Failed(FailReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path does not resolve to a block device.
    NoSuchDevice,
    /// The device carries no LUKS header.
    NotEncrypted,
    /// A live mapping already exists under this name.
    AlreadyMapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// cryptsetup rejected the passphrase or hit a fatal error class.
    UnlockRejected,
    /// Any other nonzero exit status.
    Other,
}

/// Wrapper around the host `cryptsetup` binary for single unlock attempts.
#[derive(Debug, Clone)]
pub struct VolumeUnlocker {
    cryptsetup: ExternalCommand,
}

impl VolumeUnlocker {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            cryptsetup: ExternalCommand::new(binary, timeout),
        }
    }

    /// Resolve `cryptsetup` from an explicit override, well-known paths, or `PATH`.
    pub fn resolve(override_path: Option<&Path>) -> LatchkeyResult<Self> {
        let binary = resolve_binary(override_path, DEFAULT_CRYPTSETUP_PATHS, "cryptsetup")?;
        Ok(Self::new(binary, DEFAULT_TIMEOUT))
    }

    /// Attempt to unlock `device_path` under `mapping_name` with `passphrase`.
    ///
    /// On the wrong-passphrase/fatal class the recovery console is invoked
    /// synchronously before `Failed(UnlockRejected)` is returned; the caller
    /// resumes with the next volume. No retries happen here.
    pub fn unlock(
        &self,
        console: &dyn RecoveryConsole,
        device_path: &Path,
        mapping_name: &str,
        passphrase: &[u8],
    ) -> LatchkeyResult<UnlockOutcome> {
        if !is_block_device(device_path) {
            warn!(
                "skipping {}: not a block device",
                device_path.display()
            );
            return Ok(UnlockOutcome::Skipped(SkipReason::NoSuchDevice));
        }

        if !self.is_luks(device_path)? {
            warn!(
                "skipping {}: no LUKS header present",
                device_path.display()
            );
            return Ok(UnlockOutcome::Skipped(SkipReason::NotEncrypted));
        }

        if self.mapping_active(mapping_name)? {
            warn!("skipping {}: mapping `{mapping_name}` already active", device_path.display());
            return Ok(UnlockOutcome::Skipped(SkipReason::AlreadyMapped));
        }

        let device = device_path.to_string_lossy();
        let primary_args = [
            "open",
            "--type",
            "luks",
            "--batch-mode",
            "--key-file",
            "-",
            device.as_ref(),
            mapping_name,
        ];
        let mut out = self.cryptsetup.run(&primary_args, Some(passphrase))?;

        if out.status != 0 && action_unsupported(&out.diagnostic()) {
            let fallback_args = [
                "luksOpen",
                "--batch-mode",
                "--key-file",
                "-",
                device.as_ref(),
                mapping_name,
            ];
            out = self.cryptsetup.run(&fallback_args, Some(passphrase))?;
        }

        match out.status {
            0 => {
                self.log_mapping_diagnostics(mapping_name);
                Ok(UnlockOutcome::Unlocked)
            }
            // 1 = wrong parameters / fatal error, 2 = no permission (bad passphrase)
            1 | 2 => {
                warn!(
                    "cryptsetup rejected unlock of `{mapping_name}` from {} (exit {}): {}",
                    device_path.display(),
                    out.status,
                    out.diagnostic()
                );
                console.invoke(&format!(
                    "unlock of `{mapping_name}` from {} was rejected",
                    device_path.display()
                ))?;
                Ok(UnlockOutcome::Failed(FailReason::UnlockRejected))
            }
            code => {
                warn!(
                    "cryptsetup failed to unlock `{mapping_name}` from {} (exit {code}): {}",
                    device_path.display(),
                    out.diagnostic()
                );
                Ok(UnlockOutcome::Failed(FailReason::Other))
            }
        }
    }

    /// Whether the device carries a valid LUKS header.
    fn is_luks(&self, device_path: &Path) -> LatchkeyResult<bool> {
        let device = device_path.to_string_lossy();
        let out = self.cryptsetup.run(&["isLuks", device.as_ref()], None)?;
        Ok(out.status == 0)
    }

    /// Whether a live mapping already exists under `mapping_name`.
    ///
    /// The mapper node check answers without spawning a process; `status` is
    /// the fallback when udev has not created the node.
    fn mapping_active(&self, mapping_name: &str) -> LatchkeyResult<bool> {
        if mapper_node_exists(mapping_name) {
            return Ok(true);
        }
        let out = self.cryptsetup.run(&["status", mapping_name], None)?;
        Ok(out.status == 0)
    }

    /// Record post-unlock state at debug level: mapping status plus any mount.
    fn log_mapping_diagnostics(&self, mapping_name: &str) {
        match self.cryptsetup.run(&["status", mapping_name], None) {
            Ok(out) => debug!(
                "mapping `{mapping_name}` status (exit {}): {}",
                out.status,
                out.stdout.trim()
            ),
            Err(err) => debug!("status query for `{mapping_name}` failed: {err}"),
        }

        let node = mapper_root().join(mapping_name);
        match mounts::find_mount_point(&node) {
            Ok(Some(mountpoint)) => debug!(
                "mapping `{mapping_name}` is mounted at {}",
                mountpoint.display()
            ),
            Ok(None) => debug!("mapping `{mapping_name}` is not mounted yet"),
            Err(err) => debug!("mount lookup for `{mapping_name}` failed: {err}"),
        }
    }
}

fn mapper_root() -> PathBuf {
    env::var_os(MAPPER_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/dev/mapper"))
}

fn mapper_node_exists(name: &str) -> bool {
    let root = mapper_root();
    root.is_dir() && root.join(name).exists()
}

fn is_block_device(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if meta.file_type().is_block_device() {
        return true;
    }
    meta.is_file() && env::var_os(FILE_DEVICES_ENV).is_some()
}

fn action_unsupported(diagnostic: &str) -> bool {
    let lower = diagnostic.to_ascii_lowercase();
    lower.contains("unknown action")
        || lower.contains("unknown command")
        || lower.contains("invalid action")
        || lower.contains("invalid command")
        || lower.contains("unknown option")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_unsupported_matches_legacy_binaries() {
        assert!(action_unsupported("Unknown action open"));
        assert!(action_unsupported("invalid command"));
        assert!(!action_unsupported("No key available with this passphrase."));
    }

    #[test]
    fn missing_path_is_not_a_block_device() {
        assert!(!is_block_device(Path::new("/definitely/not/here")));
    }
}
