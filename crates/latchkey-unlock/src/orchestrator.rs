//! Interactive unlock session: one passphrase, best-effort batch.

use std::path::PathBuf;

use log::{info, warn};
use rpassword::prompt_password;
use zeroize::Zeroizing;

use latchkey_core::{config, keystore, LatchkeyResult};

use crate::blkdev::{discover, BlkidCommand};
use crate::console::RecoveryConsole;
use crate::cryptsetup::{UnlockOutcome, VolumeUnlocker};

/// At least one unlock was attempted.
pub const EXIT_ATTEMPTED: i32 = 0;
/// No candidate volumes; the caller proceeds with ordinary startup.
pub const EXIT_NOTHING_TO_DO: i32 = 1;

/// Inputs for one unlock session.
///
/// The session passphrase and allow-list are explicit parameters rather than
/// ambient state so the matcher and unlocker stay independently testable.
#[derive(Debug)]
pub struct SessionOptions {
    pub allow_list_path: PathBuf,
    pub keystore_dir: PathBuf,
    /// Pre-supplied passphrase; when `None` the operator is prompted once.
    pub passphrase: Option<Zeroizing<String>>,
}

/// Drive a full unlock session and return the process exit code.
///
/// Per-volume failures never abort the batch: a rejected credential routes
/// through the recovery console and the loop continues. A key record is
/// written for every candidate regardless of outcome so a later boot stage
/// can retry with the same credential without re-prompting.
pub fn run_session(
    blkid: &BlkidCommand,
    unlocker: &VolumeUnlocker,
    console: &dyn RecoveryConsole,
    options: SessionOptions,
) -> LatchkeyResult<i32> {
    let allow_list = config::load_allow_list(&options.allow_list_path)?;
    let candidates = discover(blkid, &allow_list, &options.allow_list_path)?;

    if candidates.is_empty() {
        info!("no LUKS volumes to unlock; continuing with ordinary startup");
        return Ok(EXIT_NOTHING_TO_DO);
    }

    // Show the operator what the single passphrase will be applied to.
    println!("Encrypted volumes detected:");
    for candidate in &candidates {
        println!(
            "  {:<20} UUID={} label={}",
            candidate.device_path.display(),
            candidate.uuid,
            candidate.label.as_deref().unwrap_or("-")
        );
    }

    let passphrase = match options.passphrase {
        Some(value) => value,
        None => Zeroizing::new(prompt_password("Passphrase: ")?),
    };

    for candidate in &candidates {
        let outcome = unlocker.unlock(
            console,
            &candidate.device_path,
            &candidate.mapping_name,
            passphrase.as_bytes(),
        )?;

        match &outcome {
            UnlockOutcome::Unlocked => {
                info!(
                    "unlocked {} as `{}`",
                    candidate.device_path.display(),
                    candidate.mapping_name
                );
            }
            UnlockOutcome::Skipped(reason) => {
                info!(
                    "skipped {} (`{}`): {reason:?}",
                    candidate.device_path.display(),
                    candidate.mapping_name
                );
            }
            UnlockOutcome::Failed(reason) => {
                warn!(
                    "unlock of {} (`{}`) failed: {reason:?}",
                    candidate.device_path.display(),
                    candidate.mapping_name
                );
            }
        }

        // Deliberate always-record policy: even failed or skipped volumes get
        // a record so downstream retry does not have to re-prompt.
        keystore::record(
            &options.keystore_dir,
            &candidate.mapping_name,
            passphrase.as_bytes(),
        )?;
    }

    Ok(EXIT_ATTEMPTED)
}
