//! Boot-entry injector: runs after the boot manager has selected an entry and
//! before control is handed to it.
//!
//! Exits 0 when there is nothing to do (no selection, empty keystore); any
//! injection failure is fatal and surfaces as a failed boot selection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use latchkey_core::{keystore, logging};
use latchkey_inject::{inject, BootEntry};

/// Command-line options for the injector.
#[derive(Parser, Debug)]
#[command(
    name = "latchkey-inject",
    version,
    about = "Append recorded key material to the selected boot entry's initramfs."
)]
struct Args {
    /// Keystore directory holding the key records to inject.
    #[arg(long)]
    keystore: Option<PathBuf>,
}

fn main() {
    logging::init("info");
    if let Err(err) = run() {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let keystore_dir = args.keystore.unwrap_or_else(keystore::keystore_root);

    let Some(entry) = BootEntry::from_env() else {
        info!("no boot entry selected; skipping injection");
        return Ok(());
    };

    inject(&entry, &keystore_dir).with_context(|| {
        format!(
            "failed to inject keystore {} into boot entry `{}`",
            keystore_dir.display(),
            entry.boot_env_id
        )
    })
}
