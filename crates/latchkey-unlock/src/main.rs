//! Early-boot LUKS unlock hook.
//!
//! Exit codes: 0 when an unlock sequence was attempted (irrespective of
//! per-volume success), 1 when no candidate volumes were found so the caller
//! falls through to default startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use zeroize::Zeroizing;

use latchkey_core::{config, keystore, logging};
use latchkey_unlock::{
    orchestrator::{run_session, SessionOptions},
    BlkidCommand, SystemConsole, VolumeUnlocker,
};

/// Command-line options for the unlock hook.
#[derive(Parser, Debug)]
#[command(
    name = "latchkey-unlock",
    version,
    about = "Unlock LUKS volumes under a single passphrase before boot-entry selection."
)]
struct Args {
    /// Path to the volume allow-list (one UUID per line).
    #[arg(long)]
    allow_list: Option<PathBuf>,

    /// Keystore directory receiving one key record per mapping.
    #[arg(long)]
    keystore: Option<PathBuf>,

    /// Supply the session passphrase non-interactively.
    #[arg(long)]
    passphrase: Option<String>,

    /// Explicit path to the cryptsetup binary.
    #[arg(long)]
    cryptsetup_path: Option<PathBuf>,

    /// Explicit path to the blkid binary.
    #[arg(long)]
    blkid_path: Option<PathBuf>,
}

fn main() {
    logging::init("info");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{err:?}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = Args::parse();

    let blkid = BlkidCommand::resolve(args.blkid_path.as_deref())
        .context("unable to resolve blkid")?;
    let unlocker = VolumeUnlocker::resolve(args.cryptsetup_path.as_deref())
        .context("unable to resolve cryptsetup")?;
    let console = SystemConsole::new();

    let options = SessionOptions {
        allow_list_path: args.allow_list.unwrap_or_else(config::allow_list_path),
        keystore_dir: args.keystore.unwrap_or_else(keystore::keystore_root),
        passphrase: args.passphrase.map(Zeroizing::new),
    };

    let code = run_session(&blkid, &unlocker, &console, options)?;
    Ok(code)
}
