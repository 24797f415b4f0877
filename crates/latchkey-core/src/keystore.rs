//! Volatile keystore: one passphrase record per LUKS mapping.
//!
//! Records live under a memory-backed directory for the duration of one boot
//! session. The record content is the raw passphrase bytes; confidentiality
//! relies on the backing filesystem never touching persistent storage.

use std::env;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{LatchkeyError, LatchkeyResult};

pub const DEFAULT_KEYSTORE_ROOT: &str = "/run/latchkey.keys";
pub const KEYSTORE_ENV: &str = "LATCHKEY_KEYSTORE";

const RECORD_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// Resolve the keystore directory from the environment or the default location.
pub fn keystore_root() -> PathBuf {
    env::var_os(KEYSTORE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYSTORE_ROOT))
}

/// Write (or overwrite) the key record for `mapping_name`.
///
/// The passphrase is written verbatim with no trailing newline, via a
/// temp-file rename so readers never observe a partial record. The record mode
/// is restricted to owner read/write.
pub fn record(keystore_dir: &Path, mapping_name: &str, passphrase: &[u8]) -> LatchkeyResult<()> {
    if mapping_name.is_empty() || mapping_name.contains('/') {
        return Err(LatchkeyError::InvalidConfig(format!(
            "mapping name `{mapping_name}` is not a valid record name"
        )));
    }

    fs::create_dir_all(keystore_dir)?;
    fs::set_permissions(keystore_dir, fs::Permissions::from_mode(DIR_MODE))?;

    let dest = record_path(keystore_dir, mapping_name);
    let mut temp = NamedTempFile::new_in(keystore_dir)?;
    temp.as_file_mut().write_all(passphrase)?;
    temp.as_file_mut().flush()?;
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(RECORD_MODE))?;
    temp.persist(&dest).map_err(|err| LatchkeyError::Io(err.error))?;

    debug!("recorded key material for mapping `{mapping_name}`");
    Ok(())
}

/// Path of the record file for `mapping_name`.
pub fn record_path(keystore_dir: &Path, mapping_name: &str) -> PathBuf {
    keystore_dir.join(format!("{mapping_name}.key"))
}
