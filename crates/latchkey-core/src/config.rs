//! Volume allow-list configuration.
//!
//! The allow-list names the LUKS volumes (by UUID) the unlock hook should
//! target. An absent, unreadable, or empty file selects fallback mode: unlock
//! every LUKS volume found.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::LatchkeyResult;

pub const DEFAULT_ALLOW_LIST_PATH: &str = "/etc/latchkey/volumes";
pub const ALLOW_LIST_ENV: &str = "LATCHKEY_ALLOW_LIST";

/// Resolve the allow-list path from the environment or the default location.
pub fn allow_list_path() -> PathBuf {
    env::var_os(ALLOW_LIST_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ALLOW_LIST_PATH))
}

/// Load the allow-list from `path`.
///
/// One volume UUID per line; blank lines and lines whose first non-whitespace
/// character is `#` are ignored. A missing or unreadable file is treated as an
/// empty list.
pub fn load_allow_list(path: &Path) -> LatchkeyResult<Vec<String>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            warn!(
                "allow-list at {} is unreadable ({err}); falling back to empty list",
                path.display()
            );
            return Ok(Vec::new());
        }
    };

    Ok(parse_allow_list(&contents))
}

/// Parse allow-list contents, preserving line order.
pub fn parse_allow_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
