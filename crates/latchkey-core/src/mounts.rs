//! `/proc/mounts` lookup used for post-unlock diagnostics.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LatchkeyResult;

pub const MOUNTS_OVERRIDE_ENV: &str = "LATCHKEY_MOUNTS_PATH";

/// Return the mountpoint of `devnode`, if it is currently mounted.
pub fn find_mount_point(devnode: &Path) -> LatchkeyResult<Option<PathBuf>> {
    let mounts = read_mount_table()?;
    let devnode_str = devnode.to_string_lossy();
    Ok(parse_mounts(&mounts, devnode_str.as_ref()))
}

fn read_mount_table() -> LatchkeyResult<String> {
    if let Some(path) = env::var_os(MOUNTS_OVERRIDE_ENV) {
        return Ok(fs::read_to_string(path)?);
    }
    Ok(fs::read_to_string("/proc/mounts")?)
}

fn parse_mounts(mounts: &str, devnode: &str) -> Option<PathBuf> {
    for line in mounts.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let device = parts.next()?;
        let mountpoint = parts.next()?;
        if device == devnode {
            return Some(PathBuf::from(unescape_mount_field(mountpoint)));
        }
    }
    None
}

/// Decode the octal escapes `/proc/mounts` uses for spaces and friends.
fn unescape_mount_field(input: &str) -> String {
    let mut chars = input.chars().peekable();
    let mut output = String::with_capacity(input.len());

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let mut oct = String::new();
            for _ in 0..3 {
                if let Some(next) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                }
                if let Some(next) = chars.next() {
                    oct.push(next);
                }
            }
            if oct.len() == 3 {
                if let Ok(value) = u8::from_str_radix(&oct, 8) {
                    output.push(value as char);
                    continue;
                }
            }
            output.push('\\');
            output.push_str(&oct);
        } else {
            output.push(ch);
        }
    }

    output
}
