//! Block-device enumeration and LUKS candidate matching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use latchkey_core::{LatchkeyError, LatchkeyResult};

use crate::command::ExternalCommand;

/// Filesystem-type marker `blkid` reports for a LUKS header.
const LUKS_FS_TYPE: &str = "crypto_LUKS";

const DEFAULT_BLKID_PATHS: &[&str] = &[
    "/usr/sbin/blkid",
    "/sbin/blkid",
    "/usr/bin/blkid",
    "/bin/blkid",
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// One discovered LUKS volume, produced fresh on every discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateVolume {
    pub device_path: PathBuf,
    pub uuid: String,
    pub label: Option<String>,
    pub mapping_name: String,
}

/// Wrapper around the host `blkid` binary.
#[derive(Debug, Clone)]
pub struct BlkidCommand {
    command: ExternalCommand,
}

impl BlkidCommand {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            command: ExternalCommand::new(binary, timeout),
        }
    }

    /// Resolve `blkid` from an explicit override, well-known paths, or `PATH`.
    pub fn resolve(override_path: Option<&Path>) -> LatchkeyResult<Self> {
        let binary = resolve_binary(override_path, DEFAULT_BLKID_PATHS, "blkid")?;
        Ok(Self::new(binary, DEFAULT_TIMEOUT))
    }

    /// Run `blkid -o export` and return the raw key/value dump.
    ///
    /// `blkid` exits with status 2 when no devices match; that is an empty
    /// enumeration, not an error.
    fn export(&self) -> LatchkeyResult<String> {
        let out = self.command.run(&["-o", "export"], None)?;
        match out.status {
            0 => Ok(out.stdout),
            2 => Ok(String::new()),
            code => Err(LatchkeyError::Subsystem(format!(
                "blkid -o export exited with code {code}: {}",
                out.diagnostic()
            ))),
        }
    }
}

/// Enumerate LUKS volumes and reduce them to the allow-listed target set.
///
/// An empty `allow_list` selects every LUKS volume found (fallback mode).
/// Device-enumeration order is preserved.
pub fn discover(
    blkid: &BlkidCommand,
    allow_list: &[String],
    list_source: &Path,
) -> LatchkeyResult<Vec<CandidateVolume>> {
    let export = blkid.export()?;
    let all = parse_export(&export);
    Ok(apply_allow_list(all, allow_list, list_source))
}

fn apply_allow_list(
    all: Vec<CandidateVolume>,
    allow_list: &[String],
    list_source: &Path,
) -> Vec<CandidateVolume> {
    if allow_list.is_empty() {
        info!(
            "no allow-list entries; targeting all {} LUKS volume(s) found",
            all.len()
        );
        return all;
    }

    info!(
        "allow-list at {} restricts unlocking to {} volume(s)",
        list_source.display(),
        allow_list.len()
    );
    all.into_iter()
        .filter(|candidate| allow_list.iter().any(|uuid| *uuid == candidate.uuid))
        .collect()
}

/// Derive the mapping name for a volume UUID.
pub fn mapping_name_for(uuid: &str) -> String {
    format!("luks-{uuid}")
}

/// Parse `blkid -o export` output: blank-line-separated KEY=VALUE blocks.
fn parse_export(output: &str) -> Vec<CandidateVolume> {
    let mut candidates = Vec::new();

    for block in output.split("\n\n") {
        let mut devname = None;
        let mut uuid = None;
        let mut label = None;
        let mut fs_type = None;

        for line in block.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "DEVNAME" => devname = Some(value.to_string()),
                "UUID" => uuid = Some(value.to_string()),
                "LABEL" => label = Some(value.to_string()),
                "TYPE" => fs_type = Some(value.to_string()),
                _ => {}
            }
        }

        if fs_type.as_deref() != Some(LUKS_FS_TYPE) {
            continue;
        }
        let (Some(devname), Some(uuid)) = (devname, uuid) else {
            continue;
        };

        candidates.push(CandidateVolume {
            device_path: PathBuf::from(devname),
            mapping_name: mapping_name_for(&uuid),
            uuid,
            label,
        });
    }

    candidates
}

/// Shared binary resolution: explicit override, well-known paths, then `PATH`.
pub(crate) fn resolve_binary(
    override_path: Option<&Path>,
    known_paths: &[&str],
    name: &str,
) -> LatchkeyResult<PathBuf> {
    if let Some(path) = override_path {
        if !path.exists() {
            return Err(LatchkeyError::InvalidConfig(format!(
                "{name} binary not found at {}",
                path.display()
            )));
        }
        return Ok(path.to_path_buf());
    }

    for candidate in known_paths {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }

    find_in_path(name).ok_or_else(|| {
        LatchkeyError::InvalidConfig(format!(
            "unable to locate {name} binary; tried {known_paths:?} and PATH"
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}
