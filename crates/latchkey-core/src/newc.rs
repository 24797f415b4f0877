//! Writer for newc ("070701") cpio archives and the dual-segment append rule.
//!
//! The injector relies on a binary-format contract understood by initramfs
//! unpackers: the original image is zero-padded to a 4-byte boundary and a
//! second newc segment is concatenated directly after it. Unpackers that walk
//! concatenated segments extract both into the same root, the second segment
//! overlaying the first on path collision. Keep the padding and header layout
//! exact.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LatchkeyError, LatchkeyResult};

const MAGIC: &[u8] = b"070701";
const TRAILER: &str = "TRAILER!!!";
const HEADER_LEN: usize = 110;

/// Mode written for every archived key record (regular file, owner rw).
const MEMBER_MODE: u32 = 0o100_600;

/// One regular file destined for the appended archive segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the archived directory, `/`-separated.
    pub name: String,
    /// Absolute path of the source file.
    pub source: PathBuf,
}

/// Round `len` up to the next 4-byte boundary.
pub fn pad_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Append `archive` to `image` after zero-padding `image` to a 4-byte boundary.
pub fn append_segment(image: &mut Vec<u8>, archive: &[u8]) {
    image.resize(pad_len(image.len()), 0);
    image.extend_from_slice(archive);
}

/// Collect every regular file under `root`, recursively.
///
/// A missing `root` yields an empty list. Entries are sorted by relative path
/// so archive output is deterministic.
pub fn directory_entries(root: &Path) -> LatchkeyResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    if !root.is_dir() {
        return Ok(entries);
    }
    walk(root, root, &mut entries)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<ArchiveEntry>) -> LatchkeyResult<()> {
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        let file_type = item.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, entries)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| LatchkeyError::InvalidArchiveMember {
                    name: path.clone(),
                    reason: "escapes the archived directory".into(),
                })?;
            let name = relative.to_str().ok_or_else(|| LatchkeyError::InvalidArchiveMember {
                name: path.clone(),
                reason: "non-UTF-8 member path".into(),
            })?;
            entries.push(ArchiveEntry {
                name: name.to_string(),
                source: path,
            });
        }
        // Symlinks and special files never belong in the key segment.
    }
    Ok(())
}

/// Build a newc archive from `entries`, reading each source file.
pub fn build_archive(entries: &[ArchiveEntry]) -> LatchkeyResult<Vec<u8>> {
    let mut writer = NewcWriter::new();
    for entry in entries {
        let data = fs::read(&entry.source)?;
        writer.push_file(&entry.name, &data);
    }
    Ok(writer.finish())
}

/// Archive every regular file under `root` (relative paths preserved).
pub fn archive_directory(root: &Path) -> LatchkeyResult<Vec<u8>> {
    build_archive(&directory_entries(root)?)
}

/// Incremental newc archive writer with deterministic metadata.
///
/// uid/gid are 0, mtime is 0, and inode numbers are assigned sequentially, so
/// identical input always produces identical bytes.
pub struct NewcWriter {
    buf: Vec<u8>,
    next_ino: u32,
}

impl NewcWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            next_ino: 1,
        }
    }

    /// Append one regular-file member.
    pub fn push_file(&mut self, name: &str, data: &[u8]) {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.push_entry(ino, MEMBER_MODE, 1, data.len() as u32, name);
        self.buf.extend_from_slice(data);
        self.pad_to_boundary();
    }

    /// Terminate the archive and return its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.push_entry(0, 0, 1, 0, TRAILER);
        self.buf
    }

    fn push_entry(&mut self, ino: u32, mode: u32, nlink: u32, filesize: u32, name: &str) {
        // namesize counts the terminating NUL.
        let namesize = name.len() as u32 + 1;

        // Field order: ino, mode, uid, gid, nlink, mtime, filesize,
        // devmajor, devminor, rdevmajor, rdevminor, namesize, check.
        self.buf.extend_from_slice(MAGIC);
        for field in [ino, mode, 0, 0, nlink, 0, filesize, 0, 0, 0, 0, namesize, 0] {
            self.push_hex(field);
        }
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        self.pad_to_boundary();
    }

    fn push_hex(&mut self, value: u32) {
        let rendered = format!("{value:08X}");
        self.buf.extend_from_slice(rendered.as_bytes());
    }

    fn pad_to_boundary(&mut self) {
        self.buf.resize(pad_len(self.buf.len()), 0);
    }
}

impl Default for NewcWriter {
    fn default() -> Self {
        Self::new()
    }
}
