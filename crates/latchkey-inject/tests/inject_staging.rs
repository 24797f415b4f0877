//! Injection driven through fake `mount`/`umount` binaries so the staging and
//! swap sequence can run against plain directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tempfile::{tempdir, TempDir};

use latchkey_core::newc;
use latchkey_inject::{inject, BootEntry};

use std::os::unix::fs::PermissionsExt;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvGuard {
    key: &'static str,
    prev: Option<std::ffi::OsString>,
}

impl EnvGuard {
    fn set(key: &'static str, value: impl Into<std::ffi::OsString>) -> Self {
        let prev = std::env::var_os(key);
        std::env::set_var(key, value.into());
        Self { key, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(value) = self.prev.take() {
            std::env::set_var(self.key, value);
        } else {
            std::env::remove_var(self.key);
        }
    }
}

fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

struct Rig {
    tmp: TempDir,
    mount_log: PathBuf,
    umount_log: PathBuf,
}

impl Rig {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();

        let mount_log = tmp.path().join("mount.log");
        let umount_log = tmp.path().join("umount.log");
        write_executable(
            &bin_dir.join("mount"),
            &format!("#!/bin/sh\necho \"$*\" >> \"{}\"\nexit 0\n", mount_log.display()),
        );
        write_executable(
            &bin_dir.join("umount"),
            &format!("#!/bin/sh\necho \"$*\" >> \"{}\"\nexit 0\n", umount_log.display()),
        );

        Self {
            tmp,
            mount_log,
            umount_log,
        }
    }

    fn path_with_fakes(&self) -> String {
        let old = std::env::var_os("PATH").unwrap_or_default();
        format!(
            "{}:{}",
            self.tmp.path().join("bin").display(),
            old.to_string_lossy()
        )
    }

    fn boot_entry(&self) -> BootEntry {
        let mountpoint = self.tmp.path().join("be");
        fs::create_dir_all(mountpoint.join("boot")).unwrap();
        fs::write(mountpoint.join("boot/vmlinuz"), b"kernel-bytes").unwrap();
        // Deliberately unaligned first stage.
        fs::write(mountpoint.join("boot/initramfs.img"), vec![0x42; 1337]).unwrap();

        BootEntry {
            boot_env_id: "zroot/ROOT/default".to_string(),
            kernel: PathBuf::from("/boot/vmlinuz"),
            initramfs: PathBuf::from("/boot/initramfs.img"),
            mountpoint,
        }
    }

    fn keystore(&self, records: &[(&str, &[u8])]) -> PathBuf {
        let dir = self.tmp.path().join("keys");
        fs::create_dir_all(&dir).unwrap();
        for (name, contents) in records {
            fs::write(dir.join(name), contents).unwrap();
        }
        dir
    }
}

#[test]
fn inject_appends_key_segment_and_swaps_mountpoint() {
    let _env = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let rig = Rig::new();
    let _path = EnvGuard::set("PATH", rig.path_with_fakes());
    let staging = rig.tmp.path().join("staging");
    let _staging = EnvGuard::set("LATCHKEY_STAGING", staging.as_os_str().to_owned());

    let entry = rig.boot_entry();
    let keystore = rig.keystore(&[("luks-AAAA.key", b"hunter2")]);
    let expected_archive = newc::archive_directory(&keystore).unwrap();

    inject(&entry, &keystore).unwrap();

    // The patched image is the padded original plus the exact key segment.
    let patched = fs::read(entry.mountpoint.join("boot/initramfs.img")).unwrap();
    assert_eq!(patched.len(), newc::pad_len(1337) + expected_archive.len());
    assert_eq!(&patched[..1337], vec![0x42; 1337].as_slice());
    assert_eq!(&patched[1337..newc::pad_len(1337)], &[0, 0, 0]);
    assert_eq!(&patched[newc::pad_len(1337)..], expected_archive.as_slice());

    // The kernel travels unmodified.
    assert_eq!(
        fs::read(entry.mountpoint.join("boot/vmlinuz")).unwrap(),
        b"kernel-bytes"
    );

    // Staging tmpfs up, boot-entry swap, staging teardown.
    let mounts = fs::read_to_string(&rig.mount_log).unwrap();
    assert!(mounts.contains(&staging.display().to_string()));
    assert!(mounts.contains(&entry.mountpoint.display().to_string()));
    let umounts = fs::read_to_string(&rig.umount_log).unwrap();
    assert!(umounts.contains(&entry.mountpoint.display().to_string()));
    assert!(umounts.contains(&staging.display().to_string()));
}

#[test]
fn inject_with_empty_keystore_is_a_noop() {
    let _env = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let rig = Rig::new();
    let _path = EnvGuard::set("PATH", rig.path_with_fakes());
    let staging = rig.tmp.path().join("staging");
    let _staging = EnvGuard::set("LATCHKEY_STAGING", staging.as_os_str().to_owned());

    let entry = rig.boot_entry();
    let keystore = rig.tmp.path().join("keys-empty");
    fs::create_dir_all(&keystore).unwrap();

    inject(&entry, &keystore).unwrap();

    assert_eq!(
        fs::read(entry.mountpoint.join("boot/initramfs.img")).unwrap(),
        vec![0x42; 1337]
    );
    assert!(!rig.mount_log.exists());
    assert!(!rig.umount_log.exists());
}

#[test]
fn inject_with_missing_keystore_is_a_noop() {
    let _env = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let rig = Rig::new();
    let _path = EnvGuard::set("PATH", rig.path_with_fakes());

    let entry = rig.boot_entry();
    inject(&entry, &rig.tmp.path().join("absent-keystore")).unwrap();

    assert!(!rig.mount_log.exists());
}

#[test]
fn inject_fails_when_initramfs_is_missing() {
    let _env = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let rig = Rig::new();
    let _path = EnvGuard::set("PATH", rig.path_with_fakes());
    let staging = rig.tmp.path().join("staging");
    let _staging = EnvGuard::set("LATCHKEY_STAGING", staging.as_os_str().to_owned());

    let mut entry = rig.boot_entry();
    entry.initramfs = PathBuf::from("/boot/missing.img");
    let keystore = rig.keystore(&[("luks-AAAA.key", b"hunter2")]);

    assert!(inject(&entry, &keystore).is_err());
    // No rollback: the boot-entry mountpoint was never swapped.
    let umounts = fs::read_to_string(&rig.umount_log).unwrap_or_default();
    assert!(!umounts.contains(&entry.mountpoint.display().to_string()));
}
