#![forbid(unsafe_code)]

//! Boot-image injection: patch the selected boot entry's initramfs with the
//! keystore contents and swap the live boot-entry mountpoint to the patched
//! copies.

pub mod bootenv;
pub mod inject;

pub use bootenv::BootEntry;
pub use inject::inject;
