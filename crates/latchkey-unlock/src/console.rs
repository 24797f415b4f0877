//! Operator-facing recovery console invoked on rejected credentials.
//!
//! The console is a synchronous collaborator: it blocks the unlock batch
//! until the operator exits the shell, then the caller resumes with the next
//! volume. There is deliberately no timeout.

use std::path::PathBuf;
use std::process::Command;

use log::warn;

use latchkey_core::{LatchkeyError, LatchkeyResult};

/// Synchronous escape hatch for manual intervention.
pub trait RecoveryConsole {
    /// Block until the operator exits the console.
    fn invoke(&self, reason: &str) -> LatchkeyResult<()>;
}

/// Spawns an interactive shell with inherited stdio.
#[derive(Debug, Clone)]
pub struct SystemConsole {
    shell: PathBuf,
}

impl SystemConsole {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }

    pub fn with_shell(shell: PathBuf) -> Self {
        Self { shell }
    }
}

impl Default for SystemConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryConsole for SystemConsole {
    fn invoke(&self, reason: &str) -> LatchkeyResult<()> {
        warn!("entering recovery console: {reason}");
        eprintln!();
        eprintln!("*** RECOVERY CONSOLE ***");
        eprintln!("{reason}");
        eprintln!("Exit the shell to continue with the remaining volumes.");

        let status = Command::new(&self.shell).status().map_err(|err| {
            LatchkeyError::Subsystem(format!(
                "failed to spawn recovery shell {}: {err}",
                self.shell.display()
            ))
        })?;

        warn!(
            "recovery console exited with status {:?}; resuming unlock batch",
            status.code()
        );
        Ok(())
    }
}
