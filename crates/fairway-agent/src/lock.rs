//! Screen locking seam.
//!
//! How a bay actually locks its screen is OS territory, not session logic.
//! The client only knows the [`ScreenLocker`] trait; the binary picks an
//! implementation.

use std::io;
use std::process::Command;

use tracing::info;

/// Something that can lock the bay's screen.
pub trait ScreenLocker: Send + Sync {
    /// Locks the screen now.
    fn lock_screen(&self) -> io::Result<()>;
}

/// Locks the screen by running an external command.
pub struct CommandLocker {
    program: String,
    args: Vec<String>,
}

impl CommandLocker {
    /// Creates a locker for an arbitrary command.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The conventional lock command for the running platform.
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        {
            Self::new(
                "rundll32.exe",
                vec!["user32.dll,LockWorkStation".to_string()],
            )
        }
        #[cfg(not(windows))]
        {
            Self::new("loginctl", vec!["lock-session".to_string()])
        }
    }
}

impl ScreenLocker for CommandLocker {
    fn lock_screen(&self) -> io::Result<()> {
        info!(program = %self.program, "Locking screen");
        let status = Command::new(&self.program).args(&self.args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("lock command exited with {status}"),
            ))
        }
    }
}

/// Locker that does nothing. Useful for tests and headless runs.
pub struct NoopLocker;

impl ScreenLocker for NoopLocker {
    fn lock_screen(&self) -> io::Result<()> {
        Ok(())
    }
}
