//! Subprocess helpers shared across the workspace.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Kill a child process and reap it, without hanging the caller.
///
/// Returns `Ok(true)` when the child was reaped within `wait_timeout`,
/// `Ok(false)` when the wait timed out (the child stays killed but
/// unreaped until dropped). A child that already exited counts as reaped.
#[cfg(feature = "tokio")]
pub async fn kill_and_reap(
    child: &mut tokio::process::Child,
    wait_timeout: std::time::Duration,
) -> std::io::Result<bool> {
    match child.start_kill() {
        Ok(()) => {}
        // InvalidInput means the child has already been reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => return Ok(true),
        Err(e) => return Err(e),
    }

    match tokio::time::timeout(wait_timeout, child.wait()).await {
        Ok(status) => {
            status?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
