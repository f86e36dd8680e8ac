//! Supervision of sync script child processes.

use std::io;
use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, WatchdogError};

/// Wait for a started child, stopping it if `cancel` fires first.
///
/// On cancellation the child gets SIGTERM. If it has not exited after
/// `kill_delay` it is killed outright, and in every case it is reaped before
/// returning. An interrupted child yields [`WatchdogError::Interrupted`];
/// otherwise an unsuccessful exit yields [`WatchdogError::ChildFailed`].
pub async fn wait_or_stop(
    child: &mut Child,
    cancel: &CancellationToken,
    kill_delay: Duration,
) -> Result<()> {
    tokio::select! {
        status = child.wait() => return check_status(status?),
        _ = cancel.cancelled() => {}
    }

    match interrupt(child) {
        Ok(true) => debug!("Sent SIGTERM to child {:?}", child.id()),
        // Already gone; report how it ended rather than the cancellation.
        Ok(false) => return check_status(child.wait().await?),
        Err(e) => warn!("Failed to interrupt child: {e}"),
    }

    match tokio::time::timeout(kill_delay, child.wait()).await {
        Ok(status) => {
            status?;
        }
        Err(_) => {
            warn!("Child still running after {kill_delay:?}, killing it");
            // Ignore the error: the child may have exited in the meantime.
            let _ = child.start_kill();
            child.wait().await?;
        }
    }

    Err(WatchdogError::Interrupted)
}

fn check_status(status: std::process::ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(WatchdogError::ChildFailed(status))
    }
}

/// Politely ask the child to stop. `Ok(false)` means it had already exited.
#[cfg(unix)]
fn interrupt(child: &mut Child) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(false);
    };
    let pid = i32::try_from(pid).map_err(io::Error::other)?;

    // The child has not been reaped yet, so its pid cannot have been reused.
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> io::Result<bool> {
    if child.id().is_none() {
        return Ok(false);
    }
    child.start_kill().map(|()| true)
}
