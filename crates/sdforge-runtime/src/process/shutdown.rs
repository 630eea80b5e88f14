//! Graceful process shutdown with SIGTERM → SIGKILL escalation.
//!
//! Two strategies:
//! - [`shutdown_child`]: for processes we own a `Child` handle for (reaps)
//! - [`kill_pid`]: for orphans from a previous run (no handle, no reaping)

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

#[cfg(unix)]
use tokio::time::{sleep, timeout};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Gracefully shut down a child process.
///
/// Sends SIGTERM and waits up to `grace` for a clean exit, then escalates to
/// SIGKILL and reaps. On non-Unix platforms the process is killed immediately.
pub async fn shutdown_child(mut child: Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        shutdown_unix(&mut child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "child has no PID"))?;

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // Process may have already exited
        if e == Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = timeout(grace, child.wait()).await {
        return result;
    }

    // Grace period elapsed, escalate
    child.kill().await?;
    child.wait().await
}

/// Kill an orphaned process by PID with SIGTERM → SIGKILL escalation.
///
/// Unlike [`shutdown_child`] there is no `Child` handle, so the process cannot
/// be reaped here. Exit is verified by polling with the null signal.
///
/// Returns `Ok(())` if the process exited or was already gone.
pub async fn kill_pid(pid: u32, grace: Duration) -> io::Result<()> {
    #[cfg(unix)]
    {
        kill_pid_unix(pid, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("orphan cleanup by PID is not supported on this platform (pid {pid})"),
        ))
    }
}

#[cfg(unix)]
async fn kill_pid_unix(pid: u32, grace: Duration) -> io::Result<()> {
    let nix_pid = Pid::from_raw(pid as i32);

    if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
        if e == Errno::ESRCH {
            return Ok(());
        }
        return Err(io::Error::other(e));
    }

    if poll_for_exit(nix_pid, grace).await {
        return Ok(());
    }

    if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
        if e == Errno::ESRCH {
            return Ok(());
        }
        return Err(io::Error::other(e));
    }

    if poll_for_exit(nix_pid, Duration::from_secs(2)).await {
        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("process {pid} did not exit after SIGKILL"),
    ))
}

/// Poll the null signal until the process disappears or `window` elapses.
#[cfg(unix)]
async fn poll_for_exit(pid: Pid, window: Duration) -> bool {
    let interval = Duration::from_millis(100);
    let attempts = (window.as_millis() / interval.as_millis()).max(1);

    for _ in 0..attempts {
        sleep(interval).await;
        match signal::kill(pid, None) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return true,
            // Permission error: assume still alive
            Err(_) => {}
        }
    }
    false
}
