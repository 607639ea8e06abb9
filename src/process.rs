//! Process lifecycle: process-group detachment and the shutdown signal.

use std::future::Future;
use std::io;

/// Move this process into its own process group.
///
/// Terminal signals aimed at a supervising shell's foreground job then reach
/// us only when sent to us directly.
#[cfg(unix)]
pub fn detach_process_group() -> io::Result<()> {
    // SAFETY: setpgid has no memory-safety preconditions.
    let rc = unsafe { libc::setpgid(0, 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn detach_process_group() -> io::Result<()> {
    Ok(())
}

/// Register termination handlers and return a future that resolves on the
/// first one received.
///
/// Handlers are installed before this returns, so a signal arriving while
/// the subscription is being set up is not lost. Must be called inside a
/// tokio runtime.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        };
        crate::log_event!("process", "shutdown signal", "{name}");
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => crate::log_event!("process", "shutdown signal", "ctrl-c"),
            Err(e) => {
                tracing::warn!("[process] ctrl-c handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    })
}
