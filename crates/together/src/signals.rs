//! Signal handling for graceful server shutdown.
//!
//! OS signals are turned into a `watch` trigger, so any number of tasks can
//! observe the shutdown and none of them misses one delivered earlier.

use std::fmt;
use std::io;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// The signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl+C on Windows
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

pub type ShutdownTrigger = watch::Receiver<Option<ShutdownSignal>>;

/// Installs the signal handlers and returns the trigger they fire.
///
/// * **Unix platforms**: SIGINT and SIGTERM
/// * **Windows**: Ctrl+C
pub fn listen() -> io::Result<ShutdownTrigger> {
    let (trigger, shutdown) = watch::channel(None);

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            let received = tokio::select! {
                _ = sigint.recv() => ShutdownSignal::Interrupt,
                _ = sigterm.recv() => ShutdownSignal::Terminate,
            };
            info!("📡 Received {}", received);
            trigger.send_replace(Some(received));
        });
    }

    #[cfg(windows)]
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("📡 Received Ctrl+C");
                trigger.send_replace(Some(ShutdownSignal::Interrupt));
            }
            Err(e) => error!("Ctrl+C handler failed: {}", e),
        }
    });

    Ok(shutdown)
}

/// Resolves with the first signal received. Never resolves if the listener
/// stopped without one.
pub async fn triggered(shutdown: &mut ShutdownTrigger) -> ShutdownSignal {
    let received = match shutdown.wait_for(Option::is_some).await {
        Ok(seen) => *seen,
        Err(_) => None,
    };
    match received {
        Some(signal) => signal,
        None => {
            error!("Signal listener stopped without a signal");
            std::future::pending().await
        }
    }
}
