//! OS signal handling.
//!
//! SIGINT and SIGTERM are registered before `arm` returns, so a signal
//! delivered at any later point is observed. The first one fires the shared
//! [`ShutdownSignal`]; repeats are logged and otherwise ignored.

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{LifecycleError, ShutdownSignal};

pub struct SignalBridge {
    signal: ShutdownSignal,
    task: JoinHandle<()>,
}

impl SignalBridge {
    #[cfg(unix)]
    pub fn arm(signal: ShutdownSignal) -> Result<Self, LifecycleError> {
        use tokio::signal::unix::{signal as register, SignalKind};

        let mut terminate =
            register(SignalKind::terminate()).map_err(LifecycleError::SignalRegistration)?;
        let mut interrupt =
            register(SignalKind::interrupt()).map_err(LifecycleError::SignalRegistration)?;

        let bridged = signal.clone();
        let task = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = terminate.recv() => "SIGTERM",
                    Some(()) = interrupt.recv() => "SIGINT",
                    else => break,
                };
                relay(&bridged, name);
            }
        });

        debug!("termination signal handlers registered");
        Ok(Self { signal, task })
    }

    #[cfg(not(unix))]
    pub fn arm(signal: ShutdownSignal) -> Result<Self, LifecycleError> {
        let bridged = signal.clone();
        let task = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                relay(&bridged, "ctrl-c");
            }
            tracing::error!("ctrl-c handler failed; shutdown must be triggered another way");
        });
        Ok(Self { signal, task })
    }

    /// Resolves once the shared signal has fired, by this bridge or anyone
    /// else holding a clone.
    pub async fn wait(&self) {
        self.signal.wait().await
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

fn relay(signal: &ShutdownSignal, name: &'static str) {
    if signal.fire() {
        info!(signal = name, "termination signal received");
    } else {
        debug!(signal = name, "already shutting down; signal ignored");
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
