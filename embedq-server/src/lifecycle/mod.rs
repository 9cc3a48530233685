//! Lifecycle of the embedded broker.
//!
//! # Data Flow
//! ```text
//! start (this module):
//!     Unstarted → Starting → construct → launch → poll ready → resolve addr → Ready
//!                    └──────────────── any failure ────────────────→ Failed
//!
//! stop (this module):
//!     Ready → Stopping → cancel run loop → join (bounded) → Stopped
//!
//! signals (signals.rs):
//!     SIGTERM/SIGINT → ShutdownSignal fires once → host calls stop
//! ```

mod endpoint;
mod error;
mod shutdown;
mod signals;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{Broker, EmbeddedBroker};
use crate::config::BrokerConfig;

pub use endpoint::{ListenEndpoint, URL_SCHEME};
pub use error::LifecycleError;
pub use shutdown::ShutdownSignal;
pub use signals::SignalBridge;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LifecycleState {
    Unstarted = 0,
    Starting = 1,
    Ready = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Unstarted,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Ready,
            3 => LifecycleState::Stopping,
            4 => LifecycleState::Stopped,
            _ => LifecycleState::Failed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Running<B> {
    broker: B,
    run_loop: JoinHandle<()>,
    shutdown_timeout: Duration,
}

/// Owns one embedded broker from construction to shutdown.
///
/// `start` and `stop` are serialised on an async mutex held for the whole
/// transition, so a `stop` issued while `start` is polling waits for the
/// outcome. `state`, `endpoint` and `client_url` never block on it.
///
/// Dropping a manager whose broker is still running requests broker
/// shutdown, so teardown happens even on paths that skip `stop`.
pub struct BrokerLifecycle<B: EmbeddedBroker = Broker> {
    running: Mutex<Option<Running<B>>>,
    state: AtomicU8,
    endpoint: RwLock<Option<ListenEndpoint>>,
}

impl<B: EmbeddedBroker> Default for BrokerLifecycle<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: EmbeddedBroker> BrokerLifecycle<B> {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
            state: AtomicU8::new(LifecycleState::Unstarted as u8),
            endpoint: RwLock::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = LifecycleState::from(self.state.swap(next as u8, Ordering::AcqRel));
        debug!(from = %prev, to = %next, "broker lifecycle transition");
    }

    /// Constructs, launches and waits for the broker, returning where it
    /// listens. Every error leaves the manager in `Failed` with the broker
    /// (if any was built) shut down; none of them is retried.
    pub async fn start(&self, config: BrokerConfig) -> Result<ListenEndpoint, LifecycleError> {
        let mut slot = self.running.lock().await;
        let state = self.state();
        if state != LifecycleState::Unstarted {
            return Err(LifecycleError::AlreadyStarted { state });
        }
        self.set_state(LifecycleState::Starting);
        info!(host = %config.host, port = config.port, "starting embedded broker");

        let constructed = match config.validate() {
            Ok(()) => B::construct(&config).await,
            Err(e) => Err(e.into()),
        };
        let broker = match constructed {
            Ok(broker) => broker,
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                return Err(e.into());
            }
        };
        let mut run_loop = broker.launch();

        let resolved = match Self::await_ready(&broker, &config).await {
            Ok(()) => ListenEndpoint::try_from(broker.listen_addr()),
            Err(e) => Err(e),
        };
        let endpoint = match resolved {
            Ok(endpoint) => endpoint,
            Err(e) => {
                halt(&broker, &mut run_loop, config.shutdown_timeout).await;
                self.set_state(LifecycleState::Failed);
                return Err(e);
            }
        };

        *self.endpoint.write().unwrap_or_else(PoisonError::into_inner) = Some(endpoint);
        *slot = Some(Running {
            broker,
            run_loop,
            shutdown_timeout: config.shutdown_timeout,
        });
        self.set_state(LifecycleState::Ready);
        info!(port = endpoint.port(), url = %endpoint.client_url(), "embedded broker is ready");
        Ok(endpoint)
    }

    /// Polls until ready. The last sleep is clamped to the deadline, so a
    /// timeout is reported no earlier than `ready_timeout` and no later than
    /// one poll interval after it.
    async fn await_ready(broker: &B, config: &BrokerConfig) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + config.ready_timeout;
        loop {
            if broker.is_ready() {
                debug!(elapsed = ?started.elapsed(), "broker ready for connections");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LifecycleError::ReadinessTimeout {
                    waited: now - started,
                });
            }
            tokio::time::sleep(config.ready_poll_interval.min(deadline - now)).await;
        }
    }

    /// Stops a ready broker. A no-op in every other state, so it is safe to
    /// call unconditionally during teardown and to call more than once.
    pub async fn stop(&self) {
        let mut slot = self.running.lock().await;
        let Some(mut running) = slot.take() else {
            debug!(state = %self.state(), "stop requested with no running broker");
            return;
        };

        self.set_state(LifecycleState::Stopping);
        *self.endpoint.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("stopping embedded broker");

        halt(&running.broker, &mut running.run_loop, running.shutdown_timeout).await;
        self.set_state(LifecycleState::Stopped);
        info!("embedded broker stopped");
    }

    /// The endpoint handed out by `start`, while the broker is `Ready`.
    pub fn endpoint(&self) -> Result<ListenEndpoint, LifecycleError> {
        let endpoint = *self.endpoint.read().unwrap_or_else(PoisonError::into_inner);
        match (endpoint, self.state()) {
            (Some(endpoint), LifecycleState::Ready) => Ok(endpoint),
            (_, state) => Err(LifecycleError::NotReady { state }),
        }
    }

    /// URL a client library can dial, e.g. `nats://127.0.0.1:3000`.
    pub fn client_url(&self) -> Result<String, LifecycleError> {
        self.endpoint().map(|ep| ep.client_url())
    }
}

/// Requests broker shutdown and waits (bounded) for its run loop to end.
async fn halt<B: EmbeddedBroker>(broker: &B, run_loop: &mut JoinHandle<()>, bound: Duration) {
    broker.shutdown();
    match tokio::time::timeout(bound, &mut *run_loop).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "broker run loop ended abnormally"),
        Err(_) => {
            warn!(?bound, "broker run loop did not stop in time; aborting it");
            run_loop.abort();
        }
    }
}

impl<B: EmbeddedBroker> Drop for BrokerLifecycle<B> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            warn!("broker lifecycle dropped while running; shutting broker down");
            running.broker.shutdown();
        }
    }
}
