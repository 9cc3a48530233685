/*
The embedded pub/sub engine.

The lifecycle manager only sees the `EmbeddedBroker` capability set:
construct -> launch -> is_ready -> listen_addr -> shutdown. Everything
below that line (accept loop, per-connection protocol handling, subject
routing) is owned by this module.
*/

mod connection;
mod listener;
mod router;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use embedq_protocol::{ServerInfo, PROTOCOL_VERSION};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BrokerConfig, ConfigError};
use router::Router;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Where a broker reports it is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
    Unbound,
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            BrokerAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            BrokerAddr::Unbound => f.write_str("<unbound>"),
        }
    }
}

/// The capabilities the lifecycle manager needs from a broker.
///
/// `construct` receives an already validated config. `launch` must not
/// block: it hands the run loop to the runtime and returns its handle.
/// `shutdown` only requests termination; the run loop finishing is
/// observed through that handle.
pub trait EmbeddedBroker: Send + Sync + Sized + 'static {
    fn construct(config: &BrokerConfig) -> impl Future<Output = Result<Self, BrokerError>> + Send;

    fn launch(&self) -> JoinHandle<()>;

    fn is_ready(&self) -> bool;

    fn listen_addr(&self) -> BrokerAddr;

    fn shutdown(&self);
}

/// State shared between the accept loop and every connection task.
pub(crate) struct Shared {
    pub router: Router,
    pub info: ServerInfo,
    pub max_payload: usize,
    pub ready: AtomicBool,
    next_client_id: AtomicU64,
}

impl Shared {
    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// NATS-core compatible broker listening on a single TCP socket.
pub struct Broker {
    // Taken by `launch`; the socket is bound from construction on so that
    // port conflicts surface before anything is spawned.
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl EmbeddedBroker for Broker {
    async fn construct(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let addr = config.listen_addr().await?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BrokerError::Bind { addr, source })?;

        let info = ServerInfo {
            server_id: server_id(),
            server_name: config.server_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            proto: PROTOCOL_VERSION,
            host: config.host.clone(),
            port: local_addr.port(),
            max_payload: config.max_payload,
            headers: false,
            auth_required: false,
            client_id: None,
        };

        info!(%local_addr, server_id = %info.server_id, "broker constructed");
        Ok(Broker {
            listener: Mutex::new(Some(listener)),
            local_addr,
            shared: Arc::new(Shared {
                router: Router::default(),
                info,
                max_payload: config.max_payload,
                ready: AtomicBool::new(false),
                next_client_id: AtomicU64::new(1),
            }),
            shutdown: CancellationToken::new(),
        })
    }

    fn launch(&self) -> JoinHandle<()> {
        let taken = match self.listener.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(listener) => tokio::spawn(listener::run(
                listener,
                Arc::clone(&self.shared),
                self.shutdown.clone(),
            )),
            None => {
                warn!("broker already launched");
                tokio::spawn(async {})
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    fn listen_addr(&self) -> BrokerAddr {
        BrokerAddr::Tcp(self.local_addr)
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn server_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("EMBEDQ{:X}{:X}", std::process::id(), nanos)
}
