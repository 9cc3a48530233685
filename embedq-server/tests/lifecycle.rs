mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embedq::config::AuthConfig;
use embedq::{
    BrokerAddr, BrokerConfig, BrokerError, BrokerLifecycle, EmbeddedBroker, LifecycleError,
    LifecycleState,
};
use embedq_client::EmbedqClient;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::{occupied_port, test_config};

/// Test double whose run loop only ends on shutdown.
struct FakeBroker {
    ready: bool,
    addr: BrokerAddr,
    stop: CancellationToken,
    shutdowns: &'static AtomicUsize,
}

impl FakeBroker {
    fn new(ready: bool, addr: BrokerAddr, shutdowns: &'static AtomicUsize) -> Self {
        Self {
            ready,
            addr,
            stop: CancellationToken::new(),
            shutdowns,
        }
    }

    fn launch_until_stopped(&self) -> JoinHandle<()> {
        let stop = self.stop.clone();
        tokio::spawn(async move { stop.cancelled().await })
    }

    fn record_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
    }
}

fn fake_tcp() -> BrokerAddr {
    BrokerAddr::Tcp("127.0.0.1:4321".parse::<SocketAddr>().unwrap())
}

macro_rules! fake_broker {
    ($name:ident, ready = $ready:expr, addr = $addr:expr) => {
        struct $name(FakeBroker);

        impl $name {
            fn shutdowns() -> usize {
                Self::counter().load(Ordering::SeqCst)
            }

            fn counter() -> &'static AtomicUsize {
                static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);
                &SHUTDOWNS
            }
        }

        impl EmbeddedBroker for $name {
            async fn construct(_config: &BrokerConfig) -> Result<Self, BrokerError> {
                Ok($name(FakeBroker::new($ready, $addr, Self::counter())))
            }
            fn launch(&self) -> JoinHandle<()> {
                self.0.launch_until_stopped()
            }
            fn is_ready(&self) -> bool {
                self.0.ready
            }
            fn listen_addr(&self) -> BrokerAddr {
                self.0.addr.clone()
            }
            fn shutdown(&self) {
                self.0.record_shutdown()
            }
        }
    };
}

/// Ready a fixed delay after launch, like a broker still opening its socket.
struct LateReady {
    inner: FakeBroker,
    ready_at: std::sync::Mutex<Option<Instant>>,
}

impl LateReady {
    const DELAY: Duration = Duration::from_millis(200);

    fn shutdowns() -> usize {
        Self::counter().load(Ordering::SeqCst)
    }

    fn counter() -> &'static AtomicUsize {
        static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);
        &SHUTDOWNS
    }
}

impl EmbeddedBroker for LateReady {
    async fn construct(_config: &BrokerConfig) -> Result<Self, BrokerError> {
        Ok(LateReady {
            inner: FakeBroker::new(true, fake_tcp(), Self::counter()),
            ready_at: std::sync::Mutex::new(None),
        })
    }
    fn launch(&self) -> JoinHandle<()> {
        *self.ready_at.lock().unwrap() = Some(Instant::now() + Self::DELAY);
        self.inner.launch_until_stopped()
    }
    fn is_ready(&self) -> bool {
        matches!(*self.ready_at.lock().unwrap(), Some(at) if Instant::now() >= at)
    }
    fn listen_addr(&self) -> BrokerAddr {
        self.inner.addr.clone()
    }
    fn shutdown(&self) {
        self.inner.record_shutdown()
    }
}

fake_broker!(NeverReady, ready = false, addr = fake_tcp());
fake_broker!(SlowPollNeverReady, ready = false, addr = fake_tcp());
fake_broker!(CountingBroker, ready = true, addr = fake_tcp());
fake_broker!(SocketFileBroker, ready = true, addr = BrokerAddr::Unix(PathBuf::from("/tmp/embedq.sock")));
fake_broker!(RestartBroker, ready = true, addr = fake_tcp());

#[tokio::test]
async fn start_on_free_port_returns_bound_port_and_dialable_url() {
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    assert_eq!(lifecycle.state(), LifecycleState::Unstarted);

    let endpoint = lifecycle.start(test_config()).await.expect("start failed");
    assert_ne!(endpoint.port(), 0, "ephemeral port must be resolved");
    assert_eq!(lifecycle.state(), LifecycleState::Ready);

    let url = lifecycle.client_url().unwrap();
    assert_eq!(url, format!("nats://127.0.0.1:{}", endpoint.port()));

    let client = EmbedqClient::connect(&url).await.expect("client could not dial broker");
    assert_eq!(client.server_info().port, endpoint.port());
    client.close().await.unwrap();

    lifecycle.stop().await;
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn occupied_port_fails_startup_and_leaves_failed_state() {
    let (_blocker, port) = occupied_port();
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();

    let err = lifecycle
        .start(BrokerConfig { port, ..test_config() })
        .await
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::Startup(BrokerError::Bind { .. })),
        "unexpected error: {err}"
    );
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
    assert!(matches!(
        lifecycle.client_url(),
        Err(LifecycleError::NotReady { state: LifecycleState::Failed })
    ));

    lifecycle.stop().await;
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn unsupported_config_is_a_startup_error() {
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    let config = BrokerConfig {
        auth: Some(AuthConfig {
            user: Some("svc".into()),
            password: Some("pw".into()),
            token: None,
        }),
        ..test_config()
    };

    let err = lifecycle.start(config).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Startup(BrokerError::InvalidConfig(_))));
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_fires_at_the_bound() {
    let lifecycle = BrokerLifecycle::<NeverReady>::new();
    let config = BrokerConfig {
        ready_timeout: Duration::from_secs(10),
        ready_poll_interval: Duration::from_millis(100),
        ..BrokerConfig::default()
    };

    let began = Instant::now();
    let err = lifecycle.start(config).await.unwrap_err();
    let elapsed = began.elapsed();

    match err {
        LifecycleError::ReadinessTimeout { waited } => assert!(waited >= Duration::from_secs(10)),
        other => panic!("expected readiness timeout, got {other}"),
    }
    assert!(elapsed >= Duration::from_secs(10), "timed out early: {elapsed:?}");
    assert!(
        elapsed <= Duration::from_secs(10) + Duration::from_millis(100),
        "overshot the bound: {elapsed:?}"
    );
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
    assert_eq!(NeverReady::shutdowns(), 1, "unready broker must be shut down");
}

#[tokio::test(start_paused = true)]
async fn last_poll_is_clamped_to_the_deadline() {
    let lifecycle = BrokerLifecycle::<SlowPollNeverReady>::new();
    let config = BrokerConfig {
        ready_timeout: Duration::from_secs(1),
        ready_poll_interval: Duration::from_millis(300),
        ..BrokerConfig::default()
    };

    let began = Instant::now();
    lifecycle.start(config).await.unwrap_err();
    let elapsed = began.elapsed();
    // 0, 300, 600, 900 then a 100ms sleep instead of a full interval.
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100), "final sleep not clamped: {elapsed:?}");
}

#[tokio::test]
async fn stop_twice_shuts_the_broker_down_once() {
    let lifecycle = BrokerLifecycle::<CountingBroker>::new();
    let endpoint = lifecycle.start(BrokerConfig::default()).await.unwrap();
    assert_eq!(endpoint.port(), 4321);

    lifecycle.stop().await;
    lifecycle.stop().await;

    assert_eq!(CountingBroker::shutdowns(), 1);
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert!(matches!(
        lifecycle.endpoint(),
        Err(LifecycleError::NotReady { state: LifecycleState::Stopped })
    ));
}

#[tokio::test]
async fn non_network_listen_address_is_fatal() {
    let lifecycle = BrokerLifecycle::<SocketFileBroker>::new();
    let err = lifecycle.start(BrokerConfig::default()).await.unwrap_err();

    assert!(matches!(err, LifecycleError::AddressResolution { addr: BrokerAddr::Unix(_) }));
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
    assert_eq!(SocketFileBroker::shutdowns(), 1);
}

#[tokio::test]
async fn lifecycle_starts_only_once() {
    let lifecycle = BrokerLifecycle::<RestartBroker>::new();
    lifecycle.start(BrokerConfig::default()).await.unwrap();

    let err = lifecycle.start(BrokerConfig::default()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyStarted { state: LifecycleState::Ready }));

    lifecycle.stop().await;
    let err = lifecycle.start(BrokerConfig::default()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyStarted { state: LifecycleState::Stopped }));
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    lifecycle.stop().await;
    assert_eq!(lifecycle.state(), LifecycleState::Unstarted);
    assert!(lifecycle.client_url().is_err());
}

#[tokio::test]
async fn stop_releases_the_port_and_disconnects_clients() {
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    let endpoint = lifecycle.start(test_config()).await.unwrap();
    let url = lifecycle.client_url().unwrap();

    let mut client = EmbedqClient::connect(&url).await.unwrap();
    client.subscribe("never.published").await.unwrap();
    client.flush().await.unwrap();

    lifecycle.stop().await;

    let next = tokio::time::timeout(Duration::from_secs(2), client.next_message())
        .await
        .expect("client was not disconnected");
    assert!(next.is_err());

    // The same port can be bound again right away.
    std::net::TcpListener::bind(endpoint.dial_addr()).expect("port still held after stop");
}

#[tokio::test]
async fn dropping_a_running_lifecycle_shuts_the_broker_down() {
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    let endpoint = lifecycle.start(test_config()).await.unwrap();
    let addr = endpoint.dial_addr();
    drop(lifecycle);

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if tokio::net::TcpStream::connect(addr).await.is_err() {
            break;
        }
        assert!(Instant::now() < deadline, "broker still accepting after drop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn stop_issued_during_start_waits_for_it_to_settle() {
    let lifecycle = Arc::new(BrokerLifecycle::<LateReady>::new());
    let config = BrokerConfig {
        ready_poll_interval: Duration::from_millis(10),
        ..BrokerConfig::default()
    };

    let starting = tokio::spawn({
        let lifecycle = Arc::clone(&lifecycle);
        async move { lifecycle.start(config).await }
    });
    while lifecycle.state() == LifecycleState::Unstarted {
        tokio::task::yield_now().await;
    }
    assert_eq!(lifecycle.state(), LifecycleState::Starting);

    lifecycle.stop().await;

    let started = starting.await.unwrap();
    assert!(started.is_ok(), "start failed: {:?}", started.err());
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(LateReady::shutdowns(), 1);
    assert!(lifecycle.client_url().is_err());
}

#[tokio::test]
async fn stop_is_not_held_up_by_a_subscriber_that_never_reads() {
    const CHUNK: usize = 256 * 1024;
    const CHUNKS: usize = 100;

    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();
    let config = test_config();
    let shutdown_timeout = config.shutdown_timeout;
    let endpoint = lifecycle.start(config).await.unwrap();
    let url = lifecycle.client_url().unwrap();

    // Subscribe over a raw socket, then stop reading once the broker has
    // acknowledged the subscription.
    let mut stalled = TcpStream::connect(endpoint.dial_addr()).await.unwrap();
    stalled
        .write_all(b"CONNECT {}\r\nSUB flood 1\r\nPING\r\n")
        .await
        .unwrap();
    let mut seen = Vec::new();
    while !seen.windows(6).any(|w| w == b"PONG\r\n") {
        let mut chunk = [0u8; 512];
        let n = stalled.read(&mut chunk).await.unwrap();
        assert_ne!(n, 0, "broker closed the subscriber early");
        seen.extend_from_slice(&chunk[..n]);
    }

    // Far more than the socket buffers hold, so the broker blocks writing.
    let mut publisher = EmbedqClient::connect(&url).await.unwrap();
    let payload = vec![b'x'; CHUNK];
    for _ in 0..CHUNKS {
        publisher.publish("flood", &payload).await.unwrap();
    }
    publisher.flush().await.unwrap();

    let began = std::time::Instant::now();
    lifecycle.stop().await;
    let took = began.elapsed();
    assert!(
        took < shutdown_timeout / 2,
        "stop waited {took:?} on a stalled subscriber"
    );
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);

    // The connection is closed: draining what the kernel already holds
    // ends in EOF instead of an endless stream.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let mut total = 0usize;
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match stalled.read(&mut chunk).await {
                Ok(0) | Err(_) => return total,
                Ok(n) => total += n,
            }
        }
    })
    .await
    .expect("subscriber connection still open after stop");
    assert!(drained < CHUNK * CHUNKS, "every message was delivered after stop");
}
