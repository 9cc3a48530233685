#![allow(dead_code)]

use std::net::TcpListener;
use std::time::Duration;

use embedq::BrokerConfig;

/// Loopback config on an OS-chosen port with short bounds.
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ready_timeout: Duration::from_secs(5),
        ready_poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        ..BrokerConfig::default()
    }
}

/// A listener holding a loopback port so the broker cannot have it.
pub fn occupied_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind blocker");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let (listener, port) = occupied_port();
    drop(listener);
    port
}
