#![cfg(unix)]

mod common;

use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use embedq_client::EmbedqClient;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::common::{free_port, occupied_port};

fn spawn_host(port: u16) -> Child {
    Command::new(env!("CARGO_BIN_EXE_embedq-server"))
        .args(["--host", "127.0.0.1", "--port", &port.to_string(), "--ready-timeout", "30s"])
        .args(["--log-level", "warn"])
        .env_remove("EMBEDQ_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn embedq-server")
}

async fn wait_exit(child: &mut Child, within: Duration) -> ExitStatus {
    let deadline = Instant::now() + within;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("embedq-server did not exit within {within:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn dial_until_up(url: &str, within: Duration) -> EmbedqClient {
    let deadline = Instant::now() + within;
    loop {
        match EmbedqClient::connect(url).await {
            Ok(client) => return client,
            Err(e) if Instant::now() > deadline => panic!("broker never came up: {e:#}"),
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

#[tokio::test]
async fn interrupt_stops_the_host_cleanly() {
    let port = free_port();
    let mut child = spawn_host(port);

    let url = format!("nats://127.0.0.1:{port}");
    let mut client = dial_until_up(&url, Duration::from_secs(10)).await;
    client.publish("health", b"ok").await.unwrap();
    client.flush().await.unwrap();

    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let status = wait_exit(&mut child, Duration::from_secs(10)).await;
    assert!(status.success(), "expected clean exit, got {status}");

    assert!(client.next_message().await.is_err(), "connection should be closed");
}

#[tokio::test]
async fn terminate_also_stops_the_host_cleanly() {
    let port = free_port();
    let mut child = spawn_host(port);
    let client = dial_until_up(&format!("nats://127.0.0.1:{port}"), Duration::from_secs(10)).await;
    drop(client);

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    let status = wait_exit(&mut child, Duration::from_secs(10)).await;
    assert!(status.success(), "expected clean exit, got {status}");
}

#[tokio::test]
async fn occupied_port_exits_non_zero_without_waiting_for_readiness() {
    let (_blocker, port) = occupied_port();
    let began = Instant::now();
    let mut child = spawn_host(port);

    let status = wait_exit(&mut child, Duration::from_secs(10)).await;
    assert!(!status.success());
    // --ready-timeout is 30s; failing fast means it never polled.
    assert!(began.elapsed() < Duration::from_secs(10));
}
