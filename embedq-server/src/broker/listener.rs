use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{connection, Shared};

// Back-off after a failed accept (fd exhaustion and friends).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The broker's run loop: accept until cancelled, then drain connections.
pub(crate) async fn run(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let connections = TaskTracker::new();

    shared.ready.store(true, Ordering::Release);
    info!("broker accepting connections");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };
                let client_id = shared.next_client_id();
                debug!(client_id, %peer, "new incoming connection");

                let shared = Arc::clone(&shared);
                let token = shutdown.child_token();
                connections.spawn(async move {
                    if let Err(e) = connection::handle(socket, client_id, &shared, token).await {
                        debug!(client_id, error = %e, "connection closed with error");
                    }
                    shared.router.remove_client(client_id);
                });
            }
        }
    }

    shared.ready.store(false, Ordering::Release);
    drop(listener);
    connections.close();
    debug!(open = connections.len(), "draining client connections");
    connections.wait().await;
    info!("broker run loop stopped");
}
