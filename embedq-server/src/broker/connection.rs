use std::io;

use bytes::BytesMut;
use embedq_protocol::{ClientOp, ProtocolError, ServerOp};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Shared;

/// Deliveries buffered per client before it counts as a slow consumer.
const OUTBOUND_QUEUE: usize = 8 * 1024;

struct Session {
    client_id: u64,
    verbose: bool,
}

pub(crate) async fn handle(
    mut stream: TcpStream,
    client_id: u64,
    shared: &Shared,
    shutdown: CancellationToken,
) -> Result<(), ProtocolError> {
    stream.set_nodelay(true)?;

    let (tx, mut deliveries) = mpsc::channel(OUTBOUND_QUEUE);
    shared.router.register(client_id, tx);

    let mut out = BytesMut::with_capacity(4096);
    let mut info = shared.info.clone();
    info.client_id = Some(client_id);
    ServerOp::Info(info).encode(&mut out)?;
    if !send(&mut stream, &mut out, &shutdown).await? {
        return Ok(());
    }

    let mut session = Session {
        client_id,
        verbose: false,
    };
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(client_id, "closing connection for broker shutdown");
                return Ok(());
            }

            delivery = deliveries.recv() => {
                let Some(op) = delivery else {
                    // The router dropped us: our queue overflowed.
                    ServerOp::Err("Slow Consumer".into()).encode(&mut out)?;
                    send(&mut stream, &mut out, &shutdown).await?;
                    return Ok(());
                };
                op.encode(&mut out)?;
                // Batch whatever else is already queued.
                while let Ok(op) = deliveries.try_recv() {
                    op.encode(&mut out)?;
                }
                if !send(&mut stream, &mut out, &shutdown).await? {
                    return Ok(());
                }
            }

            read = stream.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(()); // EOF
                }
                loop {
                    let op = match ClientOp::decode(&mut buf, shared.max_payload) {
                        Ok(Some(op)) => op,
                        Ok(None) => break,
                        Err(e) => {
                            ServerOp::Err(client_facing(&e).into()).encode(&mut out)?;
                            send(&mut stream, &mut out, &shutdown).await?;
                            return Err(e);
                        }
                    };
                    dispatch(op, &mut session, shared, &mut out);
                }
                if !out.is_empty() && !send(&mut stream, &mut out, &shutdown).await? {
                    return Ok(());
                }
            }
        }
    }
}

/// Writes and clears `out`. A peer that stops reading must not hold up
/// broker shutdown, so the write gives up once `shutdown` fires and
/// returns `false`.
async fn send(
    stream: &mut TcpStream,
    out: &mut BytesMut,
    shutdown: &CancellationToken,
) -> io::Result<bool> {
    tokio::select! {
        written = stream.write_all(&out[..]) => {
            written?;
            out.clear();
            Ok(true)
        }
        _ = shutdown.cancelled() => {
            debug!(pending = out.len(), "abandoning write for broker shutdown");
            Ok(false)
        }
    }
}

fn dispatch(op: ClientOp, session: &mut Session, shared: &Shared, out: &mut BytesMut) {
    trace!(client_id = session.client_id, ?op, "client op");
    let client_id = session.client_id;
    match op {
        ClientOp::Connect(connect) => {
            debug!(client_id, name = ?connect.name, lang = %connect.lang, "client connected");
            session.verbose = connect.verbose;
            shared.router.set_echo(client_id, connect.echo);
        }
        ClientOp::Pub {
            subject,
            reply_to,
            payload,
        } => {
            let fanout = shared
                .router
                .publish(client_id, &subject, reply_to.as_deref(), payload);
            trace!(client_id, %subject, fanout, "published");
        }
        ClientOp::Sub {
            subject,
            queue_group,
            sid,
        } => shared.router.subscribe(client_id, sid, subject, queue_group),
        ClientOp::Unsub { sid, max_msgs } => shared.router.unsubscribe(client_id, sid, max_msgs),
        ClientOp::Ping => {
            // encoding fixed ops cannot fail
            let _ = ServerOp::Pong.encode(out);
            return;
        }
        ClientOp::Pong => return,
    }
    if session.verbose {
        let _ = ServerOp::Ok.encode(out);
    }
}

fn client_facing(err: &ProtocolError) -> &'static str {
    match err {
        ProtocolError::PayloadTooLarge { .. } => "Maximum Payload Violation",
        ProtocolError::InvalidSubject(_) => "Invalid Subject",
        ProtocolError::ControlLineTooLong { .. } => "Maximum Control Line Exceeded",
        ProtocolError::UnknownOp(_) => "Unknown Protocol Operation",
        _ => "Parser Error",
    }
}
