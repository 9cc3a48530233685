use std::collections::VecDeque;

use anyhow::{anyhow, bail, Context};
use bytes::{Bytes, BytesMut};
use embedq_protocol::{
    ClientOp, ConnectInfo, Message, ServerInfo, ServerOp, DEFAULT_MAX_PAYLOAD,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

pub const URL_SCHEME: &str = "nats";

/// Port assumed when a URL does not name one.
pub const DEFAULT_PORT: u16 = 4222;

pub struct EmbedqClient {
    stream: TcpStream,
    buf: BytesMut,
    info: ServerInfo,
    next_sid: u64,
    // Messages that arrived while waiting for something else (PONG).
    pending: VecDeque<Message>,
}

impl EmbedqClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        Self::connect_with(url, ConnectInfo::default()).await
    }

    /// Dials `url`, reads the broker's INFO, sends CONNECT and waits for
    /// the PING/PONG round trip that proves the broker accepted it.
    pub async fn connect_with(url: &str, options: ConnectInfo) -> anyhow::Result<Self> {
        let addr = server_addr(url)?;
        let mut stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to broker at {addr}"))?;
        stream.set_nodelay(true)?;

        let mut buf = BytesMut::with_capacity(4096);
        let info = match read_op(&mut stream, &mut buf, DEFAULT_MAX_PAYLOAD).await? {
            ServerOp::Info(info) => info,
            other => bail!("expected INFO from broker, got {other:?}"),
        };

        let mut client = EmbedqClient {
            stream,
            buf,
            info,
            next_sid: 1,
            pending: VecDeque::new(),
        };
        client.send(&ClientOp::Connect(options)).await?;
        client.flush().await.context("broker rejected CONNECT")?;
        Ok(client)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    async fn send(&mut self, op: &ClientOp) -> anyhow::Result<()> {
        let mut out = BytesMut::new();
        op.encode(&mut out)?;
        self.stream.write_all(&out).await?;
        Ok(())
    }

    pub async fn publish(&mut self, subject: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.publish_inner(subject, None, payload).await
    }

    pub async fn publish_with_reply(
        &mut self,
        subject: &str,
        reply_to: &str,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.publish_inner(subject, Some(reply_to.to_string()), payload).await
    }

    async fn publish_inner(
        &mut self,
        subject: &str,
        reply_to: Option<String>,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        if payload.len() > self.info.max_payload {
            bail!(
                "payload of {} bytes exceeds broker limit of {}",
                payload.len(),
                self.info.max_payload
            );
        }
        self.send(&ClientOp::Pub {
            subject: subject.to_string(),
            reply_to,
            payload: Bytes::copy_from_slice(payload),
        })
        .await
    }

    /// Returns the sid that deliveries for this subscription will carry.
    pub async fn subscribe(&mut self, subject: &str) -> anyhow::Result<u64> {
        self.subscribe_inner(subject, None).await
    }

    pub async fn queue_subscribe(&mut self, subject: &str, queue_group: &str) -> anyhow::Result<u64> {
        self.subscribe_inner(subject, Some(queue_group.to_string())).await
    }

    async fn subscribe_inner(
        &mut self,
        subject: &str,
        queue_group: Option<String>,
    ) -> anyhow::Result<u64> {
        let sid = self.next_sid;
        self.next_sid += 1;
        self.send(&ClientOp::Sub {
            subject: subject.to_string(),
            queue_group,
            sid,
        })
        .await?;
        Ok(sid)
    }

    pub async fn unsubscribe(&mut self, sid: u64) -> anyhow::Result<()> {
        self.send(&ClientOp::Unsub { sid, max_msgs: None }).await
    }

    /// Lets `sid` receive `max_msgs` messages in total before it lapses.
    pub async fn unsubscribe_after(&mut self, sid: u64, max_msgs: u64) -> anyhow::Result<()> {
        self.send(&ClientOp::Unsub {
            sid,
            max_msgs: Some(max_msgs),
        })
        .await
    }

    /// Round trip to the broker: everything sent before has been processed
    /// once this returns.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        self.send(&ClientOp::Ping).await?;
        loop {
            match self.read().await? {
                ServerOp::Pong => return Ok(()),
                ServerOp::Msg(msg) => self.pending.push_back(msg),
                ServerOp::Ping => self.send(&ClientOp::Pong).await?,
                ServerOp::Err(reason) => bail!("broker error: {reason}"),
                ServerOp::Ok | ServerOp::Info(_) => {}
            }
        }
    }

    /// Next delivery for any subscription on this connection.
    pub async fn next_message(&mut self) -> anyhow::Result<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        loop {
            match self.read().await? {
                ServerOp::Msg(msg) => return Ok(msg),
                ServerOp::Ping => self.send(&ClientOp::Pong).await?,
                ServerOp::Err(reason) => bail!("broker error: {reason}"),
                ServerOp::Pong | ServerOp::Ok | ServerOp::Info(_) => {}
            }
        }
    }

    async fn read(&mut self) -> anyhow::Result<ServerOp> {
        read_op(&mut self.stream, &mut self.buf, self.info.max_payload).await
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn read_op(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    max_payload: usize,
) -> anyhow::Result<ServerOp> {
    loop {
        if let Some(op) = ServerOp::decode(buf, max_payload)? {
            return Ok(op);
        }
        if stream.read_buf(buf).await? == 0 {
            bail!("connection closed by broker");
        }
    }
}

/// `nats://host[:port]` to a dialable `host:port`.
pub fn server_addr(raw: &str) -> anyhow::Result<String> {
    let url = Url::parse(raw).with_context(|| format!("invalid broker URL {raw:?}"))?;
    if url.scheme() != URL_SCHEME {
        bail!("unsupported URL scheme {:?}, expected {URL_SCHEME}://", url.scheme());
    }
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("broker URL {raw:?} has no host"))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    Ok(format!("{host}:{port}"))
}
