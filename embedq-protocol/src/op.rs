use bytes::{Bytes, BytesMut};

use crate::frame::{self, ControlLine};
use crate::info::{ConnectInfo, ServerInfo};
use crate::message::Message;
use crate::{subject, ProtocolError};

/// Operations a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOp {
    Connect(ConnectInfo),
    Pub {
        subject: String,
        reply_to: Option<String>,
        payload: Bytes,
    },
    Sub {
        subject: String,
        queue_group: Option<String>,
        sid: u64,
    },
    Unsub {
        sid: u64,
        max_msgs: Option<u64>,
    },
    Ping,
    Pong,
}

/// Operations the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(ServerInfo),
    Msg(Message),
    Ping,
    Pong,
    Ok,
    Err(String),
}

impl ClientOp {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            ClientOp::Connect(info) => {
                frame::put_line(buf, &format!("CONNECT {}", serde_json::to_string(info)?));
            }
            ClientOp::Pub {
                subject,
                reply_to,
                payload,
            } => {
                let line = match reply_to {
                    Some(reply) => format!("PUB {subject} {reply} {}", payload.len()),
                    None => format!("PUB {subject} {}", payload.len()),
                };
                frame::put_line(buf, &line);
                frame::put_payload(buf, payload);
            }
            ClientOp::Sub {
                subject,
                queue_group,
                sid,
            } => {
                let line = match queue_group {
                    Some(queue) => format!("SUB {subject} {queue} {sid}"),
                    None => format!("SUB {subject} {sid}"),
                };
                frame::put_line(buf, &line);
            }
            ClientOp::Unsub { sid, max_msgs } => {
                let line = match max_msgs {
                    Some(max) => format!("UNSUB {sid} {max}"),
                    None => format!("UNSUB {sid}"),
                };
                frame::put_line(buf, &line);
            }
            ClientOp::Ping => frame::put_line(buf, "PING"),
            ClientOp::Pong => frame::put_line(buf, "PONG"),
        }
        Ok(())
    }

    /// Decodes one operation from the front of `buf`.
    ///
    /// Returns `Ok(None)` without consuming anything while the operation is
    /// still incomplete. `PUB` sizes above `max_payload` are rejected as soon
    /// as the control line arrives.
    pub fn decode(buf: &mut BytesMut, max_payload: usize) -> Result<Option<ClientOp>, ProtocolError> {
        let Some(line) = ControlLine::peek(buf)? else {
            return Ok(None);
        };
        let (verb, rest) = line.verb_and_rest();

        let op = match verb.as_str() {
            "CONNECT" => ClientOp::Connect(serde_json::from_str(rest)?),
            "PING" => ClientOp::Ping,
            "PONG" => ClientOp::Pong,
            "SUB" => parse_sub(rest)?,
            "UNSUB" => parse_unsub(rest)?,
            "PUB" => {
                let args: Vec<&str> = rest.split_ascii_whitespace().collect();
                let (subject, reply_to, size) = match args.as_slice() {
                    [subject, size] => (*subject, None, *size),
                    [subject, reply, size] => (*subject, Some(reply.to_string()), *size),
                    _ => return Err(ProtocolError::malformed("PUB", "expected <subject> [reply-to] <#bytes>")),
                };
                if !subject::is_valid_publish(subject) {
                    return Err(ProtocolError::InvalidSubject(subject.to_string()));
                }
                let size = frame::payload_size("PUB", size, max_payload)?;
                let subject = subject.to_string();
                return Ok(line.take_payload(buf, size)?.map(|payload| ClientOp::Pub {
                    subject,
                    reply_to,
                    payload,
                }));
            }
            _ => return Err(ProtocolError::UnknownOp(verb)),
        };

        line.consume(buf);
        Ok(Some(op))
    }
}

fn parse_sub(rest: &str) -> Result<ClientOp, ProtocolError> {
    let args: Vec<&str> = rest.split_ascii_whitespace().collect();
    let (subject, queue_group, sid) = match args.as_slice() {
        [subject, sid] => (*subject, None, *sid),
        [subject, queue, sid] => (*subject, Some(queue.to_string()), *sid),
        _ => return Err(ProtocolError::malformed("SUB", "expected <subject> [queue group] <sid>")),
    };
    if !subject::is_valid_filter(subject) {
        return Err(ProtocolError::InvalidSubject(subject.to_string()));
    }
    Ok(ClientOp::Sub {
        subject: subject.to_string(),
        queue_group,
        sid: frame::parse_sid("SUB", sid)?,
    })
}

fn parse_unsub(rest: &str) -> Result<ClientOp, ProtocolError> {
    let args: Vec<&str> = rest.split_ascii_whitespace().collect();
    match args.as_slice() {
        [sid] => Ok(ClientOp::Unsub {
            sid: frame::parse_sid("UNSUB", sid)?,
            max_msgs: None,
        }),
        [sid, max] => Ok(ClientOp::Unsub {
            sid: frame::parse_sid("UNSUB", sid)?,
            max_msgs: Some(max.parse().map_err(|_| {
                ProtocolError::malformed("UNSUB", format!("invalid max_msgs {max:?}"))
            })?),
        }),
        _ => Err(ProtocolError::malformed("UNSUB", "expected <sid> [max_msgs]")),
    }
}

impl ServerOp {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            ServerOp::Info(info) => {
                frame::put_line(buf, &format!("INFO {}", serde_json::to_string(info)?));
            }
            ServerOp::Msg(msg) => {
                let line = match &msg.reply_to {
                    Some(reply) => format!("MSG {} {} {} {}", msg.subject, msg.sid, reply, msg.payload.len()),
                    None => format!("MSG {} {} {}", msg.subject, msg.sid, msg.payload.len()),
                };
                frame::put_line(buf, &line);
                frame::put_payload(buf, &msg.payload);
            }
            ServerOp::Ping => frame::put_line(buf, "PING"),
            ServerOp::Pong => frame::put_line(buf, "PONG"),
            ServerOp::Ok => frame::put_line(buf, "+OK"),
            ServerOp::Err(reason) => frame::put_line(buf, &format!("-ERR '{reason}'")),
        }
        Ok(())
    }

    /// Client side counterpart of [`ClientOp::decode`].
    pub fn decode(buf: &mut BytesMut, max_payload: usize) -> Result<Option<ServerOp>, ProtocolError> {
        let Some(line) = ControlLine::peek(buf)? else {
            return Ok(None);
        };
        let (verb, rest) = line.verb_and_rest();

        let op = match verb.as_str() {
            "INFO" => ServerOp::Info(serde_json::from_str(rest)?),
            "PING" => ServerOp::Ping,
            "PONG" => ServerOp::Pong,
            "+OK" => ServerOp::Ok,
            "-ERR" => ServerOp::Err(rest.trim_matches('\'').to_string()),
            "MSG" => {
                let args: Vec<&str> = rest.split_ascii_whitespace().collect();
                let (subject, sid, reply_to, size) = match args.as_slice() {
                    [subject, sid, size] => (*subject, *sid, None, *size),
                    [subject, sid, reply, size] => (*subject, *sid, Some(reply.to_string()), *size),
                    _ => return Err(ProtocolError::malformed("MSG", "expected <subject> <sid> [reply-to] <#bytes>")),
                };
                let sid = frame::parse_sid("MSG", sid)?;
                let size = frame::payload_size("MSG", size, max_payload)?;
                let subject = subject.to_string();
                return Ok(line.take_payload(buf, size)?.map(|payload| {
                    ServerOp::Msg(Message {
                        subject,
                        sid,
                        reply_to,
                        payload,
                    })
                }));
            }
            _ => return Err(ProtocolError::UnknownOp(verb)),
        };

        line.consume(buf);
        Ok(Some(op))
    }
}
