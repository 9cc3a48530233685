/*
Every operation starts with a control line:

    <VERB> [arg ...]\r\n

PUB and MSG carry a payload whose size is the last control line argument:

    <VERB> [arg ...] <#bytes>\r\n
    <payload bytes>\r\n
*/

use bytes::{Buf, Bytes, BytesMut};
use crate::ProtocolError;

pub const CRLF: &[u8] = b"\r\n";

/// Longest control line accepted before the peer is considered broken.
pub const MAX_CONTROL_LINE: usize = 4096;

/// A control line found at the front of a read buffer. Nothing is consumed
/// until the caller knows the whole operation is buffered.
#[derive(Debug)]
pub(crate) struct ControlLine {
    pub text: String,
    /// Length of the line including its CRLF.
    pub len: usize,
}

impl ControlLine {
    pub fn peek(buf: &[u8]) -> Result<Option<ControlLine>, ProtocolError> {
        match buf.windows(CRLF.len()).position(|w| w == CRLF) {
            Some(end) if end > MAX_CONTROL_LINE => Err(ProtocolError::ControlLineTooLong {
                max: MAX_CONTROL_LINE,
            }),
            Some(end) => {
                let text = std::str::from_utf8(&buf[..end])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                Ok(Some(ControlLine {
                    text,
                    len: end + CRLF.len(),
                }))
            }
            None if buf.len() > MAX_CONTROL_LINE => Err(ProtocolError::ControlLineTooLong {
                max: MAX_CONTROL_LINE,
            }),
            None => Ok(None),
        }
    }

    /// Splits off the verb, upper-cased, and the remainder of the line.
    pub fn verb_and_rest(&self) -> (String, &str) {
        let trimmed = self.text.trim();
        match trimmed.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
            None => (trimmed.to_ascii_uppercase(), ""),
        }
    }

    /// Drops this control line (and nothing else) from the buffer.
    pub fn consume(self, buf: &mut BytesMut) {
        buf.advance(self.len);
    }

    /// Takes this line plus its `size` byte payload from the buffer. Returns
    /// `None` and leaves the buffer alone while the payload is incomplete.
    pub fn take_payload(
        self,
        buf: &mut BytesMut,
        size: usize,
    ) -> Result<Option<Bytes>, ProtocolError> {
        let needed = self.len + size + CRLF.len();
        if buf.len() < needed {
            return Ok(None);
        }
        if &buf[self.len + size..needed] != CRLF {
            return Err(ProtocolError::MissingPayloadTerminator);
        }

        buf.advance(self.len);
        let payload = buf.split_to(size).freeze();
        buf.advance(CRLF.len());
        Ok(Some(payload))
    }
}

/// Parses the trailing `<#bytes>` argument of PUB/MSG and checks it against
/// the negotiated limit before any payload byte is buffered.
pub(crate) fn payload_size(
    op: &'static str,
    raw: &str,
    max_payload: usize,
) -> Result<usize, ProtocolError> {
    let size: usize = raw
        .parse()
        .map_err(|_| ProtocolError::malformed(op, format!("invalid payload size {raw:?}")))?;
    if size > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: max_payload,
        });
    }
    Ok(size)
}

pub(crate) fn parse_sid(op: &'static str, raw: &str) -> Result<u64, ProtocolError> {
    raw.parse()
        .map_err(|_| ProtocolError::malformed(op, format!("invalid sid {raw:?}")))
}

pub(crate) fn put_line(buf: &mut BytesMut, line: &str) {
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(CRLF);
}

pub(crate) fn put_payload(buf: &mut BytesMut, payload: &[u8]) {
    buf.extend_from_slice(payload);
    buf.extend_from_slice(CRLF);
}
