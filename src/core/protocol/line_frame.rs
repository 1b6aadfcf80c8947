// src/core/protocol/line_frame.rs

//! A line-framed request/response protocol and its `Encoder`/`Decoder`.
//!
//! Requests are single lines terminated by `\n` (a preceding `\r` is
//! stripped). Replies are `+<text>\r\n` for success and `-<text>\r\n` for
//! errors.

use crate::core::KeepDrainError;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

const CRLF: &[u8] = b"\r\n";

/// Requests longer than this are rejected instead of buffered.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// One decoded request line, split on ASCII whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFrame {
    pub parts: Vec<String>,
}

impl LineFrame {
    pub fn name(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.parts.get(1..).unwrap_or_default()
    }
}

/// A reply to a `LineFrame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }
}

/// A `tokio_util::codec` implementation for `LineFrame` requests and `Reply` responses.
#[derive(Debug, Default)]
pub struct LineFrameCodec {
    /// How far into the buffer we have already searched for a newline.
    next_index: usize,
}

impl Decoder for LineFrameCodec {
    type Item = LineFrame;
    type Error = KeepDrainError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(KeepDrainError::FrameTooLong {
                        limit: MAX_LINE_LENGTH,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            if end > MAX_LINE_LENGTH {
                return Err(KeepDrainError::FrameTooLong {
                    limit: MAX_LINE_LENGTH,
                });
            }

            let line = src.split_to(end + 1);
            let mut line = &line[..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let text = std::str::from_utf8(line)?;
            let parts: Vec<String> = text.split_ascii_whitespace().map(str::to_string).collect();

            // Blank lines are keep-alive noise, not requests.
            if parts.is_empty() {
                if src.is_empty() {
                    return Ok(None);
                }
                continue;
            }
            return Ok(Some(LineFrame { parts }));
        }
    }

    /// A peer that hangs up mid-line has simply gone away: the unterminated
    /// tail is dropped rather than reported as an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!("Discarding {} byte(s) of an unterminated request at EOF.", src.len());
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<Reply> for LineFrameCodec {
    type Error = KeepDrainError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (prefix, text) = match &item {
            Reply::Simple(s) => (b'+', s),
            Reply::Error(s) => (b'-', s),
        };
        if text.contains(['\r', '\n']) {
            return Err(KeepDrainError::InvalidFrame(
                "reply text cannot contain line breaks".to_string(),
            ));
        }
        dst.reserve(text.len() + 3);
        dst.extend_from_slice(&[prefix]);
        dst.extend_from_slice(text.as_bytes());
        dst.extend_from_slice(CRLF);
        Ok(())
    }
}

/// Reads one reply out of `src`, for clients of the line protocol.
pub fn decode_reply(src: &mut BytesMut) -> Result<Option<Reply>, KeepDrainError> {
    let Some(pos) = src.windows(2).position(|w| w == CRLF) else {
        return Ok(None);
    };
    if pos == 0 {
        return Err(KeepDrainError::InvalidFrame("empty reply".to_string()));
    }
    let text = std::str::from_utf8(&src[1..pos])?.to_string();
    let reply = match src[0] {
        b'+' => Reply::Simple(text),
        b'-' => Reply::Error(text),
        other => {
            return Err(KeepDrainError::InvalidFrame(format!(
                "unexpected reply prefix '{}'",
                other as char
            )));
        }
    };
    src.advance(pos + CRLF.len());
    Ok(Some(reply))
}
