use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::binary::codec::MAX_BODY_LEN;
use crate::error::ProtocolError;
use crate::text::command::TextCommand;

pub const MAX_LINE_LEN: usize = 4096;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TextFrame {
    Value {
        key: String,
        flags: u32,
        data: Bytes,
        cas: Option<u64>,
    },
    Line(String),
}

#[derive(Debug, Clone)]
struct ValueHeader {
    key: String,
    flags: u32,
    len: usize,
    cas: Option<u64>,
}

impl ValueHeader {
    fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedLine(line.to_string());
        let mut parts = line.split_ascii_whitespace();
        if parts.next() != Some("VALUE") {
            return Err(malformed());
        }
        let key = parts.next().ok_or_else(malformed)?.to_string();
        let flags = parts.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
        let len: u64 = parts.next().and_then(|l| l.parse().ok()).ok_or_else(malformed)?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= MAX_BODY_LEN)
            .ok_or(ProtocolError::BodyTooLarge(usize::try_from(len).unwrap_or(usize::MAX)))?;
        let cas = match parts.next() {
            Some(cas) => Some(cas.parse().map_err(|_| malformed())?),
            None => None,
        };
        Ok(Self { key, flags, len, cas })
    }
}

/// Splits a text protocol byte stream into reply lines and `VALUE` blocks. A `VALUE` header
/// and its data block are emitted together as one frame.
#[derive(Debug, Default)]
pub struct TextCodec {
    pending: Option<ValueHeader>,
}

impl Encoder<TextCommand> for TextCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: TextCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.line();
        dst.reserve(line.len() + 2);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(CRLF);
        if let Some(data) = item.data() {
            dst.reserve(data.len() + 2);
            dst.extend_from_slice(data);
            dst.extend_from_slice(CRLF);
        }
        Ok(())
    }
}

impl Decoder for TextCodec {
    type Item = TextFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(header) = &self.pending {
                let block_len = header.len.checked_add(2).ok_or(ProtocolError::BodyTooLarge(header.len))?;
                if src.len() < block_len {
                    src.reserve(block_len - src.len());
                    return Ok(None);
                }
                if &src[header.len..block_len] != CRLF {
                    return Err(ProtocolError::UnterminatedData);
                }
                let mut block = src.split_to(block_len).freeze();
                block.truncate(header.len);
                let Some(header) = self.pending.take() else {
                    return Ok(None);
                };
                return Ok(Some(TextFrame::Value {
                    key: header.key,
                    flags: header.flags,
                    data: block,
                    cas: header.cas,
                }));
            }
            let Some(end) = src.windows(2).position(|w| w == CRLF) else {
                if src.len() > MAX_LINE_LEN {
                    return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
                }
                return Ok(None);
            };
            let raw = src.split_to(end);
            src.advance(2);
            let line = String::from_utf8_lossy(&raw).into_owned();
            if line.starts_with("VALUE ") {
                self.pending = Some(ValueHeader::parse(&line)?);
                continue;
            }
            return Ok(Some(TextFrame::Line(line)));
        }
    }
}
