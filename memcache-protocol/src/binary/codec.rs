use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::binary::header::{Header, HEADER_LEN, REQUEST_MAGIC, RESPONSE_MAGIC};
use crate::binary::opcode::Opcode;
use crate::binary::status::Status;
use crate::error::ProtocolError;

/// Largest body accepted from a server. memcached caps items at 1MB by default and 1GB at most.
pub const MAX_BODY_LEN: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BinaryRequest {
    pub opcode: Opcode,
    pub key: Bytes,
    pub extras: Bytes,
    pub value: Bytes,
    pub opaque: u32,
    pub cas: u64,
    pub vbucket: u16,
}

impl BinaryRequest {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            key: Bytes::new(),
            extras: Bytes::new(),
            value: Bytes::new(),
            opaque: 0,
            cas: 0,
            vbucket: 0,
        }
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    pub fn extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    pub fn opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BinaryResponse {
    pub header: Header,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl BinaryResponse {
    pub fn status(&self) -> Status {
        Status::from(self.header.status_or_vbucket)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.header.opcode).ok()
    }

    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    /// Item flags from the extras of a get family reply.
    pub fn flags(&self) -> u32 {
        if self.extras.len() >= 4 {
            let mut extras = &self.extras[..4];
            extras.get_u32()
        } else {
            0
        }
    }

    /// Numeric counter value of an increment or decrement reply.
    pub fn counter(&self) -> Option<u64> {
        if self.value.len() == 8 {
            let mut value = &self.value[..];
            Some(value.get_u64())
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct BinaryCodec;

impl Encoder<BinaryRequest> for BinaryCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: BinaryRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let key_len = u16::try_from(item.key.len()).map_err(|_| ProtocolError::KeyTooLong(item.key.len()))?;
        let extras_len = u8::try_from(item.extras.len()).map_err(|_| ProtocolError::BodyTooLarge(item.extras.len()))?;
        let body_len = item.extras.len() + item.key.len() + item.value.len();
        let total_body_len = u32::try_from(body_len).map_err(|_| ProtocolError::BodyTooLarge(body_len))?;
        let header = Header {
            magic: REQUEST_MAGIC,
            opcode: item.opcode as u8,
            key_len,
            extras_len,
            data_type: 0,
            status_or_vbucket: item.vbucket,
            total_body_len,
            opaque: item.opaque,
            cas: item.cas,
        };
        dst.reserve(HEADER_LEN + body_len);
        header.encode(dst);
        dst.extend_from_slice(&item.extras);
        dst.extend_from_slice(&item.key);
        dst.extend_from_slice(&item.value);
        Ok(())
    }
}

impl Decoder for BinaryCodec {
    type Item = BinaryResponse;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }
        let header = Header::decode(&src[..HEADER_LEN])?;
        if header.magic != RESPONSE_MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic));
        }
        let body_len = header.total_body_len as usize;
        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge(body_len));
        }
        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        let mut body = src.split_to(frame_len).freeze();
        body.advance(HEADER_LEN);
        let extras = body.split_to(header.extras_len as usize);
        let key = body.split_to(header.key_len as usize);
        Ok(Some(BinaryResponse {
            header,
            extras,
            key,
            value: body,
        }))
    }
}
