use bytes::{BufMut, BytesMut};

use memcache_core::ext::{read_u16, read_u32, read_u64, read_u8};

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 24;
pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;

/// The fixed 24 byte header shared by requests and responses. Bytes 6..8 hold the vbucket id
/// in a request and the status in a response.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub status_or_vbucket: u16,
    pub total_body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let truncated = || ProtocolError::TruncatedHeader {
            expected: HEADER_LEN,
            actual: src.len(),
        };
        if src.len() < HEADER_LEN {
            return Err(truncated());
        }
        let magic = read_u8(src, 0).ok_or_else(truncated)?;
        if magic != REQUEST_MAGIC && magic != RESPONSE_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }
        let header = Header {
            magic,
            opcode: read_u8(src, 1).ok_or_else(truncated)?,
            key_len: read_u16(src, 2).ok_or_else(truncated)?,
            extras_len: read_u8(src, 4).ok_or_else(truncated)?,
            data_type: read_u8(src, 5).ok_or_else(truncated)?,
            status_or_vbucket: read_u16(src, 6).ok_or_else(truncated)?,
            total_body_len: read_u32(src, 8).ok_or_else(truncated)?,
            opaque: read_u32(src, 12).ok_or_else(truncated)?,
            cas: read_u64(src, 16).ok_or_else(truncated)?,
        };
        if header.extras_len as u64 + header.key_len as u64 > header.total_body_len as u64 {
            return Err(ProtocolError::InconsistentLengths {
                extras: header.extras_len,
                key: header.key_len,
                body: header.total_body_len,
            });
        }
        Ok(header)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN);
        dst.put_u8(self.magic);
        dst.put_u8(self.opcode);
        dst.put_u16(self.key_len);
        dst.put_u8(self.extras_len);
        dst.put_u8(self.data_type);
        dst.put_u16(self.status_or_vbucket);
        dst.put_u32(self.total_body_len);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
    }

    pub fn value_len(&self) -> usize {
        self.total_body_len as usize - self.extras_len as usize - self.key_len as usize
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::binary::header::{Header, HEADER_LEN, RESPONSE_MAGIC};
    use crate::error::ProtocolError;

    #[test]
    fn test_header_layout() {
        let header = Header {
            magic: RESPONSE_MAGIC,
            opcode: 0x01,
            key_len: 3,
            extras_len: 4,
            data_type: 0,
            status_or_vbucket: 0x0002,
            total_body_len: 12,
            opaque: 0xdeadbeef,
            cas: 42,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..8], &[0x81, 0x01, 0x00, 0x03, 0x04, 0x00, 0x00, 0x02]);
        assert_eq!(&buf[12..16], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(Header::decode(&buf).unwrap(), header);
        assert_eq!(header.value_len(), 5);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(matches!(
            Header::decode(&[0x81; 10]),
            Err(ProtocolError::TruncatedHeader { expected: 24, actual: 10 })
        ));
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = 0x42;
        assert!(matches!(Header::decode(&buf), Err(ProtocolError::InvalidMagic(0x42))));
        buf[0] = RESPONSE_MAGIC;
        buf[3] = 8;
        buf[4] = 4;
        buf[11] = 10;
        assert!(matches!(
            Header::decode(&buf),
            Err(ProtocolError::InconsistentLengths { extras: 4, key: 8, body: 10 })
        ));
    }
}
