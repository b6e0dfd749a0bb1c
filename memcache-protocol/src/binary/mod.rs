use crate::WireProtocol;

pub mod codec;
pub mod header;
pub mod opcode;
pub mod status;

pub use codec::{BinaryCodec, BinaryRequest, BinaryResponse};
pub use header::{Header, HEADER_LEN, REQUEST_MAGIC, RESPONSE_MAGIC};
pub use opcode::Opcode;
pub use status::Status;

#[derive(Debug, Copy, Clone, Default)]
pub struct BinaryWire;

impl WireProtocol for BinaryWire {
    type Request = BinaryRequest;
    type Frame = BinaryResponse;
    type Codec = BinaryCodec;

    fn noop() -> Self::Request {
        BinaryRequest::new(Opcode::Noop)
    }

    fn is_noop_reply(frame: &Self::Frame) -> bool {
        frame.header.opcode == Opcode::Noop as u8 && frame.status() == Status::NoError
    }

    fn name() -> &'static str {
        "binary"
    }
}
