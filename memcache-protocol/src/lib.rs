use std::fmt::Debug;

use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

pub mod binary;
pub mod error;
pub mod text;

/// One of the two wire encodings. Implemented by marker types so the connection pool and the
/// health probe stay protocol agnostic.
pub trait WireProtocol: Debug + Send + Sync + 'static {
    type Request: Send + 'static;
    type Frame: Debug + Send + 'static;
    type Codec: Decoder<Item = Self::Frame, Error = ProtocolError>
        + Encoder<Self::Request, Error = ProtocolError>
        + Default
        + Send
        + Unpin
        + 'static;

    /// Cheapest request that gets a reply from a healthy server.
    fn noop() -> Self::Request;

    fn is_noop_reply(frame: &Self::Frame) -> bool;

    fn name() -> &'static str;
}
