use crate::WireProtocol;

pub mod codec;
pub mod command;
pub mod reply;

pub use codec::{TextCodec, TextFrame, MAX_LINE_LEN};
pub use command::{StoreVerb, TextCommand};
pub use reply::TextReply;

#[derive(Debug, Copy, Clone, Default)]
pub struct TextWire;

impl WireProtocol for TextWire {
    type Request = TextCommand;
    type Frame = TextFrame;
    type Codec = TextCodec;

    fn noop() -> Self::Request {
        TextCommand::Version
    }

    fn is_noop_reply(frame: &Self::Frame) -> bool {
        match frame {
            TextFrame::Line(line) => matches!(TextReply::parse(line), TextReply::Version(_)),
            TextFrame::Value { .. } => false,
        }
    }

    fn name() -> &'static str {
        "text"
    }
}
