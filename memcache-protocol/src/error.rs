use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header needs {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
    #[error("invalid magic byte {0:#04x}")]
    InvalidMagic(u8),
    #[error("extras length {extras} plus key length {key} exceed body length {body}")]
    InconsistentLengths { extras: u8, key: u16, body: u32 },
    #[error("body length {0} exceeds the maximum frame size")]
    BodyTooLarge(usize),
    #[error("key length {0} does not fit the wire format")]
    KeyTooLong(usize),
    #[error("malformed line `{0}`")]
    MalformedLine(String),
    #[error("data block is not terminated by CRLF")]
    UnterminatedData,
    #[error("line exceeds {0} bytes without CRLF")]
    LineTooLong(usize),
}
