use std::fmt::{Display, Formatter};

/// Outcome vocabulary shared by the binary and text protocols.
///
/// Not-found, not-stored and CAS conflicts are ordinary results, not faults.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResultCode {
    Success,
    NotFound,
    NotStored,
    /// CAS token mismatch or item already present.
    DataExists,
    ServerError,
    ProtocolError,
    Failure,
    NoServersAvailable,
    ConnectionFailure,
    /// The transcoder could not turn the payload into a value (or back).
    PayloadFailure,
    /// Some nodes of a multi-node call failed, the rest answered.
    SomeErrors,
    End,
    BadKeyProvided,
    NotSupported,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }

    /// Numeric codes as exposed by the php memcached extension.
    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Failure => 1,
            ResultCode::ProtocolError => 8,
            ResultCode::ServerError => 10,
            ResultCode::ConnectionFailure => 11,
            ResultCode::DataExists => 12,
            ResultCode::NotStored => 14,
            ResultCode::NotFound => 16,
            ResultCode::SomeErrors => 19,
            ResultCode::NoServersAvailable => 20,
            ResultCode::End => 21,
            ResultCode::NotSupported => 28,
            ResultCode::BadKeyProvided => 33,
            ResultCode::PayloadFailure => -1001,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::NotFound => "NOT FOUND",
            ResultCode::NotStored => "NOT STORED",
            ResultCode::DataExists => "DATA EXISTS",
            ResultCode::ServerError => "SERVER ERROR",
            ResultCode::ProtocolError => "PROTOCOL ERROR",
            ResultCode::Failure => "FAILURE",
            ResultCode::NoServersAvailable => "NO SERVERS DEFINED",
            ResultCode::ConnectionFailure => "CONNECTION FAILURE",
            ResultCode::PayloadFailure => "PAYLOAD FAILURE",
            ResultCode::SomeErrors => "SOME ERRORS WERE REPORTED",
            ResultCode::End => "END",
            ResultCode::BadKeyProvided => "BAD KEY PROVIDED",
            ResultCode::NotSupported => "NOT SUPPORTED",
        }
    }
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}
