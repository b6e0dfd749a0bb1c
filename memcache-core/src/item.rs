use bytes::Bytes;

use crate::result_code::ResultCode;

/// A payload as stored on the server: opaque flags, raw bytes and the CAS version.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CacheItem {
    pub flags: u32,
    pub data: Bytes,
    pub cas: u64,
}

impl CacheItem {
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
            cas: 0,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

/// Result code plus the value an operation produced, if any.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpResult<T = ()> {
    pub code: ResultCode,
    pub value: Option<T>,
}

impl<T> OpResult<T> {
    pub fn new(code: ResultCode, value: Option<T>) -> Self {
        Self { code, value }
    }

    pub fn ok(value: T) -> Self {
        Self {
            code: ResultCode::Success,
            value: Some(value),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn map<U, F>(self, f: F) -> OpResult<U>
    where
        F: FnOnce(T) -> U,
    {
        OpResult {
            code: self.code,
            value: self.value.map(f),
        }
    }
}

impl OpResult<()> {
    pub fn success() -> Self {
        Self::ok(())
    }
}

impl<T> From<ResultCode> for OpResult<T> {
    fn from(code: ResultCode) -> Self {
        Self { code, value: None }
    }
}
