use thiserror::Error;

use crate::result_code::ResultCode;

pub const MAX_TEXT_KEY_LEN: usize = 250;
pub const MAX_BINARY_KEY_LEN: usize = 65535;
pub const MAX_PREFIX_LEN: usize = 128;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum KeyError {
    #[error("empty key")]
    Empty,
    #[error("key length {len} exceeds the maximum of {max} bytes")]
    TooLong { len: usize, max: usize },
    #[error("key contains whitespace or control characters")]
    IllegalCharacter,
    #[error("prefix length {0} exceeds the maximum of 128 bytes")]
    PrefixTooLong(usize),
}

impl From<KeyError> for ResultCode {
    fn from(_: KeyError) -> Self {
        ResultCode::BadKeyProvided
    }
}

/// Turns application keys into wire keys: prepends the configured prefix and enforces the
/// protocol key limits. Keys are never truncated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeyTransformer {
    prefix: String,
    max_len: usize,
    allow_whitespace: bool,
}

impl KeyTransformer {
    pub fn text(prefix: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(prefix, MAX_TEXT_KEY_LEN, false)
    }

    pub fn binary(prefix: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(prefix, MAX_BINARY_KEY_LEN, true)
    }

    fn new(prefix: impl Into<String>, max_len: usize, allow_whitespace: bool) -> Result<Self, KeyError> {
        let prefix = prefix.into();
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(KeyError::PrefixTooLong(prefix.len()));
        }
        let transformer = Self {
            prefix,
            max_len,
            allow_whitespace,
        };
        transformer.check_chars(&transformer.prefix)?;
        Ok(transformer)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn with_prefix(&self, prefix: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(prefix, self.max_len, self.allow_whitespace)
    }

    pub fn transform(&self, key: &str) -> Result<String, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        let len = self.prefix.len() + key.len();
        if len > self.max_len {
            return Err(KeyError::TooLong { len, max: self.max_len });
        }
        self.check_chars(key)?;
        let mut wire_key = String::with_capacity(len);
        wire_key.push_str(&self.prefix);
        wire_key.push_str(key);
        Ok(wire_key)
    }

    /// Inverse of [`KeyTransformer::transform`] for keys echoed back by the server.
    pub fn strip<'a>(&self, wire_key: &'a str) -> &'a str {
        wire_key.strip_prefix(self.prefix.as_str()).unwrap_or(wire_key)
    }

    fn check_chars(&self, key: &str) -> Result<(), KeyError> {
        if self.allow_whitespace {
            return Ok(());
        }
        if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            Err(KeyError::IllegalCharacter)
        } else {
            Ok(())
        }
    }
}
