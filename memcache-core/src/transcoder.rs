use std::fmt::Debug;
use std::marker::PhantomData;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Flag bit set on payloads written by [`JsonTranscoder`].
pub const FLAG_JSON: u32 = 6;

/// Converts application values to cache payloads and back. The flags travel with the payload
/// and are the only part of an item the client itself ever looks at.
pub trait Transcoder: Debug + Send + Sync + 'static {
    type Value: Send;

    fn serialize(&self, value: &Self::Value) -> anyhow::Result<(u32, Bytes)>;

    fn deserialize(&self, flags: u32, data: Bytes) -> anyhow::Result<Self::Value>;

    /// Compressed payloads can not be concatenated server side.
    fn compression(&self) -> bool {
        false
    }
}

/// Bytes in, bytes out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTranscoder;

impl Transcoder for RawTranscoder {
    type Value = Bytes;

    fn serialize(&self, value: &Self::Value) -> anyhow::Result<(u32, Bytes)> {
        Ok((0, value.clone()))
    }

    fn deserialize(&self, _flags: u32, data: Bytes) -> anyhow::Result<Self::Value> {
        Ok(data)
    }
}

pub struct JsonTranscoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonTranscoder<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonTranscoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for JsonTranscoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonTranscoder")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Transcoder for JsonTranscoder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn serialize(&self, value: &Self::Value) -> anyhow::Result<(u32, Bytes)> {
        let bytes = serde_json::to_vec(value).context(std::any::type_name::<T>())?;
        Ok((FLAG_JSON, Bytes::from(bytes)))
    }

    fn deserialize(&self, flags: u32, data: Bytes) -> anyhow::Result<Self::Value> {
        if flags & FLAG_JSON != FLAG_JSON {
            return Err(anyhow!("payload flags {:#x} do not mark a json value", flags));
        }
        serde_json::from_slice(&data).context(std::any::type_name::<T>())
    }
}
