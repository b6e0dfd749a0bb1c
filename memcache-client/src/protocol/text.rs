use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::error;

use memcache_cluster::connection::{ConnectionError, PooledConnection};
use memcache_cluster::server_pool::{PoolAdmin, ServerPool};
use memcache_cluster::NodeRef;
use memcache_core::config::settings::ProtocolKind;
use memcache_core::{CacheItem, OpResult, ResultCode};
use memcache_protocol::text::{StoreVerb, TextCommand, TextFrame, TextReply, TextWire};

use crate::protocol::{
    broadcast, connection_failure, fan_out, ConcatMode, Initial, KeyRef, MutateMode, NodeResults, Protocol, StoreMode,
};

pub fn result_code(reply: &TextReply) -> ResultCode {
    match reply {
        TextReply::Stored
        | TextReply::Deleted
        | TextReply::Ok
        | TextReply::Number(_)
        | TextReply::Version(_)
        | TextReply::Stat { .. } => ResultCode::Success,
        TextReply::End | TextReply::NotFound => ResultCode::NotFound,
        TextReply::NotStored => ResultCode::NotStored,
        TextReply::Exists => ResultCode::DataExists,
        TextReply::ServerError(_) => ResultCode::ServerError,
        TextReply::Error | TextReply::ClientError(_) | TextReply::Unknown(_) => ResultCode::ProtocolError,
    }
}

/// Reads one reply line. A data block where a line was expected leaves the stream in an unknown
/// state, so the connection is poisoned.
async fn read_reply(connection: &mut PooledConnection<TextWire>) -> Result<TextReply, ConnectionError> {
    match connection.recv().await? {
        TextFrame::Line(line) => {
            let reply = TextReply::parse(&line);
            if let TextReply::Unknown(line) = &reply {
                error!("unexpected reply line `{}`", line);
                connection.poison();
            }
            Ok(reply)
        }
        TextFrame::Value { key, .. } => {
            connection.poison();
            Err(ConnectionError::UnexpectedReply(format!("VALUE {}", key)))
        }
    }
}

/// Reads `VALUE` blocks up to the closing `END`. Any other line ends the read with its code.
async fn read_values(connection: &mut PooledConnection<TextWire>) -> Result<Result<Vec<(String, CacheItem)>, ResultCode>, ConnectionError> {
    let mut values = Vec::new();
    loop {
        match connection.recv().await? {
            TextFrame::Value { key, flags, data, cas } => {
                let item = CacheItem {
                    flags,
                    data,
                    cas: cas.unwrap_or_default(),
                };
                values.push((key, item));
            }
            TextFrame::Line(line) => {
                return match TextReply::parse(&line) {
                    TextReply::End => Ok(Ok(values)),
                    reply => {
                        if let TextReply::Unknown(_) = reply {
                            connection.poison();
                        }
                        Ok(Err(result_code(&reply)))
                    }
                };
            }
        }
    }
}

#[derive(Debug)]
pub struct TextProtocol {
    pool: ServerPool<TextWire>,
}

impl TextProtocol {
    pub fn new(pool: ServerPool<TextWire>) -> Self {
        Self { pool }
    }

    async fn exchange(node: &NodeRef<TextWire>, command: TextCommand) -> Result<TextReply, ConnectionError> {
        let mut connection = node.acquire().await?;
        connection.send(command).await?;
        read_reply(&mut connection).await
    }

    /// Sends a single line command to the owner of `key` and returns its reply.
    async fn execute(&self, key: &KeyRef, command: TextCommand) -> Result<TextReply, ResultCode> {
        let Some(node) = self.pool.locate_node(key.locate_bytes()) else {
            return Err(ResultCode::NoServersAvailable);
        };
        Self::exchange(&node, command)
            .await
            .map_err(|error| connection_failure(&self.pool, &node, error))
    }

    async fn get_many(
        node: NodeRef<TextWire>,
        keys: Vec<&KeyRef>,
    ) -> Result<Result<Vec<(String, CacheItem)>, ResultCode>, ConnectionError> {
        let keys = keys.into_iter().map(|key| key.key.clone()).collect();
        let mut connection = node.acquire().await?;
        connection.send(TextCommand::Gets { keys }).await?;
        read_values(&mut connection).await
    }

    async fn stats_exchange(
        node: &NodeRef<TextWire>,
        group: Option<&str>,
    ) -> Result<Result<HashMap<String, String>, ResultCode>, ConnectionError> {
        let mut connection = node.acquire().await?;
        let group = group.map(str::to_string);
        connection.send(TextCommand::Stats { group }).await?;
        let mut stats = HashMap::new();
        loop {
            match read_reply(&mut connection).await? {
                TextReply::Stat { name, value } => {
                    stats.insert(name, value);
                }
                TextReply::End => return Ok(Ok(stats)),
                reply => return Ok(Err(result_code(&reply))),
            }
        }
    }

    async fn node_command(&self, node: &NodeRef<TextWire>, command: TextCommand) -> OpResult<TextReply> {
        match Self::exchange(node, command).await {
            Ok(reply) => match result_code(&reply) {
                ResultCode::Success => OpResult::ok(reply),
                code => code.into(),
            },
            Err(error) => connection_failure(&self.pool, node, error).into(),
        }
    }
}

#[async_trait]
impl Protocol for TextProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Text
    }

    fn pool(&self) -> &dyn PoolAdmin {
        &self.pool
    }

    async fn get(&self, key: &KeyRef) -> OpResult<CacheItem> {
        let Some(node) = self.pool.locate_node(key.locate_bytes()) else {
            return ResultCode::NoServersAvailable.into();
        };
        let read = async {
            let mut connection = node.acquire().await?;
            connection.send(TextCommand::Gets { keys: vec![key.key.clone()] }).await?;
            read_values(&mut connection).await
        };
        match read.await {
            Ok(Ok(values)) => match values.into_iter().find(|(k, _)| *k == key.key) {
                Some((_, item)) => OpResult::ok(item),
                None => ResultCode::NotFound.into(),
            },
            Ok(Err(code)) => code.into(),
            Err(error) => connection_failure(&self.pool, &node, error).into(),
        }
    }

    async fn get_multi(&self, keys: &[KeyRef]) -> OpResult<HashMap<String, CacheItem>> {
        fan_out(&self.pool, keys, |node, keys| Self::get_many(node, keys)).await
    }

    async fn store(&self, mode: StoreMode, key: &KeyRef, item: CacheItem, expiration: u32) -> OpResult<u64> {
        let verb = match mode {
            StoreMode::Set => StoreVerb::Set,
            StoreMode::Add => StoreVerb::Add,
            StoreMode::Replace => StoreVerb::Replace,
            StoreMode::CheckAndSet => StoreVerb::Cas,
        };
        let command = TextCommand::Store {
            verb,
            key: key.key.clone(),
            flags: item.flags,
            expiration,
            data: item.data,
            cas: item.cas,
        };
        match self.execute(key, command).await {
            Ok(reply) => result_code(&reply).into(),
            Err(code) => code.into(),
        }
    }

    async fn concatenate(&self, mode: ConcatMode, key: &KeyRef, data: Bytes) -> OpResult {
        let verb = match mode {
            ConcatMode::Append => StoreVerb::Append,
            ConcatMode::Prepend => StoreVerb::Prepend,
        };
        let command = TextCommand::Store {
            verb,
            key: key.key.clone(),
            flags: 0,
            expiration: 0,
            data,
            cas: 0,
        };
        match self.execute(key, command).await {
            Ok(reply) => result_code(&reply).into(),
            Err(code) => code.into(),
        }
    }

    async fn delete(&self, key: &KeyRef, delay: u32) -> OpResult {
        let time = (delay != 0).then_some(delay);
        let command = TextCommand::Delete { key: key.key.clone(), time };
        match self.execute(key, command).await {
            Ok(reply) => result_code(&reply).into(),
            Err(code) => code.into(),
        }
    }

    async fn mutate(&self, mode: MutateMode, key: &KeyRef, delta: u64, initial: Option<Initial>) -> OpResult<u64> {
        if initial.is_some() {
            return ResultCode::NotSupported.into();
        }
        let key_name = key.key.clone();
        let command = match mode {
            MutateMode::Increment => TextCommand::Incr { key: key_name, delta },
            MutateMode::Decrement => TextCommand::Decr { key: key_name, delta },
        };
        match self.execute(key, command).await {
            Ok(TextReply::Number(value)) => OpResult::ok(value),
            Ok(reply) => match result_code(&reply) {
                ResultCode::Success => ResultCode::ProtocolError.into(),
                code => code.into(),
            },
            Err(code) => code.into(),
        }
    }

    async fn flush_all(&self, delay: u32) -> OpResult<NodeResults<()>> {
        let delay = (delay != 0).then_some(delay);
        broadcast(&self.pool, |node| async move {
            self.node_command(&node, TextCommand::FlushAll { delay }).await.map(|_| ())
        })
        .await
    }

    async fn stats(&self, group: Option<&str>) -> OpResult<NodeResults<HashMap<String, String>>> {
        broadcast(&self.pool, |node| async move {
            match Self::stats_exchange(&node, group).await {
                Ok(Ok(stats)) => OpResult::ok(stats),
                Ok(Err(code)) => code.into(),
                Err(error) => connection_failure(&self.pool, &node, error).into(),
            }
        })
        .await
    }

    async fn version(&self) -> OpResult<NodeResults<String>> {
        broadcast(&self.pool, |node| async move {
            match self.node_command(&node, TextCommand::Version).await {
                OpResult { value: Some(TextReply::Version(version)), .. } => OpResult::ok(version),
                OpResult { code: ResultCode::Success, .. } => ResultCode::ProtocolError.into(),
                OpResult { code, .. } => code.into(),
            }
        })
        .await
    }
}
