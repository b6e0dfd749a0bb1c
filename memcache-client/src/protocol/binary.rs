use std::sync::atomic::{AtomicU32, Ordering};

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use memcache_cluster::connection::ConnectionError;
use memcache_cluster::server_pool::{PoolAdmin, ServerPool};
use memcache_cluster::NodeRef;
use memcache_core::config::settings::ProtocolKind;
use memcache_core::{CacheItem, OpResult, ResultCode};
use memcache_protocol::binary::{BinaryRequest, BinaryResponse, BinaryWire, Opcode, Status};

use crate::protocol::{
    broadcast, connection_failure, fan_out, ConcatMode, Initial, KeyRef, MutateMode, NodeResults, Protocol, StoreMode,
};

/// Expiration sent with a counter request that must not create the item.
const NO_CREATE: u32 = 0xffff_ffff;

pub fn result_code(status: Status) -> ResultCode {
    match status {
        Status::NoError => ResultCode::Success,
        Status::KeyNotFound => ResultCode::NotFound,
        Status::KeyExists => ResultCode::DataExists,
        Status::ItemNotStored => ResultCode::NotStored,
        Status::ValueTooLarge
        | Status::OutOfMemory
        | Status::InternalError
        | Status::Busy
        | Status::TemporaryFailure => ResultCode::ServerError,
        Status::UnknownCommand | Status::NotSupported => ResultCode::NotSupported,
        Status::AuthError | Status::AuthContinue => ResultCode::Failure,
        Status::InvalidArguments | Status::NonNumeric | Status::WrongVBucket | Status::Other(_) => {
            ResultCode::ProtocolError
        }
    }
}

fn item(response: &BinaryResponse) -> CacheItem {
    CacheItem {
        flags: response.flags(),
        data: response.value.clone(),
        cas: response.cas(),
    }
}

#[derive(Debug)]
pub struct BinaryProtocol {
    pool: ServerPool<BinaryWire>,
    opaque: AtomicU32,
}

impl BinaryProtocol {
    pub fn new(pool: ServerPool<BinaryWire>) -> Self {
        Self {
            pool,
            opaque: AtomicU32::new(1),
        }
    }

    /// Reserves `count` consecutive correlation ids.
    fn next_opaque(&self, count: u32) -> u32 {
        self.opaque.fetch_add(count, Ordering::Relaxed)
    }

    async fn round_trip(&self, node: &NodeRef<BinaryWire>, request: BinaryRequest) -> Result<BinaryResponse, ConnectionError> {
        let opaque = request.opaque;
        let mut connection = node.acquire().await?;
        connection.send(request).await?;
        loop {
            let response = connection.recv().await?;
            if response.opaque() == opaque {
                return Ok(response);
            }
            debug!("{} skip response with stale opaque {}", node.endpoint(), response.opaque());
        }
    }

    /// Sends `request` to the owner of `key`.
    async fn execute(&self, key: &KeyRef, request: BinaryRequest) -> Result<BinaryResponse, ResultCode> {
        let Some(node) = self.pool.locate_node(key.locate_bytes()) else {
            return Err(ResultCode::NoServersAvailable);
        };
        let request = request.opaque(self.next_opaque(1));
        self.round_trip(&node, request)
            .await
            .map_err(|error| connection_failure(&self.pool, &node, error))
    }

    async fn get_many(
        &self,
        node: NodeRef<BinaryWire>,
        keys: Vec<&KeyRef>,
    ) -> Result<Result<Vec<(String, CacheItem)>, ResultCode>, ConnectionError> {
        let count = keys.len() as u32;
        let base = self.next_opaque(count + 1);
        let noop = base.wrapping_add(count);
        let mut connection = node.acquire().await?;
        for (index, key) in keys.iter().enumerate() {
            let request = BinaryRequest::new(Opcode::GetKQ)
                .key(key.key.clone())
                .opaque(base.wrapping_add(index as u32));
            connection.feed(request).await?;
        }
        connection.feed(BinaryRequest::new(Opcode::Noop).opaque(noop)).await?;
        connection.flush().await?;
        let mut found = Vec::with_capacity(keys.len());
        loop {
            let response = connection.recv().await?;
            if response.opaque() == noop {
                break;
            }
            let index = response.opaque().wrapping_sub(base) as usize;
            match keys.get(index) {
                Some(key) if response.status() == Status::NoError => {
                    found.push((key.key.clone(), item(&response)));
                }
                Some(key) => {
                    debug!("{} get {} returned {:?}", node.endpoint(), key.key, response.status());
                }
                None => {
                    debug!("{} skip response with stale opaque {}", node.endpoint(), response.opaque());
                }
            }
        }
        trace!("{} answered {} of {} keys", node.endpoint(), found.len(), keys.len());
        Ok(Ok(found))
    }

    async fn stats_exchange(
        &self,
        node: &NodeRef<BinaryWire>,
        request: BinaryRequest,
    ) -> Result<Result<HashMap<String, String>, ResultCode>, ConnectionError> {
        let opaque = request.opaque;
        let mut connection = node.acquire().await?;
        connection.send(request).await?;
        let mut stats = HashMap::new();
        loop {
            let response = connection.recv().await?;
            if response.opaque() != opaque {
                continue;
            }
            if response.status() != Status::NoError {
                return Ok(Err(result_code(response.status())));
            }
            // an empty key terminates the sequence
            if response.key.is_empty() {
                return Ok(Ok(stats));
            }
            let name = String::from_utf8_lossy(&response.key).into_owned();
            let value = String::from_utf8_lossy(&response.value).into_owned();
            stats.insert(name, value);
        }
    }

    async fn node_stats(&self, node: NodeRef<BinaryWire>, group: Option<&str>) -> OpResult<HashMap<String, String>> {
        let mut request = BinaryRequest::new(Opcode::Stat).opaque(self.next_opaque(1));
        if let Some(group) = group {
            request = request.key(group.to_string());
        }
        match self.stats_exchange(&node, request).await {
            Ok(Ok(stats)) => OpResult::ok(stats),
            Ok(Err(code)) => code.into(),
            Err(error) => connection_failure(&self.pool, &node, error).into(),
        }
    }

    async fn node_request(&self, node: &NodeRef<BinaryWire>, request: BinaryRequest) -> OpResult<BinaryResponse> {
        let request = request.opaque(self.next_opaque(1));
        match self.round_trip(node, request).await {
            Ok(response) if response.status() == Status::NoError => OpResult::ok(response),
            Ok(response) => result_code(response.status()).into(),
            Err(error) => connection_failure(&self.pool, node, error).into(),
        }
    }
}

#[async_trait]
impl Protocol for BinaryProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Binary
    }

    fn pool(&self) -> &dyn PoolAdmin {
        &self.pool
    }

    async fn get(&self, key: &KeyRef) -> OpResult<CacheItem> {
        let request = BinaryRequest::new(Opcode::Get).key(key.key.clone());
        match self.execute(key, request).await {
            Ok(response) if response.status() == Status::NoError => OpResult::ok(item(&response)),
            Ok(response) => result_code(response.status()).into(),
            Err(code) => code.into(),
        }
    }

    async fn get_multi(&self, keys: &[KeyRef]) -> OpResult<HashMap<String, CacheItem>> {
        fan_out(&self.pool, keys, |node, keys| self.get_many(node, keys)).await
    }

    async fn store(&self, mode: StoreMode, key: &KeyRef, item: CacheItem, expiration: u32) -> OpResult<u64> {
        let opcode = match mode {
            StoreMode::Set | StoreMode::CheckAndSet => Opcode::Set,
            StoreMode::Add => Opcode::Add,
            StoreMode::Replace => Opcode::Replace,
        };
        let mut extras = BytesMut::with_capacity(8);
        extras.put_u32(item.flags);
        extras.put_u32(expiration);
        let cas = if mode == StoreMode::CheckAndSet { item.cas } else { 0 };
        let request = BinaryRequest::new(opcode)
            .key(key.key.clone())
            .extras(extras.freeze())
            .value(item.data)
            .cas(cas);
        match self.execute(key, request).await {
            Ok(response) if response.status() == Status::NoError => OpResult::ok(response.cas()),
            Ok(response) => result_code(response.status()).into(),
            Err(code) => code.into(),
        }
    }

    async fn concatenate(&self, mode: ConcatMode, key: &KeyRef, data: Bytes) -> OpResult {
        let opcode = match mode {
            ConcatMode::Append => Opcode::Append,
            ConcatMode::Prepend => Opcode::Prepend,
        };
        let request = BinaryRequest::new(opcode).key(key.key.clone()).value(data);
        match self.execute(key, request).await {
            Ok(response) => result_code(response.status()).into(),
            Err(code) => code.into(),
        }
    }

    async fn delete(&self, key: &KeyRef, delay: u32) -> OpResult {
        if delay != 0 {
            return ResultCode::NotSupported.into();
        }
        let request = BinaryRequest::new(Opcode::Delete).key(key.key.clone());
        match self.execute(key, request).await {
            Ok(response) => result_code(response.status()).into(),
            Err(code) => code.into(),
        }
    }

    async fn mutate(&self, mode: MutateMode, key: &KeyRef, delta: u64, initial: Option<Initial>) -> OpResult<u64> {
        let opcode = match mode {
            MutateMode::Increment => Opcode::Increment,
            MutateMode::Decrement => Opcode::Decrement,
        };
        let (initial, expiration) = match initial {
            Some(initial) => (initial.value, initial.expiration),
            None => (0, NO_CREATE),
        };
        let mut extras = BytesMut::with_capacity(20);
        extras.put_u64(delta);
        extras.put_u64(initial);
        extras.put_u32(expiration);
        let request = BinaryRequest::new(opcode).key(key.key.clone()).extras(extras.freeze());
        match self.execute(key, request).await {
            Ok(response) if response.status() == Status::NoError => match response.counter() {
                Some(value) => OpResult::ok(value),
                None => ResultCode::ProtocolError.into(),
            },
            Ok(response) => result_code(response.status()).into(),
            Err(code) => code.into(),
        }
    }

    async fn flush_all(&self, delay: u32) -> OpResult<NodeResults<()>> {
        broadcast(&self.pool, |node| async move {
            let mut request = BinaryRequest::new(Opcode::Flush);
            if delay != 0 {
                request = request.extras(Bytes::copy_from_slice(&delay.to_be_bytes()));
            }
            self.node_request(&node, request).await.map(|_| ())
        })
        .await
    }

    async fn stats(&self, group: Option<&str>) -> OpResult<NodeResults<HashMap<String, String>>> {
        broadcast(&self.pool, |node| self.node_stats(node, group)).await
    }

    async fn version(&self) -> OpResult<NodeResults<String>> {
        broadcast(&self.pool, |node| async move {
            let response = self.node_request(&node, BinaryRequest::new(Opcode::Version)).await;
            response.map(|response| String::from_utf8_lossy(&response.value).into_owned())
        })
        .await
    }
}
