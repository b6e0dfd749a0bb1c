use std::fmt::Debug;
use std::future::Future;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::warn;

use memcache_cluster::connection::ConnectionError;
use memcache_cluster::server_pool::{PoolAdmin, ServerPool};
use memcache_cluster::NodeRef;
use memcache_core::config::settings::ProtocolKind;
use memcache_core::{CacheItem, OpResult, ResultCode};
use memcache_protocol::WireProtocol;

pub mod binary;
pub mod text;

/// Per node results keyed by node identity (`host:port`).
pub type NodeResults<T> = HashMap<String, T>;

/// A validated key: `key` goes on the wire, `locate` picks the node.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct KeyRef {
    pub key: String,
    pub locate: String,
}

impl KeyRef {
    pub fn new(key: impl Into<String>, locate: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            locate: locate.into(),
        }
    }

    pub fn locate_bytes(&self) -> &[u8] {
        self.locate.as_bytes()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreMode {
    Set,
    Add,
    Replace,
    /// Set guarded by the CAS token carried in the item.
    CheckAndSet,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConcatMode {
    Append,
    Prepend,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MutateMode {
    Increment,
    Decrement,
}

/// Initial value and expiration used when a counter is missing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Initial {
    pub value: u64,
    pub expiration: u32,
}

/// The verb set every wire protocol implements on top of a [`ServerPool`].
#[async_trait]
pub trait Protocol: Debug + Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn pool(&self) -> &dyn PoolAdmin;

    async fn get(&self, key: &KeyRef) -> OpResult<CacheItem>;

    /// Hits keyed by wire key. Keys owned by failed nodes are missing and the code is
    /// `SomeErrors`.
    async fn get_multi(&self, keys: &[KeyRef]) -> OpResult<HashMap<String, CacheItem>>;

    /// On success the value is the new CAS token when the protocol reports one.
    async fn store(&self, mode: StoreMode, key: &KeyRef, item: CacheItem, expiration: u32) -> OpResult<u64>;

    async fn concatenate(&self, mode: ConcatMode, key: &KeyRef, data: Bytes) -> OpResult;

    async fn delete(&self, key: &KeyRef, delay: u32) -> OpResult;

    async fn mutate(&self, mode: MutateMode, key: &KeyRef, delta: u64, initial: Option<Initial>) -> OpResult<u64>;

    async fn flush_all(&self, delay: u32) -> OpResult<NodeResults<()>>;

    async fn stats(&self, group: Option<&str>) -> OpResult<NodeResults<HashMap<String, String>>>;

    async fn version(&self) -> OpResult<NodeResults<String>>;
}

/// Turns a connection level failure into its result code, marking the node dead unless the
/// failure was only local contention.
pub(crate) fn connection_failure<W>(pool: &ServerPool<W>, node: &NodeRef<W>, error: ConnectionError) -> ResultCode
where
    W: WireProtocol,
{
    if error.is_node_failure() {
        warn!("{} failed: {}", node.endpoint(), error);
        pool.mark_dead(node);
    } else {
        warn!("{} unavailable: {}", node.endpoint(), error);
    }
    ResultCode::ConnectionFailure
}

/// Runs `op` on every working node concurrently. Failed nodes are logged and left out of the
/// result, which then carries `SomeErrors`.
pub(crate) async fn broadcast<W, T, F, Fut>(pool: &ServerPool<W>, op: F) -> OpResult<NodeResults<T>>
where
    W: WireProtocol,
    F: Fn(NodeRef<W>) -> Fut,
    Fut: Future<Output = OpResult<T>>,
{
    let nodes = pool.working_nodes();
    if nodes.is_empty() {
        return ResultCode::NoServersAvailable.into();
    }
    let replies = join_all(nodes.iter().map(|node| op(node.clone()))).await;
    let mut results = HashMap::with_capacity(nodes.len());
    let mut failed = false;
    for (node, reply) in nodes.iter().zip(replies) {
        match reply {
            OpResult { code: ResultCode::Success, value: Some(value) } => {
                results.insert(node.endpoint().identity(), value);
            }
            OpResult { code, .. } => {
                warn!("{} on {} returned {}", W::name(), node.endpoint(), code);
                failed = true;
            }
        }
    }
    let code = if failed { ResultCode::SomeErrors } else { ResultCode::Success };
    OpResult::new(code, Some(results))
}

/// Splits `keys` over their nodes and runs `op` per node concurrently, merging the hits. A
/// server error reply counts toward `SomeErrors` but leaves the node working.
pub(crate) async fn fan_out<'k, W, F, Fut>(pool: &ServerPool<W>, keys: &'k [KeyRef], op: F) -> OpResult<HashMap<String, CacheItem>>
where
    W: WireProtocol,
    F: Fn(NodeRef<W>, Vec<&'k KeyRef>) -> Fut,
    Fut: Future<Output = Result<Result<Vec<(String, CacheItem)>, ResultCode>, ConnectionError>>,
{
    let mut seen = HashSet::with_capacity(keys.len());
    let unique: Vec<&KeyRef> = keys.iter().filter(|key| seen.insert(key.key.as_str())).collect();
    let Some(groups) = pool.split_keys(unique, |key| key.locate_bytes()) else {
        return ResultCode::NoServersAvailable.into();
    };
    let nodes: Vec<NodeRef<W>> = groups.iter().map(|(node, _)| node.clone()).collect();
    let replies = join_all(groups.into_iter().map(|(node, keys)| op(node, keys))).await;
    let mut hits = HashMap::with_capacity(keys.len());
    let mut failed = false;
    for (node, reply) in nodes.iter().zip(replies) {
        match reply {
            Ok(Ok(found)) => hits.extend(found),
            Ok(Err(code)) => {
                warn!("{} multi get on {} returned {}", W::name(), node.endpoint(), code);
                failed = true;
            }
            Err(error) => {
                connection_failure(pool, node, error);
                failed = true;
            }
        }
    }
    let code = if failed { ResultCode::SomeErrors } else { ResultCode::Success };
    OpResult::new(code, Some(hits))
}
