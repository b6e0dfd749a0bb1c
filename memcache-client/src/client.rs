use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use anyhow::Context;
use arc_swap::ArcSwap;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, warn};

use memcache_cluster::server_pool::ServerPool;
use memcache_core::config::settings::ProtocolKind;
use memcache_core::endpoint::Endpoint;
use memcache_core::hash::HashAlgorithm;
use memcache_core::key::KeyTransformer;
use memcache_core::locator::Distribution;
use memcache_core::transcoder::{RawTranscoder, Transcoder};
use memcache_core::{CacheItem, OpResult, ResultCode};
use memcache_protocol::binary::BinaryWire;
use memcache_protocol::text::TextWire;

use crate::protocol::binary::BinaryProtocol;
use crate::protocol::text::TextProtocol;
use crate::protocol::{ConcatMode, Initial, KeyRef, MutateMode, NodeResults, Protocol, StoreMode};
use crate::setting::ClientSetting;

/// Folds per item codes: all succeeded, none succeeded (first failure wins) or a mix.
fn aggregate(codes: impl IntoIterator<Item = ResultCode>) -> ResultCode {
    let mut first_failure = None;
    let mut any_success = false;
    for code in codes {
        if code.is_success() {
            any_success = true;
        } else if first_failure.is_none() {
            first_failure = Some(code);
        }
    }
    match (first_failure, any_success) {
        (None, _) => ResultCode::Success,
        (Some(code), false) => code,
        (Some(_), true) => ResultCode::SomeErrors,
    }
}

/// The application facing cache client. Values go through the transcoder `T`; keys through the
/// configured prefix.
#[derive(Debug)]
pub struct MemcacheClient<T: Transcoder = RawTranscoder> {
    protocol: Box<dyn Protocol>,
    keys: ArcSwap<KeyTransformer>,
    transcoder: T,
}

impl<T> MemcacheClient<T>
where
    T: Transcoder,
{
    /// Resolves the configured servers, starts the health check and returns a ready client.
    pub async fn new(setting: ClientSetting<T>) -> anyhow::Result<Self> {
        let ClientSetting {
            config,
            transcoder,
            authenticator,
        } = setting;
        let interval = config.health_check.interval.to_std_duration();
        let client = match config.protocol {
            ProtocolKind::Binary => {
                let keys = KeyTransformer::binary(config.prefix.clone()).context("invalid key prefix")?;
                let pool = ServerPool::<BinaryWire>::from_config(&config, authenticator)
                    .await
                    .context("failed to build binary server pool")?;
                pool.start(interval);
                Self::with_protocol(Box::new(BinaryProtocol::new(pool)), keys, transcoder)
            }
            ProtocolKind::Text => {
                let keys = KeyTransformer::text(config.prefix.clone()).context("invalid key prefix")?;
                let pool = ServerPool::<TextWire>::from_config(&config, authenticator)
                    .await
                    .context("failed to build text server pool")?;
                pool.start(interval);
                Self::with_protocol(Box::new(TextProtocol::new(pool)), keys, transcoder)
            }
        };
        Ok(client)
    }

    fn with_protocol(protocol: Box<dyn Protocol>, keys: KeyTransformer, transcoder: T) -> Self {
        info!(
            "memcache client ready with {} protocol over {} servers",
            match protocol.kind() {
                ProtocolKind::Binary => "binary",
                ProtocolKind::Text => "text",
            },
            protocol.pool().working_servers().len()
        );
        Self {
            protocol,
            keys: ArcSwap::from_pointee(keys),
            transcoder,
        }
    }

    pub fn protocol_kind(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    fn key_ref(keys: &KeyTransformer, server_key: Option<&str>, key: &str) -> Result<KeyRef, ResultCode> {
        let wire = keys.transform(key)?;
        let locate = match server_key {
            Some("") => return Err(ResultCode::BadKeyProvided),
            Some(server_key) => server_key,
            None => key,
        };
        Ok(KeyRef::new(wire, locate))
    }

    fn decode(&self, item: CacheItem) -> OpResult<(T::Value, u64)> {
        let cas = item.cas;
        match self.transcoder.deserialize(item.flags, item.data) {
            Ok(value) => OpResult::ok((value, cas)),
            Err(error) => {
                warn!("failed to decode cached value: {:#}", error);
                ResultCode::PayloadFailure.into()
            }
        }
    }

    async fn fetch(&self, server_key: Option<&str>, key: &str) -> OpResult<(T::Value, u64)> {
        let key = match Self::key_ref(&self.keys.load(), server_key, key) {
            Ok(key) => key,
            Err(code) => return code.into(),
        };
        match self.protocol.get(&key).await {
            OpResult {
                code: ResultCode::Success,
                value: Some(item),
            } => self.decode(item),
            OpResult { code, .. } => code.into(),
        }
    }

    pub async fn get(&self, key: &str) -> OpResult<T::Value> {
        self.fetch(None, key).await.map(|(value, _)| value)
    }

    pub async fn get_by_key(&self, server_key: &str, key: &str) -> OpResult<T::Value> {
        self.fetch(Some(server_key), key).await.map(|(value, _)| value)
    }

    /// The value together with its CAS token.
    pub async fn get_with_cas(&self, key: &str) -> OpResult<(T::Value, u64)> {
        self.fetch(None, key).await
    }

    pub async fn get_by_key_with_cas(&self, server_key: &str, key: &str) -> OpResult<(T::Value, u64)> {
        self.fetch(Some(server_key), key).await
    }

    async fn fetch_multi(&self, server_key: Option<&str>, keys: &[&str]) -> OpResult<HashMap<String, (T::Value, u64)>> {
        let transformer = self.keys.load_full();
        let mut refs = Vec::with_capacity(keys.len());
        for key in keys {
            match Self::key_ref(&transformer, server_key, key) {
                Ok(key) => refs.push(key),
                Err(code) => return code.into(),
            }
        }
        if refs.is_empty() {
            return OpResult::ok(HashMap::new());
        }
        let OpResult { mut code, value } = self.protocol.get_multi(&refs).await;
        let Some(hits) = value else {
            return code.into();
        };
        let mut values = HashMap::with_capacity(hits.len());
        for (wire_key, item) in hits {
            let key = transformer.strip(&wire_key).to_string();
            match self.decode(item) {
                OpResult {
                    value: Some(value), ..
                } => {
                    values.insert(key, value);
                }
                OpResult { code: failure, .. } => {
                    if code.is_success() {
                        code = failure;
                    }
                }
            }
        }
        OpResult::new(code, Some(values))
    }

    /// Hits keyed by application key. Misses are simply absent; when some node failed the code is
    /// `SomeErrors` and the hits from the other nodes are still returned.
    pub async fn get_multi(&self, keys: &[&str]) -> OpResult<HashMap<String, T::Value>> {
        self.fetch_multi(None, keys)
            .await
            .map(|values| values.into_iter().map(|(key, (value, _))| (key, value)).collect())
    }

    /// Every key is read from the node owning `server_key`.
    pub async fn get_multi_by_key(&self, server_key: &str, keys: &[&str]) -> OpResult<HashMap<String, T::Value>> {
        self.fetch_multi(Some(server_key), keys)
            .await
            .map(|values| values.into_iter().map(|(key, (value, _))| (key, value)).collect())
    }

    pub async fn get_multi_with_cas(&self, keys: &[&str]) -> OpResult<HashMap<String, (T::Value, u64)>> {
        self.fetch_multi(None, keys).await
    }

    /// One slot per requested key, in request order. A repeated key fills every one of its slots.
    pub async fn get_multi_ordered(&self, keys: &[&str]) -> OpResult<Vec<Option<(T::Value, u64)>>>
    where
        T::Value: Clone,
    {
        self.fetch_multi(None, keys).await.map(|values| {
            keys.iter()
                .map(|key| values.get(*key).cloned())
                .collect()
        })
    }

    /// Read through: on a miss the loader is asked for the value, which is then added to the
    /// cache without expiration.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, loader: F) -> OpResult<T::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T::Value>>>,
    {
        let result = self.get(key).await;
        if result.code != ResultCode::NotFound {
            return result;
        }
        match loader().await {
            Ok(Some(value)) => {
                let stored = self.add(key, &value, 0).await;
                if !stored.is_success() {
                    debug!("read through add of {} returned {}", key, stored.code);
                }
                OpResult::ok(value)
            }
            Ok(None) => ResultCode::NotFound.into(),
            Err(error) => {
                warn!("loader for {} failed: {:#}", key, error);
                ResultCode::Failure.into()
            }
        }
    }

    async fn store(
        &self,
        mode: StoreMode,
        server_key: Option<&str>,
        key: &str,
        value: &T::Value,
        expiration: u32,
        cas: u64,
    ) -> OpResult {
        if mode == StoreMode::CheckAndSet && cas == 0 {
            return ResultCode::Failure.into();
        }
        let key = match Self::key_ref(&self.keys.load(), server_key, key) {
            Ok(key) => key,
            Err(code) => return code.into(),
        };
        let (flags, data) = match self.transcoder.serialize(value) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("failed to encode value for {}: {:#}", key.key, error);
                return ResultCode::PayloadFailure.into();
            }
        };
        let item = CacheItem::new(flags, data).with_cas(cas);
        self.protocol.store(mode, &key, item, expiration).await.map(|_| ())
    }

    pub async fn set(&self, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Set, None, key, value, expiration, 0).await
    }

    pub async fn set_by_key(&self, server_key: &str, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Set, Some(server_key), key, value, expiration, 0).await
    }

    pub async fn add(&self, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Add, None, key, value, expiration, 0).await
    }

    pub async fn add_by_key(&self, server_key: &str, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Add, Some(server_key), key, value, expiration, 0).await
    }

    pub async fn replace(&self, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Replace, None, key, value, expiration, 0).await
    }

    pub async fn replace_by_key(&self, server_key: &str, key: &str, value: &T::Value, expiration: u32) -> OpResult {
        self.store(StoreMode::Replace, Some(server_key), key, value, expiration, 0).await
    }

    /// Stores only if the item still carries `cas`. A stale token yields `DataExists`.
    pub async fn check_and_set(&self, key: &str, value: &T::Value, expiration: u32, cas: u64) -> OpResult {
        self.store(StoreMode::CheckAndSet, None, key, value, expiration, cas).await
    }

    pub async fn check_and_set_by_key(
        &self,
        server_key: &str,
        key: &str,
        value: &T::Value,
        expiration: u32,
        cas: u64,
    ) -> OpResult {
        self.store(StoreMode::CheckAndSet, Some(server_key), key, value, expiration, cas)
            .await
    }

    /// Sets every item with the same expiration.
    pub async fn set_multi(&self, items: &[(&str, T::Value)], expiration: u32) -> OpResult {
        let stores = items
            .iter()
            .map(|(key, value)| self.store(StoreMode::Set, None, key, value, expiration, 0));
        let results = join_all(stores).await;
        aggregate(results.into_iter().map(|result| result.code)).into()
    }

    async fn concatenate(&self, mode: ConcatMode, server_key: Option<&str>, key: &str, data: Bytes) -> OpResult {
        if self.transcoder.compression() {
            return ResultCode::NotSupported.into();
        }
        let key = match Self::key_ref(&self.keys.load(), server_key, key) {
            Ok(key) => key,
            Err(code) => return code.into(),
        };
        if data.is_empty() {
            return OpResult::success();
        }
        self.protocol.concatenate(mode, &key, data).await
    }

    pub async fn append(&self, key: &str, data: impl Into<Bytes>) -> OpResult {
        self.concatenate(ConcatMode::Append, None, key, data.into()).await
    }

    pub async fn append_by_key(&self, server_key: &str, key: &str, data: impl Into<Bytes>) -> OpResult {
        self.concatenate(ConcatMode::Append, Some(server_key), key, data.into())
            .await
    }

    pub async fn prepend(&self, key: &str, data: impl Into<Bytes>) -> OpResult {
        self.concatenate(ConcatMode::Prepend, None, key, data.into()).await
    }

    pub async fn prepend_by_key(&self, server_key: &str, key: &str, data: impl Into<Bytes>) -> OpResult {
        self.concatenate(ConcatMode::Prepend, Some(server_key), key, data.into())
            .await
    }

    async fn remove(&self, server_key: Option<&str>, key: &str, delay: u32) -> OpResult {
        let key = match Self::key_ref(&self.keys.load(), server_key, key) {
            Ok(key) => key,
            Err(code) => return code.into(),
        };
        self.protocol.delete(&key, delay).await
    }

    pub async fn delete(&self, key: &str) -> OpResult {
        self.remove(None, key, 0).await
    }

    pub async fn delete_with_delay(&self, key: &str, delay: u32) -> OpResult {
        self.remove(None, key, delay).await
    }

    pub async fn delete_by_key(&self, server_key: &str, key: &str, delay: u32) -> OpResult {
        self.remove(Some(server_key), key, delay).await
    }

    async fn mutate(
        &self,
        mode: MutateMode,
        server_key: Option<&str>,
        key: &str,
        delta: u64,
        initial: Option<Initial>,
    ) -> OpResult<u64> {
        let key = match Self::key_ref(&self.keys.load(), server_key, key) {
            Ok(key) => key,
            Err(code) => return code.into(),
        };
        self.protocol.mutate(mode, &key, delta, initial).await
    }

    pub async fn increment(&self, key: &str, delta: u64) -> OpResult<u64> {
        self.mutate(MutateMode::Increment, None, key, delta, None).await
    }

    pub async fn increment_by_key(&self, server_key: &str, key: &str, delta: u64) -> OpResult<u64> {
        self.mutate(MutateMode::Increment, Some(server_key), key, delta, None)
            .await
    }

    /// Creates the counter with `initial` when missing. Only the binary protocol supports this.
    pub async fn increment_with_initial(&self, key: &str, delta: u64, initial: u64, expiration: u32) -> OpResult<u64> {
        let initial = Initial {
            value: initial,
            expiration,
        };
        self.mutate(MutateMode::Increment, None, key, delta, Some(initial))
            .await
    }

    pub async fn decrement(&self, key: &str, delta: u64) -> OpResult<u64> {
        self.mutate(MutateMode::Decrement, None, key, delta, None).await
    }

    pub async fn decrement_by_key(&self, server_key: &str, key: &str, delta: u64) -> OpResult<u64> {
        self.mutate(MutateMode::Decrement, Some(server_key), key, delta, None)
            .await
    }

    pub async fn decrement_with_initial(&self, key: &str, delta: u64, initial: u64, expiration: u32) -> OpResult<u64> {
        let initial = Initial {
            value: initial,
            expiration,
        };
        self.mutate(MutateMode::Decrement, None, key, delta, Some(initial))
            .await
    }

    /// Invalidates every item on every working node, after `delay` seconds when non zero.
    pub async fn flush_all(&self, delay: u32) -> OpResult {
        self.protocol.flush_all(delay).await.map(|_| ())
    }

    pub async fn stats(&self) -> OpResult<NodeResults<HashMap<String, String>>> {
        self.protocol.stats(None).await
    }

    pub async fn stats_group(&self, group: &str) -> OpResult<NodeResults<HashMap<String, String>>> {
        self.protocol.stats(Some(group)).await
    }

    pub async fn version(&self) -> OpResult<NodeResults<String>> {
        self.protocol.version().await
    }

    pub async fn add_server(&self, host: &str, port: u16, weight: u32) -> anyhow::Result<bool> {
        let endpoint = Endpoint::new(host, port).with_weight(weight);
        Ok(self.protocol.pool().add_servers(vec![endpoint]).await? == 1)
    }

    /// Adds `host[:port[:weight]]` servers. Returns how many were new.
    pub async fn add_servers(&self, servers: &[&str]) -> anyhow::Result<usize> {
        let endpoints = servers
            .iter()
            .map(|server| Endpoint::from_str(server).with_context(|| format!("invalid server `{}`", server)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.protocol.pool().add_servers(endpoints).await
    }

    pub fn remove_server(&self, endpoint: &Endpoint) -> bool {
        self.protocol.pool().remove_server(endpoint)
    }

    /// The working servers.
    pub fn server_list(&self) -> Vec<Endpoint> {
        self.protocol.pool().working_servers()
    }

    pub fn dead_servers(&self) -> Vec<Endpoint> {
        self.protocol.pool().dead_servers()
    }

    /// The server currently owning `key`.
    pub fn server_by_key(&self, key: &str) -> Option<Endpoint> {
        self.protocol.pool().server_for_key(key.as_bytes())
    }

    pub fn prefix(&self) -> String {
        self.keys.load().prefix().to_string()
    }

    pub fn set_prefix(&self, prefix: &str) -> OpResult {
        match self.keys.load().with_prefix(prefix) {
            Ok(keys) => {
                self.keys.store(Arc::new(keys));
                OpResult::success()
            }
            Err(error) => {
                debug!("rejected prefix `{}`: {}", prefix, error);
                ResultCode::from(error).into()
            }
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.protocol.pool().hash_algorithm()
    }

    pub fn set_hash_algorithm(&self, hash: HashAlgorithm) {
        self.protocol.pool().set_hash_algorithm(hash)
    }

    pub fn distribution(&self) -> Distribution {
        self.protocol.pool().distribution()
    }

    pub fn set_distribution(&self, distribution: Distribution) {
        self.protocol.pool().set_distribution(distribution)
    }

    /// MD5 hash over a consistent ring, the placement libketama clients use.
    pub fn libketama_compatible(&self) -> bool {
        self.hash_algorithm() == HashAlgorithm::Md5 && self.distribution() == Distribution::Consistent
    }

    pub fn set_libketama_compatible(&self, enabled: bool) {
        if enabled {
            self.set_hash_algorithm(HashAlgorithm::Md5);
            self.set_distribution(Distribution::Consistent);
        } else {
            self.set_hash_algorithm(HashAlgorithm::default());
            self.set_distribution(Distribution::default());
        }
    }

    /// Runs one health check pass right away. Returns how many dead servers came back.
    pub async fn check_servers(&self) -> usize {
        self.protocol.pool().health_check().await
    }

    /// Stops the health check and closes every connection.
    pub async fn shutdown(&self) {
        self.protocol.pool().shutdown().await
    }
}
