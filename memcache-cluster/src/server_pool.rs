use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use ahash::{HashMap, HashMapExt};
use anyhow::Context;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use memcache_core::config::settings::SocketSettings;
use memcache_core::config::ClientConfig;
use memcache_core::endpoint::Endpoint;
use memcache_core::hash::HashAlgorithm;
use memcache_core::locator::{Distribution, Locator, NodeLocator};
use memcache_protocol::WireProtocol;

use crate::auth::Authenticator;
use crate::health_check::HealthCheck;
use crate::node::Node;
use crate::NodeRef;

/// Membership and placement operations that do not depend on the wire protocol.
#[async_trait]
pub trait PoolAdmin: Debug + Send + Sync {
    /// Resolves and adds endpoints, skipping ones already present. Returns how many were added.
    async fn add_servers(&self, endpoints: Vec<Endpoint>) -> anyhow::Result<usize>;

    fn remove_server(&self, endpoint: &Endpoint) -> bool;

    fn working_servers(&self) -> Vec<Endpoint>;

    fn dead_servers(&self) -> Vec<Endpoint>;

    fn server_for_key(&self, key: &[u8]) -> Option<Endpoint>;

    fn hash_algorithm(&self) -> HashAlgorithm;

    fn set_hash_algorithm(&self, hash: HashAlgorithm);

    fn distribution(&self) -> Distribution;

    fn set_distribution(&self, distribution: Distribution);

    /// Probes every dead node once. Returns the number of nodes brought back.
    async fn health_check(&self) -> usize;

    async fn shutdown(&self);
}

struct PoolState<W: WireProtocol> {
    working: Vec<NodeRef<W>>,
    dead: Vec<NodeRef<W>>,
    hash: HashAlgorithm,
    distribution: Distribution,
    next_ordinal: u64,
}

impl<W> PoolState<W>
where
    W: WireProtocol,
{
    fn contains(&self, identity: &str) -> bool {
        self.working
            .iter()
            .chain(self.dead.iter())
            .any(|node| node.endpoint().identity() == identity)
    }
}

pub(crate) struct PoolInner<W: WireProtocol> {
    state: RwLock<PoolState<W>>,
    locator: ArcSwapOption<Locator<NodeRef<W>>>,
    rebuild: Mutex<()>,
    probing: tokio::sync::Mutex<()>,
    settings: SocketSettings,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl<W> PoolInner<W>
where
    W: WireProtocol,
{
    /// Current locator snapshot, rebuilt from the working list when it was invalidated.
    fn locator(&self) -> Arc<Locator<NodeRef<W>>> {
        if let Some(locator) = self.locator.load_full() {
            return locator;
        }
        let _guard = self.rebuild.lock();
        if let Some(locator) = self.locator.load_full() {
            return locator;
        }
        // published while the state is read locked so no invalidation can slip in between
        let state = self.state.read();
        let locator = Arc::new(Locator::build(state.distribution, state.hash, state.working.clone()));
        self.locator.store(Some(locator.clone()));
        debug!(
            "rebuilt {} locator over {} working nodes with {} hash",
            state.distribution,
            state.working.len(),
            state.hash
        );
        locator
    }

    fn invalidate(&self) {
        self.locator.store(None);
    }

    fn mark_dead(&self, node: &NodeRef<W>) {
        let mut state = self.state.write();
        let Some(position) = state.working.iter().position(|n| Arc::ptr_eq(n, node)) else {
            return;
        };
        let node = state.working.remove(position);
        node.set_alive(false);
        node.reset();
        warn!("mark {} dead, {} working nodes left", node.endpoint(), state.working.len());
        state.dead.push(node);
        self.invalidate();
    }

    pub(crate) async fn health_check(&self) -> usize {
        let Ok(_probing) = self.probing.try_lock() else {
            debug!("health check already running");
            return 0;
        };
        let dead = self.state.read().dead.clone();
        if dead.is_empty() {
            return 0;
        }
        let probes = dead.iter().map(|node| async move { (node.clone(), node.ping().await) });
        let recovered: Vec<NodeRef<W>> = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(node, healthy)| healthy.then_some(node))
            .collect();
        if recovered.is_empty() {
            return 0;
        }
        let mut state = self.state.write();
        let mut count = 0;
        for node in recovered {
            let Some(position) = state.dead.iter().position(|n| Arc::ptr_eq(n, &node)) else {
                continue;
            };
            let node = state.dead.remove(position);
            node.reset();
            node.set_alive(true);
            info!("{} is alive again", node.endpoint());
            state.working.push(node);
            count += 1;
        }
        if count > 0 {
            state.working.sort_by_key(|node| node.ordinal());
            self.invalidate();
        }
        count
    }
}

/// The set of nodes one client talks to. Lookups read an immutable locator snapshot; membership
/// changes replace it.
pub struct ServerPool<W: WireProtocol> {
    inner: Arc<PoolInner<W>>,
    health_check: Mutex<Option<HealthCheck>>,
}

impl<W> Debug for ServerPool<W>
where
    W: WireProtocol,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ServerPool")
            .field("protocol", &W::name())
            .field("working", &state.working)
            .field("dead", &state.dead)
            .field("hash", &state.hash)
            .field("distribution", &state.distribution)
            .finish_non_exhaustive()
    }
}

impl<W> ServerPool<W>
where
    W: WireProtocol,
{
    pub fn new(
        hash: HashAlgorithm,
        distribution: Distribution,
        settings: SocketSettings,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let state = PoolState {
            working: Vec::new(),
            dead: Vec::new(),
            hash,
            distribution,
            next_ordinal: 0,
        };
        let inner = PoolInner {
            state: RwLock::new(state),
            locator: ArcSwapOption::empty(),
            rebuild: Mutex::new(()),
            probing: tokio::sync::Mutex::new(()),
            settings,
            authenticator,
        };
        Self {
            inner: Arc::new(inner),
            health_check: Mutex::new(None),
        }
    }

    /// Builds a pool with the configured servers. The health check is not started.
    pub async fn from_config(
        config: &ClientConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> anyhow::Result<Self> {
        let pool = Self::new(config.hash, config.distribution, config.socket_settings(), authenticator);
        pool.add_servers(config.servers.clone()).await?;
        Ok(pool)
    }

    /// Starts the periodic dead node probe. A zero interval leaves it off.
    pub fn start(&self, interval: Duration) {
        if interval.is_zero() {
            debug!("health check disabled");
            return;
        }
        let mut health_check = self.health_check.lock();
        if health_check.is_none() {
            *health_check = Some(HealthCheck::spawn(Arc::downgrade(&self.inner), interval));
            debug!("health check started every {:?}", interval);
        }
    }

    /// The node owning `key`. Dead nodes found in the snapshot are moved out of the working
    /// list and the lookup repeats, so a dead node is never returned.
    pub fn locate_node(&self, key: &[u8]) -> Option<NodeRef<W>> {
        loop {
            let locator = self.inner.locator();
            let node = locator.locate(key)?;
            if node.is_alive() {
                return Some(node.clone());
            }
            self.inner.mark_dead(node);
        }
    }

    /// Groups keys by owning node, nodes in order of first appearance. `None` when there is no
    /// working node.
    pub fn split_keys<K, F>(&self, keys: impl IntoIterator<Item = K>, locate_by: F) -> Option<Vec<(NodeRef<W>, Vec<K>)>>
    where
        F: Fn(&K) -> &[u8],
    {
        let mut groups: Vec<(NodeRef<W>, Vec<K>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for key in keys {
            let node = self.locate_node(locate_by(&key))?;
            let identity = node.endpoint().identity();
            match index.get(&identity) {
                Some(position) => groups[*position].1.push(key),
                None => {
                    index.insert(identity, groups.len());
                    groups.push((node, vec![key]));
                }
            }
        }
        Some(groups)
    }

    pub fn mark_dead(&self, node: &NodeRef<W>) {
        self.inner.mark_dead(node);
    }

    pub fn working_nodes(&self) -> Vec<NodeRef<W>> {
        self.inner.state.read().working.clone()
    }

    pub fn dead_nodes(&self) -> Vec<NodeRef<W>> {
        self.inner.state.read().dead.clone()
    }

    pub fn settings(&self) -> &SocketSettings {
        &self.inner.settings
    }

    pub async fn add_server(&self, endpoint: Endpoint) -> anyhow::Result<bool> {
        Ok(self.add_servers(vec![endpoint]).await? == 1)
    }

    async fn resolve(endpoints: Vec<Endpoint>) -> anyhow::Result<Vec<(Endpoint, std::net::SocketAddr)>> {
        let mut resolved = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let addr = lookup_host((endpoint.host.as_str(), endpoint.port))
                .await
                .with_context(|| format!("failed to resolve {}", endpoint))?
                .next()
                .with_context(|| format!("{} resolved to no address", endpoint))?;
            resolved.push((endpoint, addr));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<W> PoolAdmin for ServerPool<W>
where
    W: WireProtocol,
{
    async fn add_servers(&self, endpoints: Vec<Endpoint>) -> anyhow::Result<usize> {
        let resolved = Self::resolve(endpoints).await?;
        let mut state = self.inner.state.write();
        let mut added = 0;
        for (endpoint, addr) in resolved {
            if state.contains(&endpoint.identity()) {
                debug!("{} is already in the pool", endpoint);
                continue;
            }
            let ordinal = state.next_ordinal;
            state.next_ordinal += 1;
            debug!("add {} ({}) to the pool", endpoint, addr);
            let node = Node::new(
                endpoint,
                addr,
                ordinal,
                self.inner.settings,
                self.inner.authenticator.clone(),
            );
            state.working.push(Arc::new(node));
            added += 1;
        }
        if added > 0 {
            self.inner.invalidate();
        }
        Ok(added)
    }

    fn remove_server(&self, endpoint: &Endpoint) -> bool {
        let identity = endpoint.identity();
        let mut guard = self.inner.state.write();
        let state = &mut *guard;
        let mut removed = Vec::new();
        for list in [&mut state.working, &mut state.dead] {
            list.retain(|node| {
                if node.endpoint().identity() == identity {
                    removed.push(node.clone());
                    false
                } else {
                    true
                }
            });
        }
        if removed.is_empty() {
            return false;
        }
        for node in removed {
            node.close();
            debug!("removed {} from the pool", node.endpoint());
        }
        self.inner.invalidate();
        true
    }

    fn working_servers(&self) -> Vec<Endpoint> {
        self.inner.state.read().working.iter().map(|node| node.endpoint().clone()).collect()
    }

    fn dead_servers(&self) -> Vec<Endpoint> {
        self.inner.state.read().dead.iter().map(|node| node.endpoint().clone()).collect()
    }

    fn server_for_key(&self, key: &[u8]) -> Option<Endpoint> {
        self.locate_node(key).map(|node| node.endpoint().clone())
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.inner.state.read().hash
    }

    fn set_hash_algorithm(&self, hash: HashAlgorithm) {
        let mut state = self.inner.state.write();
        if state.hash != hash {
            state.hash = hash;
            self.inner.invalidate();
        }
    }

    fn distribution(&self) -> Distribution {
        self.inner.state.read().distribution
    }

    fn set_distribution(&self, distribution: Distribution) {
        let mut state = self.inner.state.write();
        if state.distribution != distribution {
            state.distribution = distribution;
            self.inner.invalidate();
        }
    }

    async fn health_check(&self) -> usize {
        self.inner.health_check().await
    }

    async fn shutdown(&self) {
        let health_check = self.health_check.lock().take();
        if let Some(health_check) = health_check {
            health_check.stop().await;
        }
        let mut guard = self.inner.state.write();
        let state = &mut *guard;
        for node in state.working.drain(..).chain(state.dead.drain(..)) {
            node.close();
        }
        self.inner.invalidate();
        debug!("{} pool shut down", W::name());
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use memcache_core::config::settings::SocketSettings;
    use memcache_core::endpoint::Endpoint;
    use memcache_core::hash::HashAlgorithm;
    use memcache_core::locator::Distribution;
    use memcache_protocol::binary::BinaryWire;

    use crate::server_pool::{PoolAdmin, ServerPool};
    use crate::test::{closed_addr, spawn_ack_server};

    fn pool(distribution: Distribution) -> ServerPool<BinaryWire> {
        let settings = SocketSettings {
            ping_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        ServerPool::new(HashAlgorithm::Md5, distribution, settings, None)
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    fn keys() -> Vec<String> {
        (0..200).map(|i| format!("key-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = pool(Distribution::Modulo);
        assert!(pool.locate_node(b"foo").is_none());
        assert!(pool.split_keys(keys(), |k| k.as_bytes()).is_none());
        assert!(pool.server_for_key(b"foo").is_none());
    }

    #[tokio::test]
    async fn test_add_and_remove() -> anyhow::Result<()> {
        let pool = pool(Distribution::Consistent);
        let endpoints = vec![
            Endpoint::new("127.0.0.1", 21001),
            Endpoint::new("127.0.0.1", 21002),
            Endpoint::new("127.0.0.1", 21001),
        ];
        assert_eq!(pool.add_servers(endpoints).await?, 2);
        assert!(!pool.add_server(Endpoint::new("127.0.0.1", 21002)).await?);
        assert_eq!(pool.working_servers().len(), 2);
        assert!(pool.remove_server(&Endpoint::new("127.0.0.1", 21001)));
        assert!(!pool.remove_server(&Endpoint::new("127.0.0.1", 21001)));
        for key in keys() {
            assert_eq!(pool.server_for_key(key.as_bytes()), Some(Endpoint::new("127.0.0.1", 21002)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_split_keys_groups_by_owner() -> anyhow::Result<()> {
        let pool = pool(Distribution::Consistent);
        pool.add_servers((21001..21004).map(|port| Endpoint::new("127.0.0.1", port)).collect())
            .await?;
        let groups = pool.split_keys(keys(), |k| k.as_bytes()).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.iter().map(|(_, keys)| keys.len()).sum::<usize>(), 200);
        for (node, keys) in &groups {
            for key in keys {
                let owner = pool.locate_node(key.as_bytes()).unwrap();
                assert_eq!(owner.endpoint(), node.endpoint());
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_dead_node_is_excluded() -> anyhow::Result<()> {
        let pool = pool(Distribution::Consistent);
        pool.add_servers((21001..21004).map(|port| Endpoint::new("127.0.0.1", port)).collect())
            .await?;
        let victim = pool.locate_node(b"key-0").unwrap();
        pool.mark_dead(&victim);
        assert_eq!(pool.dead_servers(), vec![victim.endpoint().clone()]);
        assert!(!victim.is_alive());
        for key in keys() {
            let node = pool.locate_node(key.as_bytes()).unwrap();
            assert_ne!(node.endpoint(), victim.endpoint());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_all_dead_means_no_servers() -> anyhow::Result<()> {
        let pool = pool(Distribution::Modulo);
        pool.add_server(Endpoint::new("127.0.0.1", 21001)).await?;
        let node = pool.locate_node(b"a").unwrap();
        pool.mark_dead(&node);
        assert!(pool.locate_node(b"a").is_none());
        assert!(pool.split_keys(vec!["a"], |k| k.as_bytes()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_health_check_resurrects_reachable_nodes() -> anyhow::Result<()> {
        let pool = pool(Distribution::Modulo);
        let alive = endpoint(spawn_ack_server().await);
        let gone = endpoint(closed_addr().await);
        pool.add_servers(vec![alive.clone(), gone.clone()]).await?;
        for node in pool.working_nodes() {
            pool.mark_dead(&node);
        }
        assert!(pool.working_servers().is_empty());
        assert_eq!(pool.health_check().await, 1);
        assert_eq!(pool.working_servers(), vec![alive]);
        assert_eq!(pool.dead_servers(), vec![gone]);
        assert_eq!(pool.health_check().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_working_order_survives_resurrection() -> anyhow::Result<()> {
        let pool = pool(Distribution::Modulo);
        let first = endpoint(spawn_ack_server().await);
        let second = endpoint(spawn_ack_server().await);
        pool.add_servers(vec![first.clone(), second.clone()]).await?;
        let before: Vec<Option<Endpoint>> = keys().iter().map(|k| pool.server_for_key(k.as_bytes())).collect();
        let node = pool.working_nodes().remove(0);
        pool.mark_dead(&node);
        assert_eq!(pool.working_servers(), vec![second.clone()]);
        assert_eq!(pool.health_check().await, 1);
        assert_eq!(pool.working_servers(), vec![first, second]);
        let after: Vec<Option<Endpoint>> = keys().iter().map(|k| pool.server_for_key(k.as_bytes())).collect();
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_health_check() -> anyhow::Result<()> {
        let pool = pool(Distribution::Consistent);
        pool.add_server(endpoint(spawn_ack_server().await)).await?;
        let node = pool.working_nodes().remove(0);
        pool.mark_dead(&node);
        pool.start(Duration::from_millis(50));
        let mut recovered = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if !pool.working_servers().is_empty() {
                recovered = true;
                break;
            }
        }
        assert!(recovered);
        assert!(node.is_alive());
        pool.shutdown().await;
        assert!(pool.working_servers().is_empty());
        assert!(pool.locate_node(b"a").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_settings_change_rebuilds_locator() -> anyhow::Result<()> {
        let pool = pool(Distribution::Modulo);
        pool.add_servers((21001..21011).map(|port| Endpoint::new("127.0.0.1", port)).collect())
            .await?;
        let modulo: Vec<Option<Endpoint>> = keys().iter().map(|k| pool.server_for_key(k.as_bytes())).collect();
        pool.set_distribution(Distribution::Consistent);
        assert_eq!(pool.distribution(), Distribution::Consistent);
        let consistent: Vec<Option<Endpoint>> = keys().iter().map(|k| pool.server_for_key(k.as_bytes())).collect();
        assert_ne!(modulo, consistent);
        pool.set_hash_algorithm(HashAlgorithm::Crc);
        assert_eq!(pool.hash_algorithm(), HashAlgorithm::Crc);
        let crc: Vec<Option<Endpoint>> = keys().iter().map(|k| pool.server_for_key(k.as_bytes())).collect();
        assert_ne!(consistent, crc);
        Ok(())
    }
}
