use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, trace};

use memcache_core::config::settings::SocketSettings;
use memcache_core::endpoint::Endpoint;
use memcache_core::locator::NodeIdentity;
use memcache_protocol::WireProtocol;

use crate::auth::Authenticator;
use crate::connection::{Connection, ConnectionError, PooledConnection};

/// One cache server: its address, liveness and a bounded pool of reusable connections.
pub struct Node<W: WireProtocol> {
    endpoint: Endpoint,
    addr: SocketAddr,
    ordinal: u64,
    settings: SocketSettings,
    authenticator: Option<Arc<dyn Authenticator>>,
    alive: AtomicBool,
    failures: AtomicU64,
    idle: Mutex<Vec<Connection<W>>>,
    permits: Arc<Semaphore>,
}

impl<W> Debug for Node<W>
where
    W: WireProtocol,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint)
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

impl<W> Node<W>
where
    W: WireProtocol,
{
    pub fn new(
        endpoint: Endpoint,
        addr: SocketAddr,
        ordinal: u64,
        settings: SocketSettings,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Self {
            endpoint,
            addr,
            ordinal,
            settings,
            authenticator,
            alive: AtomicBool::new(true),
            failures: AtomicU64::new(0),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(settings.max_connections)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Position in the order nodes were added. Keeps the working list stable across
    /// death and resurrection.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Check out an idle connection or open a new one, waiting at most `acquire_timeout` for
    /// the pool bound.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<W>, ConnectionError> {
        let permit = timeout(self.settings.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| ConnectionError::PoolExhausted(self.settings.acquire_timeout))?
            .map_err(|_| ConnectionError::Closed)?;
        let idle = self.idle.lock().pop();
        let connection = match idle {
            Some(connection) => connection,
            None => match Connection::connect(self.addr, &self.settings, self.authenticator.as_ref()).await {
                Ok(connection) => connection,
                Err(error) => {
                    let failures = self.record_failure();
                    debug!("{} failed to open connection ({} failures): {}", self.endpoint, failures, error);
                    return Err(error);
                }
            },
        };
        Ok(PooledConnection::new(connection, self.clone(), permit))
    }

    pub(crate) fn release(&self, connection: Connection<W>) {
        if self.is_alive() && !self.permits.is_closed() {
            self.idle.lock().push(connection);
        }
    }

    /// Opens a throwaway connection, sends the protocol no-op and waits for its reply. Pool
    /// state is left untouched.
    pub async fn ping(&self) -> bool {
        let probe = async {
            let mut connection = Connection::<W>::connect(self.addr, &self.settings, self.authenticator.as_ref()).await?;
            connection.send(W::noop()).await?;
            let frame = connection.recv().await?;
            Ok::<_, ConnectionError>(W::is_noop_reply(&frame))
        };
        match timeout(self.settings.ping_timeout, probe).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(error)) => {
                trace!("ping {} failed: {}", self.endpoint, error);
                false
            }
            Err(_) => {
                trace!("ping {} timed out after {:?}", self.endpoint, self.settings.ping_timeout);
                false
            }
        }
    }

    /// Drops every idle connection and clears the failure count.
    pub(crate) fn reset(&self) {
        self.idle.lock().clear();
        self.failures.store(0, Ordering::Relaxed);
    }

    pub(crate) fn close(&self) {
        self.set_alive(false);
        self.permits.close();
        self.idle.lock().clear();
    }
}

impl<W> NodeIdentity for Node<W>
where
    W: WireProtocol,
{
    fn identity(&self) -> String {
        self.endpoint.identity()
    }

    fn weight(&self) -> u32 {
        self.endpoint.weight
    }
}
