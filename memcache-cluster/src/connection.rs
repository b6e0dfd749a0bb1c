use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::trace;

use memcache_core::config::settings::SocketSettings;
use memcache_protocol::error::ProtocolError;
use memcache_protocol::WireProtocol;

use crate::auth::Authenticator;
use crate::node::Node;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("connection closed by peer")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("authentication failed: {0:#}")]
    Authentication(anyhow::Error),
    #[error("no pooled connection became available within {0:?}")]
    PoolExhausted(Duration),
    #[error("unexpected reply `{0}`")]
    UnexpectedReply(String),
}

impl ConnectionError {
    /// Whether the failure says something about the node itself rather than about local
    /// contention.
    pub fn is_node_failure(&self) -> bool {
        !matches!(self, ConnectionError::PoolExhausted(_))
    }
}

/// One framed duplex stream to a node. Every read and write is bounded by the socket timeouts.
pub struct Connection<W: WireProtocol> {
    peer: SocketAddr,
    framed: Framed<TcpStream, W::Codec>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<W> Debug for Connection<W>
where
    W: WireProtocol,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("protocol", &W::name())
            .finish_non_exhaustive()
    }
}

impl<W> Connection<W>
where
    W: WireProtocol,
{
    pub async fn connect(
        addr: SocketAddr,
        settings: &SocketSettings,
        authenticator: Option<&Arc<dyn Authenticator>>,
    ) -> Result<Self, ConnectionError> {
        let connect = TcpStream::connect(addr);
        let mut stream = timeout(settings.connect_timeout, connect)
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "connect",
                timeout: settings.connect_timeout,
            })?
            .map_err(|source| ConnectionError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        if let Some(authenticator) = authenticator {
            authenticator
                .authenticate(&mut stream)
                .await
                .map_err(ConnectionError::Authentication)?;
        }
        trace!("opened {} connection to {}", W::name(), addr);
        Ok(Self {
            peer: addr,
            framed: Framed::new(stream, W::Codec::default()),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Buffers a request without flushing, for pipelining.
    pub async fn feed(&mut self, request: W::Request) -> Result<(), ConnectionError> {
        timeout(self.write_timeout, self.framed.feed(request))
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "write",
                timeout: self.write_timeout,
            })??;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        timeout(self.write_timeout, SinkExt::<W::Request>::flush(&mut self.framed))
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "flush",
                timeout: self.write_timeout,
            })??;
        Ok(())
    }

    pub async fn send(&mut self, request: W::Request) -> Result<(), ConnectionError> {
        self.feed(request).await?;
        self.flush().await
    }

    pub async fn recv(&mut self) -> Result<W::Frame, ConnectionError> {
        let frame = timeout(self.read_timeout, self.framed.next())
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "read",
                timeout: self.read_timeout,
            })?;
        match frame {
            Some(frame) => {
                let frame = frame?;
                trace!("{} received {:?}", self.peer, frame);
                Ok(frame)
            }
            None => Err(ConnectionError::Closed),
        }
    }
}

/// A connection checked out of a node's pool. It goes back to the idle list on drop unless an
/// operation on it failed, in which case it is discarded and the node's failure count grows.
pub struct PooledConnection<W: WireProtocol> {
    connection: Option<Connection<W>>,
    node: Arc<Node<W>>,
    poisoned: bool,
    _permit: OwnedSemaphorePermit,
}

impl<W> Debug for PooledConnection<W>
where
    W: WireProtocol,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<W> PooledConnection<W>
where
    W: WireProtocol,
{
    pub(crate) fn new(connection: Connection<W>, node: Arc<Node<W>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            connection: Some(connection),
            node,
            poisoned: false,
            _permit: permit,
        }
    }

    pub fn node(&self) -> &Arc<Node<W>> {
        &self.node
    }

    /// Discard the connection on drop. Used when the stream is left in an unknown state.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Marks the connection poisoned for the duration of one operation. A future dropped
    /// mid-operation leaves the flag set and the half read stream never returns to the pool.
    fn begin(&mut self) -> Result<&mut Connection<W>, ConnectionError> {
        if self.poisoned {
            return Err(ConnectionError::Closed);
        }
        self.poisoned = true;
        self.connection.as_mut().ok_or(ConnectionError::Closed)
    }

    fn complete<T>(&mut self, result: Result<T, ConnectionError>) -> Result<T, ConnectionError> {
        self.poisoned = result.is_err();
        result
    }

    pub async fn feed(&mut self, request: W::Request) -> Result<(), ConnectionError> {
        let result = self.begin()?.feed(request).await;
        self.complete(result)
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        let result = self.begin()?.flush().await;
        self.complete(result)
    }

    pub async fn send(&mut self, request: W::Request) -> Result<(), ConnectionError> {
        let result = self.begin()?.send(request).await;
        self.complete(result)
    }

    pub async fn recv(&mut self) -> Result<W::Frame, ConnectionError> {
        let result = self.begin()?.recv().await;
        self.complete(result)
    }
}

impl<W> Drop for PooledConnection<W>
where
    W: WireProtocol,
{
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.poisoned {
                trace!("discard poisoned connection to {}", connection.peer());
                self.node.record_failure();
            } else {
                self.node.release(connection);
            }
        }
    }
}
