use std::fmt::Debug;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Runs a credential handshake on a freshly opened stream before it joins a node's pool.
#[async_trait]
pub trait Authenticator: Debug + Send + Sync + 'static {
    async fn authenticate(&self, stream: &mut TcpStream) -> anyhow::Result<()>;
}
