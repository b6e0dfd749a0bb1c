use std::sync::Arc;

pub mod auth;
pub mod connection;
pub mod health_check;
pub mod node;
pub mod server_pool;

pub type NodeRef<W> = Arc<node::Node<W>>;

#[cfg(test)]
pub(crate) mod test {
    use std::net::SocketAddr;

    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::Level;

    use memcache_core::ext::init_logger;
    use memcache_protocol::binary::{Header, HEADER_LEN, RESPONSE_MAGIC};

    #[ctor::ctor]
    fn init() {
        init_logger(Level::DEBUG)
    }

    /// A binary protocol server that answers every request with an empty success reply.
    pub(crate) async fn spawn_ack_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; HEADER_LEN];
                    while stream.read_exact(&mut buf).await.is_ok() {
                        let request = Header::decode(&buf).unwrap();
                        let mut body = vec![0u8; request.total_body_len as usize];
                        if stream.read_exact(&mut body).await.is_err() {
                            break;
                        }
                        let reply = Header {
                            magic: RESPONSE_MAGIC,
                            opcode: request.opcode,
                            opaque: request.opaque,
                            ..Default::default()
                        };
                        let mut out = BytesMut::new();
                        reply.encode(&mut out);
                        if stream.write_all(&out).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    /// An address nothing listens on.
    pub(crate) async fn closed_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }
}
