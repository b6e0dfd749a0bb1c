use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use memcache_core::config::settings::ProtocolKind;
use memcache_protocol::binary::{Header, Opcode, Status, HEADER_LEN, RESPONSE_MAGIC};

const VERSION: &str = "1.6.0-mock";
const NO_CREATE: u32 = 0xffff_ffff;

#[derive(Debug, Clone)]
struct Item {
    flags: u32,
    data: Bytes,
    cas: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Verb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Stored {
    Stored(u64),
    NotStored,
    Exists,
    NotFound,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Counter {
    Value(u64),
    NotFound,
    NonNumeric,
}

/// In memory item store shared by every connection of one mock server.
#[derive(Debug, Default)]
pub(crate) struct MockStore {
    items: DashMap<String, Item>,
    cas: AtomicU64,
}

impl MockStore {
    fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get(&self, key: &str) -> Option<Item> {
        self.items.get(key).map(|item| item.clone())
    }

    fn store(&self, verb: Verb, key: &str, flags: u32, data: Bytes, cas: u64) -> Stored {
        let next = self.next_cas();
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if cas != 0 && entry.get().cas != cas {
                    return Stored::Exists;
                }
                let item = entry.get_mut();
                match verb {
                    Verb::Add => return Stored::NotStored,
                    Verb::Set | Verb::Replace => {
                        item.flags = flags;
                        item.data = data;
                    }
                    Verb::Append => {
                        let mut joined = BytesMut::from(&item.data[..]);
                        joined.put_slice(&data);
                        item.data = joined.freeze();
                    }
                    Verb::Prepend => {
                        let mut joined = BytesMut::from(&data[..]);
                        joined.put_slice(&item.data);
                        item.data = joined.freeze();
                    }
                }
                item.cas = next;
                Stored::Stored(next)
            }
            Entry::Vacant(entry) => {
                if cas != 0 {
                    return Stored::NotFound;
                }
                match verb {
                    Verb::Set | Verb::Add => {
                        entry.insert(Item { flags, data, cas: next });
                        Stored::Stored(next)
                    }
                    Verb::Replace | Verb::Append | Verb::Prepend => Stored::NotStored,
                }
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }

    fn mutate(&self, key: &str, increment: bool, delta: u64, initial: Option<u64>) -> Counter {
        let next = self.next_cas();
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let item = entry.get_mut();
                let Some(current) = std::str::from_utf8(&item.data).ok().and_then(|s| s.trim().parse::<u64>().ok()) else {
                    return Counter::NonNumeric;
                };
                let value = if increment {
                    current.wrapping_add(delta)
                } else {
                    current.saturating_sub(delta)
                };
                item.data = Bytes::from(value.to_string());
                item.cas = next;
                Counter::Value(value)
            }
            Entry::Vacant(entry) => match initial {
                Some(initial) => {
                    entry.insert(Item {
                        flags: 0,
                        data: Bytes::from(initial.to_string()),
                        cas: next,
                    });
                    Counter::Value(initial)
                }
                None => Counter::NotFound,
            },
        }
    }

    fn flush(&self) {
        self.items.clear();
    }
}

/// A memcached stand in listening on loopback, speaking either protocol.
pub(crate) struct MockServer {
    addr: SocketAddr,
    store: Arc<MockStore>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start(protocol: ProtocolKind) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), protocol).await
    }

    pub(crate) async fn start_on(addr: SocketAddr, protocol: ProtocolKind) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(MockStore::default());
        let token = CancellationToken::new();
        let handle = {
            let store = store.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    let stream = tokio::select! {
                        _ = token.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => stream,
                            Err(_) => break,
                        },
                    };
                    let store = store.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = serve(stream, store, protocol) => {}
                        }
                    });
                }
            })
        };
        Self {
            addr,
            store,
            token,
            handle,
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `127.0.0.1:port`, the form the client accepts as a server.
    pub(crate) fn server(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn len(&self) -> usize {
        self.store.items.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.store.items.contains_key(key)
    }

    /// Closes the listener and every open connection.
    pub(crate) async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
        // let the connection tasks observe the cancellation and drop their streams
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

async fn serve(stream: TcpStream, store: Arc<MockStore>, protocol: ProtocolKind) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    match protocol {
        ProtocolKind::Binary => serve_binary(stream, &store).await,
        ProtocolKind::Text => serve_text(stream, &store).await,
    }
}

struct Reply {
    status: Status,
    extras: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
    cas: u64,
}

impl Reply {
    fn status(status: Status) -> Self {
        Self {
            status,
            extras: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
            cas: 0,
        }
    }

    fn encode(&self, request: &Header, out: &mut BytesMut) {
        let header = Header {
            magic: RESPONSE_MAGIC,
            opcode: request.opcode,
            key_len: self.key.len() as u16,
            extras_len: self.extras.len() as u8,
            data_type: 0,
            status_or_vbucket: self.status.code(),
            total_body_len: (self.extras.len() + self.key.len() + self.value.len()) as u32,
            opaque: request.opaque,
            cas: self.cas,
        };
        header.encode(out);
        out.put_slice(&self.extras);
        out.put_slice(&self.key);
        out.put_slice(&self.value);
    }
}

fn binary_replies(store: &MockStore, header: &Header, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<Reply> {
    let key_str = String::from_utf8_lossy(key).into_owned();
    let Ok(opcode) = Opcode::try_from(header.opcode) else {
        return vec![Reply::status(Status::UnknownCommand)];
    };
    match opcode {
        Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => match store.get(&key_str) {
            Some(item) => {
                let with_key = matches!(opcode, Opcode::GetK | Opcode::GetKQ);
                vec![Reply {
                    status: Status::NoError,
                    extras: item.flags.to_be_bytes().to_vec(),
                    key: if with_key { key.to_vec() } else { Vec::new() },
                    value: item.data.to_vec(),
                    cas: item.cas,
                }]
            }
            None if opcode.is_quiet() => Vec::new(),
            None => vec![Reply::status(Status::KeyNotFound)],
        },
        Opcode::Set | Opcode::Add | Opcode::Replace | Opcode::Append | Opcode::Prepend => {
            let verb = match opcode {
                Opcode::Set => Verb::Set,
                Opcode::Add => Verb::Add,
                Opcode::Replace => Verb::Replace,
                Opcode::Append => Verb::Append,
                _ => Verb::Prepend,
            };
            let mut extras = extras;
            let flags = if extras.len() >= 4 { extras.get_u32() } else { 0 };
            let data = Bytes::copy_from_slice(value);
            let status = match store.store(verb, &key_str, flags, data, header.cas) {
                Stored::Stored(cas) => {
                    let mut reply = Reply::status(Status::NoError);
                    reply.cas = cas;
                    return vec![reply];
                }
                Stored::NotStored if verb == Verb::Add => Status::KeyExists,
                Stored::NotStored if verb == Verb::Replace => Status::KeyNotFound,
                Stored::NotStored => Status::ItemNotStored,
                Stored::Exists => Status::KeyExists,
                Stored::NotFound => Status::KeyNotFound,
            };
            vec![Reply::status(status)]
        }
        Opcode::Delete => {
            if store.delete(&key_str) {
                vec![Reply::status(Status::NoError)]
            } else {
                vec![Reply::status(Status::KeyNotFound)]
            }
        }
        Opcode::Increment | Opcode::Decrement => {
            let mut extras = extras;
            if extras.len() < 20 {
                return vec![Reply::status(Status::InvalidArguments)];
            }
            let delta = extras.get_u64();
            let initial = extras.get_u64();
            let expiration = extras.get_u32();
            let initial = (expiration != NO_CREATE).then_some(initial);
            match store.mutate(&key_str, opcode == Opcode::Increment, delta, initial) {
                Counter::Value(value) => {
                    let mut reply = Reply::status(Status::NoError);
                    reply.value = value.to_be_bytes().to_vec();
                    vec![reply]
                }
                Counter::NotFound => vec![Reply::status(Status::KeyNotFound)],
                Counter::NonNumeric => vec![Reply::status(Status::NonNumeric)],
            }
        }
        Opcode::Flush => {
            store.flush();
            vec![Reply::status(Status::NoError)]
        }
        Opcode::Noop => vec![Reply::status(Status::NoError)],
        Opcode::Version => {
            let mut reply = Reply::status(Status::NoError);
            reply.value = VERSION.as_bytes().to_vec();
            vec![reply]
        }
        Opcode::Stat => {
            let mut stat = Reply::status(Status::NoError);
            stat.key = b"curr_items".to_vec();
            stat.value = store.items.len().to_string().into_bytes();
            vec![stat, Reply::status(Status::NoError)]
        }
        _ => vec![Reply::status(Status::UnknownCommand)],
    }
}

async fn serve_binary(mut stream: TcpStream, store: &MockStore) -> std::io::Result<()> {
    let mut buf = [0u8; HEADER_LEN];
    loop {
        stream.read_exact(&mut buf).await?;
        let Ok(header) = Header::decode(&buf) else {
            return Ok(());
        };
        let mut body = vec![0u8; header.total_body_len as usize];
        stream.read_exact(&mut body).await?;
        let extras_end = header.extras_len as usize;
        let key_end = extras_end + header.key_len as usize;
        let replies = binary_replies(store, &header, &body[..extras_end], &body[extras_end..key_end], &body[key_end..]);
        let mut out = BytesMut::new();
        for reply in replies {
            reply.encode(&header, &mut out);
        }
        if !out.is_empty() {
            stream.write_all(&out).await?;
        }
    }
}

async fn serve_text(stream: TcpStream, store: &MockStore) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let parts: Vec<&str> = line.split_ascii_whitespace().collect();
        let mut out = String::new();
        let mut data_out = BytesMut::new();
        match parts.as_slice() {
            [command @ ("get" | "gets"), keys @ ..] => {
                for key in keys {
                    if let Some(item) = store.get(key) {
                        let header = if *command == "gets" {
                            format!("VALUE {} {} {} {}\r\n", key, item.flags, item.data.len(), item.cas)
                        } else {
                            format!("VALUE {} {} {}\r\n", key, item.flags, item.data.len())
                        };
                        data_out.put_slice(header.as_bytes());
                        data_out.put_slice(&item.data);
                        data_out.put_slice(b"\r\n");
                    }
                }
                data_out.put_slice(b"END\r\n");
            }
            [verb @ ("set" | "add" | "replace" | "append" | "prepend" | "cas"), key, flags, _expiration, len, rest @ ..] => {
                let (Ok(flags), Ok(len)) = (flags.parse::<u32>(), len.parse::<usize>()) else {
                    out.push_str("CLIENT_ERROR bad command line format\r\n");
                    stream.write_all(out.as_bytes()).await?;
                    continue;
                };
                let mut data = vec![0u8; len + 2];
                stream.read_exact(&mut data).await?;
                data.truncate(len);
                let (verb, cas) = match *verb {
                    "set" => (Verb::Set, 0),
                    "add" => (Verb::Add, 0),
                    "replace" => (Verb::Replace, 0),
                    "append" => (Verb::Append, 0),
                    "prepend" => (Verb::Prepend, 0),
                    _ => (Verb::Set, rest.first().and_then(|cas| cas.parse().ok()).unwrap_or(0)),
                };
                let reply = match store.store(verb, key, flags, Bytes::from(data), cas) {
                    Stored::Stored(_) => "STORED",
                    Stored::NotStored => "NOT_STORED",
                    Stored::Exists => "EXISTS",
                    Stored::NotFound => "NOT_FOUND",
                };
                out.push_str(reply);
                out.push_str("\r\n");
            }
            ["delete", key, ..] => {
                out.push_str(if store.delete(key) { "DELETED\r\n" } else { "NOT_FOUND\r\n" });
            }
            [command @ ("incr" | "decr"), key, delta] => match delta.parse::<u64>() {
                Ok(delta) => match store.mutate(key, *command == "incr", delta, None) {
                    Counter::Value(value) => out.push_str(&format!("{}\r\n", value)),
                    Counter::NotFound => out.push_str("NOT_FOUND\r\n"),
                    Counter::NonNumeric => {
                        out.push_str("CLIENT_ERROR cannot increment or decrement non-numeric value\r\n")
                    }
                },
                Err(_) => out.push_str("CLIENT_ERROR invalid numeric delta argument\r\n"),
            },
            ["flush_all", ..] => {
                store.flush();
                out.push_str("OK\r\n");
            }
            ["stats", ..] => {
                out.push_str(&format!("STAT curr_items {}\r\nEND\r\n", store.items.len()));
            }
            ["version"] => out.push_str(&format!("VERSION {}\r\n", VERSION)),
            _ => out.push_str("ERROR\r\n"),
        }
        if !data_out.is_empty() {
            stream.write_all(&data_out).await?;
        }
        if !out.is_empty() {
            stream.write_all(out.as_bytes()).await?;
        }
    }
}
