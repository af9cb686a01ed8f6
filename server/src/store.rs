//! Store and pub/sub bus contract, with Redis and in-memory implementations
//!
//! The matchmaker and the per-game message fan-out both run through an
//! external store that provides atomic list operations and pub/sub topics.
//! [`Store`] captures exactly the commands the server needs; [`RedisStore`]
//! speaks RESP2 to a real Redis instance, while [`MemoryStore`] backs the
//! same contract with in-process state so the whole protocol is testable
//! (and runnable single-process) without a live bus.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Errors from the store and bus layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store protocol error: {0}")]
    Protocol(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("store connection closed")]
    Closed,
}

/// A live subscription to one pub/sub topic.
///
/// Yields raw message payloads until the subscription ends. Dropping the
/// handle tears down the reader task and, for Redis, its dedicated
/// connection.
pub struct Subscription {
    rx: mpsc::Receiver<Result<Vec<u8>, StoreError>>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn new(rx: mpsc::Receiver<Result<Vec<u8>, StoreError>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next raw payload, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, StoreError>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The store operations the server relies on.
///
/// List commands follow Redis semantics: `lpush` prepends, `rpop` claims
/// from the tail (so the list is FIFO for matchmaking), `lrem` removes one
/// occurrence and reports how many entries it actually removed.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn lrem(&self, key: &str, value: &str) -> Result<i64, StoreError>;
    async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), StoreError>;
    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), StoreError>;
    async fn num_subscribers(&self, topic: &str) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// RESP2 wire format
// ---------------------------------------------------------------------------

/// One RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Value>),
}

/// Encode a command as a RESP array of bulk strings.
fn write_command(buf: &mut Vec<u8>, args: &[&[u8]]) {
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

async fn read_line<R: AsyncBufRead + Unpin + Send>(reader: &mut R) -> Result<String, StoreError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(StoreError::Closed);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(StoreError::Protocol("line missing CRLF terminator".into()));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|_| StoreError::Protocol("non-utf8 reply line".into()))
}

/// Parse one RESP value. Boxed because arrays recurse.
fn read_value<'a, R: AsyncBufRead + Unpin + Send>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send + 'a>> {
    Box::pin(async move {
        let line = read_line(reader).await?;
        let (kind, rest) = line.split_at(1);
        match kind {
            "+" => Ok(Value::Simple(rest.to_string())),
            "-" => Ok(Value::Error(rest.to_string())),
            ":" => rest
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| StoreError::Protocol(format!("bad integer reply {rest:?}"))),
            "$" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| StoreError::Protocol(format!("bad bulk length {rest:?}")))?;
                if len < 0 {
                    return Ok(Value::Null);
                }
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf).await?;
                if !buf.ends_with(b"\r\n") {
                    return Err(StoreError::Protocol("bulk string missing CRLF".into()));
                }
                buf.truncate(buf.len() - 2);
                Ok(Value::Bulk(buf))
            }
            "*" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| StoreError::Protocol(format!("bad array length {rest:?}")))?;
                if len < 0 {
                    return Ok(Value::Null);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_value(reader).await?);
                }
                Ok(Value::Array(items))
            }
            other => Err(StoreError::Protocol(format!(
                "unknown reply type marker {other:?}"
            ))),
        }
    })
}

// ---------------------------------------------------------------------------
// Redis client
// ---------------------------------------------------------------------------

/// One connection to the Redis server.
struct RedisConn {
    stream: BufReader<TcpStream>,
}

impl RedisConn {
    async fn dial(address: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(normalize_address(address)).await?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    async fn send(&mut self, args: &[&[u8]]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        write_command(&mut buf, args);
        self.stream.get_mut().write_all(&buf).await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Value, StoreError> {
        read_value(&mut self.stream).await
    }

    /// Send a command and read its reply, turning `-ERR` replies into errors.
    async fn command(&mut self, args: &[&[u8]]) -> Result<Value, StoreError> {
        self.send(args).await?;
        match self.read_reply().await? {
            Value::Error(e) => Err(StoreError::Command(e)),
            value => Ok(value),
        }
    }
}

/// Addresses may omit the host (`:6379`), which means localhost.
fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("127.0.0.1{address}")
    } else {
        address.to_string()
    }
}

const MAX_IDLE: usize = 3;
const IDLE_TIMEOUT: Duration = Duration::from_secs(240);

/// Small connection pool. Idle connections expire, and every borrowed
/// connection is validated with PING before reuse.
struct Pool {
    address: String,
    idle: Mutex<Vec<(RedisConn, Instant)>>,
}

impl Pool {
    fn new(address: String) -> Self {
        Self {
            address,
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn get(&self) -> Result<RedisConn, StoreError> {
        loop {
            let candidate = self.idle.lock().expect("pool lock poisoned").pop();
            match candidate {
                Some((mut conn, parked_at)) => {
                    if parked_at.elapsed() > IDLE_TIMEOUT {
                        continue;
                    }
                    if conn.command(&[b"PING"]).await.is_ok() {
                        return Ok(conn);
                    }
                }
                None => return RedisConn::dial(&self.address).await,
            }
        }
    }

    fn put(&self, conn: RedisConn) {
        let mut idle = self.idle.lock().expect("pool lock poisoned");
        if idle.len() < MAX_IDLE {
            idle.push((conn, Instant::now()));
        }
    }
}

/// [`Store`] implementation backed by a Redis server.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(address: &str) -> Result<Self, StoreError> {
        let store = Self {
            pool: Pool::new(address.to_string()),
        };
        store.ping().await?;
        Ok(store)
    }

    /// Connect, retrying with exponential backoff while the store comes up.
    pub async fn connect_with_backoff(address: &str) -> Result<Self, StoreError> {
        const ATTEMPTS: u32 = 6;
        let mut delay = Duration::from_millis(500);
        let mut attempt = 0;
        loop {
            match Self::connect(address).await {
                Ok(store) => return Ok(store),
                Err(e) if attempt + 1 < ATTEMPTS => {
                    log::warn!("could not connect to redis at {address}: {e}, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one command on a pooled connection.
    async fn command(&self, args: &[&[u8]]) -> Result<Value, StoreError> {
        let mut conn = self.pool.get().await?;
        match conn.command(args).await {
            Ok(value) => {
                self.pool.put(conn);
                Ok(value)
            }
            // A failed connection is dropped rather than returned to the pool.
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        match self.command(&[b"PING"]).await? {
            Value::Simple(s) if s == "PONG" => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected PING reply {other:?}"
            ))),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.command(&[b"LPUSH", key.as_bytes(), value.as_bytes()])
            .await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(&[b"RPOP", key.as_bytes()]).await? {
            Value::Null => Ok(None),
            Value::Bulk(b) => String::from_utf8(b)
                .map(Some)
                .map_err(|_| StoreError::Protocol("non-utf8 list entry".into())),
            other => Err(StoreError::Protocol(format!(
                "unexpected RPOP reply {other:?}"
            ))),
        }
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        match self
            .command(&[b"LREM", key.as_bytes(), b"1", value.as_bytes()])
            .await?
        {
            Value::Int(n) => Ok(n),
            other => Err(StoreError::Protocol(format!(
                "unexpected LREM reply {other:?}"
            ))),
        }
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self
            .command(&[b"LRANGE", key.as_bytes(), b"0", b"-1"])
            .await?
        {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Bulk(b) => String::from_utf8(b)
                        .map_err(|_| StoreError::Protocol("non-utf8 list entry".into())),
                    other => Err(StoreError::Protocol(format!(
                        "unexpected LRANGE element {other:?}"
                    ))),
                })
                .collect(),
            other => Err(StoreError::Protocol(format!(
                "unexpected LRANGE reply {other:?}"
            ))),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.command(&[b"PUBLISH", topic.as_bytes(), payload])
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        // Subscriptions get a dedicated connection for their whole lifetime.
        let mut conn = RedisConn::dial(&self.pool.address).await?;
        conn.send(&[b"SUBSCRIBE", topic.as_bytes()]).await?;
        match conn.read_reply().await? {
            Value::Array(items)
                if matches!(items.first(), Some(Value::Bulk(kind)) if kind == b"subscribe") => {}
            other => {
                return Err(StoreError::Protocol(format!(
                    "unexpected SUBSCRIBE reply {other:?}"
                )))
            }
        }

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            loop {
                match conn.read_reply().await {
                    Ok(Value::Array(items)) => {
                        if let [Value::Bulk(kind), _, Value::Bulk(payload)] = items.as_slice() {
                            if kind == b"message" && tx.send(Ok(payload.clone())).await.is_err() {
                                break;
                            }
                        }
                        // Other push frames (subscribe counts and the like)
                        // are not messages and are skipped.
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });
        Ok(Subscription::new(rx, task))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), StoreError> {
        // Issued on a pooled connection. The subscribed connection itself is
        // torn down when its Subscription handle drops.
        let mut conn = self.pool.get().await?;
        conn.send(&[b"UNSUBSCRIBE", topic.as_bytes()]).await?;
        let _ = conn.read_reply().await?;
        self.pool.put(conn);
        Ok(())
    }

    async fn num_subscribers(&self, topic: &str) -> Result<usize, StoreError> {
        let reply = self
            .command(&[b"PUBSUB", b"NUMSUB", topic.as_bytes()])
            .await?;
        let Value::Array(items) = reply else {
            return Err(StoreError::Protocol("NUMSUB reply is not an array".into()));
        };
        if items.len() != 2 {
            return Err(StoreError::Protocol(format!(
                "NUMSUB reply should have two items, got {}",
                items.len()
            )));
        }
        match &items[1] {
            Value::Int(n) => Ok((*n).max(0) as usize),
            other => Err(StoreError::Protocol(format!(
                "NUMSUB count should be an integer, got {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-process [`Store`]: lists under a mutex, one broadcast channel per
/// topic. The live receiver count of a topic is its subscriber count.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self.topics.lock().expect("topic lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut lists = self.lists.lock().expect("list lock poisoned");
        lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut lists = self.lists.lock().expect("list lock poisoned");
        Ok(lists.get_mut(key).and_then(|list| list.pop_back()))
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        let mut lists = self.lists.lock().expect("list lock poisoned");
        if let Some(list) = lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|entry| entry == value) {
                list.remove(pos);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let lists = self.lists.lock().expect("list lock poisoned");
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), StoreError> {
        // Publishing to a topic nobody listens on is not an error.
        let _ = self.topic_sender(topic).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        let mut source = self.topic_sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(Ok(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, task))
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<(), StoreError> {
        // In-memory subscriptions end when their handle drops.
        Ok(())
    }

    async fn num_subscribers(&self, topic: &str) -> Result<usize, StoreError> {
        let topics = self.topics.lock().expect("topic lock poisoned");
        Ok(topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn parse(bytes: &[u8]) -> Result<Value, StoreError> {
        let mut reader = BufReader::new(bytes);
        read_value(&mut reader).await
    }

    #[test]
    fn encodes_commands_as_bulk_string_arrays() {
        let mut buf = Vec::new();
        write_command(&mut buf, &[b"LPUSH", b"OpenGames", b"game-1"]);
        assert_eq!(
            buf,
            b"*3\r\n$5\r\nLPUSH\r\n$9\r\nOpenGames\r\n$6\r\ngame-1\r\n"
        );
    }

    #[tokio::test]
    async fn parses_simple_string() {
        assert_eq!(
            parse(b"+PONG\r\n").await.unwrap(),
            Value::Simple("PONG".into())
        );
    }

    #[tokio::test]
    async fn parses_error_reply() {
        assert_eq!(
            parse(b"-ERR unknown command\r\n").await.unwrap(),
            Value::Error("ERR unknown command".into())
        );
    }

    #[tokio::test]
    async fn parses_integer() {
        assert_eq!(parse(b":42\r\n").await.unwrap(), Value::Int(42));
    }

    #[tokio::test]
    async fn parses_bulk_and_null_bulk() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            Value::Bulk(b"hello".to_vec())
        );
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn parses_nested_array() {
        let reply = b"*3\r\n$7\r\nmessage\r\n$6\r\ntopic1\r\n$2\r\nhi\r\n";
        assert_eq!(
            parse(reply).await.unwrap(),
            Value::Array(vec![
                Value::Bulk(b"message".to_vec()),
                Value::Bulk(b"topic1".to_vec()),
                Value::Bulk(b"hi".to_vec()),
            ])
        );
    }

    #[tokio::test]
    async fn rejects_truncated_reply() {
        assert!(parse(b"$5\r\nhel").await.is_err());
        assert!(matches!(parse(b"").await, Err(StoreError::Closed)));
    }

    #[test]
    fn normalizes_bare_port_addresses() {
        assert_eq!(normalize_address(":6379"), "127.0.0.1:6379");
        assert_eq!(normalize_address("redis.example:6379"), "redis.example:6379");
    }

    #[tokio::test]
    async fn memory_list_is_fifo_through_lpush_rpop() {
        let store = MemoryStore::new();
        store.lpush("games", "first").await.unwrap();
        store.lpush("games", "second").await.unwrap();

        assert_eq!(store.rpop("games").await.unwrap(), Some("first".into()));
        assert_eq!(store.rpop("games").await.unwrap(), Some("second".into()));
        assert_eq!(store.rpop("games").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_lrem_is_idempotent() {
        let store = MemoryStore::new();
        store.lpush("games", "game-1").await.unwrap();

        assert_eq!(store.lrem("games", "game-1").await.unwrap(), 1);
        assert_eq!(store.lrem("games", "game-1").await.unwrap(), 0);
        assert_eq!(store.lrem("games", "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_pubsub_delivers_to_subscriber() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("topic").await.unwrap();
        store.publish("topic", b"payload").await.unwrap();

        let received = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for message")
            .expect("subscription ended early")
            .unwrap();
        assert_eq!(received, b"payload");
    }

    #[tokio::test]
    async fn memory_subscriber_count_tracks_subscriptions() {
        let store = MemoryStore::new();
        assert_eq!(store.num_subscribers("topic").await.unwrap(), 0);

        let sub1 = store.subscribe("topic").await.unwrap();
        let sub2 = store.subscribe("topic").await.unwrap();
        assert_eq!(store.num_subscribers("topic").await.unwrap(), 2);

        drop(sub1);
        drop(sub2);
        // Dropping a subscription aborts its forwarding task; give the
        // runtime a moment to collect them.
        for _ in 0..50 {
            if store.num_subscribers("topic").await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscriber count never dropped to zero");
    }
}
