//! The storage seam between the seeding/aggregation logic and a server
//!
//! [`Store`] lists the handful of operations the flow needs. [`Client`]
//! implements it against a live server and [`MemoryStore`](crate::MemoryStore)
//! implements it in process.

use crate::client::Client;
use crate::commands::{ScanPage, ScoreRange};
use crate::core::{error::RedisResult, value::RespValue};
use crate::report::KeyCount;
use crate::script::patterns;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Add members to a set
    SAdd {
        /// Set key
        key: String,
        /// Members to add
        members: Vec<String>,
    },
    /// Add `(score, member)` entries to a sorted set
    ZAdd {
        /// Sorted set key
        key: String,
        /// Entries to add
        entries: Vec<(f64, String)>,
    },
    /// Delete keys
    Del(Vec<String>),
    /// Delete keys without blocking the server
    Unlink(Vec<String>),
}

/// Writes sent together on one connection in one round trip
///
/// Not atomic: if the transport fails part-way, writes already transmitted
/// may have been applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an SADD
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::SAdd {
            key: key.into(),
            members,
        });
        self
    }

    /// Queue a ZADD
    pub fn zadd(&mut self, key: impl Into<String>, entries: Vec<(f64, String)>) -> &mut Self {
        self.ops.push(WriteOp::ZAdd {
            key: key.into(),
            entries,
        });
        self
    }

    /// Queue a DEL
    pub fn del(&mut self, keys: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::Del(keys));
        self
    }

    /// Queue an UNLINK
    pub fn unlink(&mut self, keys: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::Unlink(keys));
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Take the queued writes
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Input of one window aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct WindowQuery {
    /// SET naming the sorted sets to count
    pub members_key: String,
    /// Extra key counted like a member when it holds a sorted set
    pub routing_key: Option<String>,
    /// Inclusive score range for the windowed count
    pub range: ScoreRange,
}

/// Operations the seeder, entry writer and aggregator run against a server
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap round trip proving the store is reachable; returns the key count
    async fn dbsize(&self) -> RedisResult<i64>;

    /// All members of a set; empty when the key is missing
    async fn smembers(&self, key: &str) -> RedisResult<HashSet<String>>;

    /// Number of members of a set
    async fn scard(&self, key: &str) -> RedisResult<u64>;

    /// Number of entries in a sorted set
    async fn zcard(&self, key: &str) -> RedisResult<u64>;

    /// Entries of a sorted set whose score lies in `range`
    async fn zcount(&self, key: &str, range: ScoreRange) -> RedisResult<u64>;

    /// One step of a cursor scan over key names matching `pattern`
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RedisResult<ScanPage>;

    /// Send a batch of writes in one round trip; one integer reply per write
    async fn apply(&self, batch: WriteBatch) -> RedisResult<Vec<i64>>;

    /// Total and windowed counts of every member of `query.members_key`,
    /// read from one consistent snapshot
    ///
    /// Returns [`RedisError::Unsupported`](crate::RedisError::Unsupported)
    /// when the store cannot run the atomic script.
    async fn aggregate_window(&self, query: &WindowQuery) -> RedisResult<Vec<KeyCount>>;
}

#[async_trait]
impl Store for Client {
    async fn dbsize(&self) -> RedisResult<i64> {
        self.health_check().await
    }

    async fn smembers(&self, key: &str) -> RedisResult<HashSet<String>> {
        Client::smembers(self, key).await
    }

    async fn scard(&self, key: &str) -> RedisResult<u64> {
        Ok(Client::scard(self, key).await?.max(0) as u64)
    }

    async fn zcard(&self, key: &str) -> RedisResult<u64> {
        Ok(Client::zcard(self, key).await?.max(0) as u64)
    }

    async fn zcount(&self, key: &str, range: ScoreRange) -> RedisResult<u64> {
        Ok(Client::zcount(self, key, range).await?.max(0) as u64)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RedisResult<ScanPage> {
        Client::scan(self, cursor, Some(pattern), Some(count)).await
    }

    async fn apply(&self, batch: WriteBatch) -> RedisResult<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Sending batch of {} writes", batch.len());
        let mut pipeline = self.pipeline();
        let slots: Vec<_> = batch
            .into_ops()
            .into_iter()
            .map(|op| match op {
                WriteOp::SAdd { key, members } => pipeline.sadd(key, members),
                WriteOp::ZAdd { key, entries } => pipeline.zadd(key, entries),
                WriteOp::Del(keys) => pipeline.del(keys),
                WriteOp::Unlink(keys) => pipeline.unlink(keys),
            })
            .collect();

        let results = pipeline.execute().await?;
        slots.iter().map(|slot| results.get(slot)).collect()
    }

    async fn aggregate_window(&self, query: &WindowQuery) -> RedisResult<Vec<KeyCount>> {
        let mut keys = vec![query.members_key.clone()];
        let include = match query.routing_key {
            Some(ref routing_key) => {
                keys.push(routing_key.clone());
                "1"
            }
            None => "0",
        };
        let args = vec![
            query.range.min.to_string(),
            query.range.max.to_string(),
            include.to_string(),
        ];

        let reply: Vec<RespValue> = patterns::window_counts()
            .execute(self, keys, args)
            .await?;
        KeyCount::from_flat_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConnectionConfig, PoolConfig};
    use crate::RedisError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const MIN: &str = "1699999400000";
    const MAX: &str = "1700000000000";

    /// RESP array of bulk strings, as a client sends a command
    fn frame(parts: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", parts.len()).into_bytes();
        for part in parts {
            out.extend_from_slice(format!("${}\r\n{}\r\n", part.len(), part).as_bytes());
        }
        out
    }

    /// Serves one connection: for each exchange reads exactly as many bytes
    /// as the expected request and answers with the canned reply
    async fn scripted_server(
        exchanges: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> (Client, tokio::task::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            for (expected, reply) in exchanges {
                let mut buf = vec![0_u8; expected.len()];
                socket.read_exact(&mut buf).await.unwrap();
                received.push(buf);
                socket.write_all(&reply).await.unwrap();
            }
            received
        });

        let config = ConnectionConfig::new(format!("redis://127.0.0.1:{port}")).with_pool_config(
            PoolConfig {
                max_size: 1,
                test_on_create: false,
                ..Default::default()
            },
        );
        let client = Client::connect(config).await.unwrap();
        (client, handle)
    }

    fn window_query(routing_key: Option<&str>) -> WindowQuery {
        WindowQuery {
            members_key: "{T}".to_string(),
            routing_key: routing_key.map(str::to_string),
            range: ScoreRange::inclusive(1_699_999_400_000.0, 1_700_000_000_000.0),
        }
    }

    #[tokio::test]
    async fn test_client_apply_sends_one_batch_and_maps_replies() {
        let mut request = frame(&["SADD", "{T}", "{T}email0@email.com"]);
        request.extend(frame(&["ZADD", "{T}email0@email.com", MAX, MAX]));
        request.extend(frame(&["UNLINK", "{T}old"]));
        let (client, server) =
            scripted_server(vec![(request.clone(), b":1\r\n:1\r\n:0\r\n".to_vec())]).await;

        let mut batch = WriteBatch::new();
        batch
            .sadd("{T}", vec!["{T}email0@email.com".into()])
            .zadd("{T}email0@email.com", vec![(1_700_000_000_000.0, MAX.into())])
            .unlink(vec!["{T}old".into()]);
        let counts = client.apply(batch).await.unwrap();

        assert_eq!(counts, vec![1, 1, 0]);
        assert_eq!(server.await.unwrap(), vec![request]);
    }

    #[tokio::test]
    async fn test_client_apply_surfaces_command_error() {
        let mut request = frame(&["SADD", "{T}", "a"]);
        request.extend(frame(&["ZADD", "{T}", "1", "1"]));
        let (client, _server) = scripted_server(vec![(
            request,
            b":1\r\n-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
                .to_vec(),
        )])
        .await;

        let mut batch = WriteBatch::new();
        batch.sadd("{T}", vec!["a".into()]).zadd("{T}", vec![(1.0, "1".into())]);
        let err = client.apply(batch).await.unwrap_err();
        assert!(matches!(err, RedisError::Server(ref m) if m.starts_with("WRONGTYPE")));
    }

    #[tokio::test]
    async fn test_client_window_falls_back_to_eval_on_noscript() {
        let script = patterns::window_counts();
        let evalsha = frame(&["EVALSHA", script.sha(), "1", "{T}", MIN, MAX, "0"]);
        let eval = frame(&["EVAL", script.source(), "1", "{T}", MIN, MAX, "0"]);
        let rows = b"*6\r\n$4\r\n{T}a\r\n:5\r\n:4\r\n$4\r\n{T}b\r\n:0\r\n:0\r\n".to_vec();
        let (client, server) = scripted_server(vec![
            (
                evalsha.clone(),
                b"-NOSCRIPT No matching script. Please use EVAL.\r\n".to_vec(),
            ),
            (eval.clone(), rows),
        ])
        .await;

        let counts = client.aggregate_window(&window_query(None)).await.unwrap();
        assert_eq!(
            counts,
            vec![
                KeyCount {
                    key: "{T}a".into(),
                    total: 5,
                    windowed: 4
                },
                KeyCount {
                    key: "{T}b".into(),
                    total: 0,
                    windowed: 0
                },
            ]
        );
        assert_eq!(server.await.unwrap(), vec![evalsha, eval]);
    }

    #[tokio::test]
    async fn test_client_window_passes_routing_key() {
        let script = patterns::window_counts();
        let evalsha = frame(&[
            "EVALSHA",
            script.sha(),
            "2",
            "{T}:members",
            "{T}",
            MIN,
            MAX,
            "1",
        ]);
        let (client, server) =
            scripted_server(vec![(evalsha.clone(), b"*0\r\n".to_vec())]).await;

        let query = WindowQuery {
            members_key: "{T}:members".to_string(),
            ..window_query(Some("{T}"))
        };
        assert!(client.aggregate_window(&query).await.unwrap().is_empty());
        assert_eq!(server.await.unwrap(), vec![evalsha]);
    }

    #[tokio::test]
    async fn test_client_window_without_scripting_is_unsupported() {
        let script = patterns::window_counts();
        let evalsha = frame(&["EVALSHA", script.sha(), "1", "{T}", MIN, MAX, "0"]);
        let (client, _server) = scripted_server(vec![(
            evalsha,
            b"-ERR unknown command 'EVALSHA', with args beginning with: \r\n".to_vec(),
        )])
        .await;

        let err = client.aggregate_window(&window_query(None)).await.unwrap_err();
        assert!(matches!(err, RedisError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_client_malformed_window_reply() {
        let script = patterns::window_counts();
        let evalsha = frame(&["EVALSHA", script.sha(), "1", "{T}", MIN, MAX, "0"]);
        let (client, _server) =
            scripted_server(vec![(evalsha, b"*2\r\n$4\r\n{T}a\r\n:5\r\n".to_vec())]).await;

        let err = client.aggregate_window(&window_query(None)).await.unwrap_err();
        assert!(matches!(err, RedisError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_batch_builder() {
        let mut batch = WriteBatch::new();
        batch
            .sadd("{T}", vec!["{T}email0@email.com".into()])
            .zadd("{T}email0@email.com", vec![(5.0, "5".into())])
            .unlink(vec!["x".into()]);
        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.clone().into_ops()[1], WriteOp::ZAdd { .. }));
        assert!(WriteBatch::new().is_empty());
    }
}
