//! Pipeline support for batching Redis commands
//!
//! A pipeline collects commands and sends them in a single write on a single
//! connection, then reads one reply per command. Queuing a command hands back
//! a [`Slot`] that remembers both its position and its reply type, so a reply
//! is decoded as exactly the type its command produces.
//!
//! # Examples
//!
//! ```no_run
//! use redis_aggz::{Client, ConnectionConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//!
//! let mut pipeline = client.pipeline();
//! let added = pipeline.sadd("{T}", vec!["{T}email0@email.com".to_string()]);
//! let entries = pipeline.zadd("{T}email0@email.com", vec![(1.0, "1".to_string())]);
//!
//! let results = pipeline.execute().await?;
//! println!("added {}, entries {}", results.get(&added)?, results.get(&entries)?);
//! # Ok(())
//! # }
//! ```
//!
//! Transport failures abort the whole batch. Commands already written before
//! the failure may have been applied; nothing is rolled back.

use crate::commands::{Command, DelCommand, SAddCommand, UnlinkCommand, ZAddCommand};
use crate::connection::Request;
use crate::core::{
    error::{RedisError, RedisResult},
    value::{from_reply, FromResp, RespValue},
};
use crate::pool::Pool;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait for executing pipelined commands
#[async_trait::async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Execute a batch of requests on one connection and return their replies
    async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>>;
}

#[async_trait::async_trait]
impl PipelineExecutor for Pool {
    async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>> {
        Pool::execute_pipeline(self, requests).await
    }
}

/// Handle to the reply of one queued command
#[derive(Debug)]
pub struct Slot<T> {
    index: usize,
    _reply: PhantomData<fn() -> T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

/// A pipeline for batching Redis commands
pub struct Pipeline {
    requests: Vec<Request>,
    executor: Arc<dyn PipelineExecutor>,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(executor: Arc<dyn PipelineExecutor>) -> Self {
        Self {
            requests: Vec::new(),
            executor,
        }
    }

    /// Queue a command and get the slot its reply will land in
    pub fn queue<C: Command>(&mut self, command: C) -> Slot<C::Output> {
        let index = self.requests.len();
        self.requests.push(command.request());
        Slot {
            index,
            _reply: PhantomData,
        }
    }

    /// Add an SADD command to the pipeline
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> Slot<i64> {
        self.queue(SAddCommand::new(key, members))
    }

    /// Add a ZADD command to the pipeline
    pub fn zadd(&mut self, key: impl Into<String>, entries: Vec<(f64, String)>) -> Slot<i64> {
        self.queue(ZAddCommand::new(key, entries))
    }

    /// Add a DEL command to the pipeline
    pub fn del(&mut self, keys: Vec<String>) -> Slot<i64> {
        self.queue(DelCommand::new(keys))
    }

    /// Add an UNLINK command to the pipeline
    pub fn unlink(&mut self, keys: Vec<String>) -> Slot<i64> {
        self.queue(UnlinkCommand::new(keys))
    }

    /// Get the number of commands in the pipeline
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the pipeline is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Execute all commands in the pipeline
    ///
    /// The queue is drained either way. An empty pipeline yields an empty
    /// result without touching the network.
    ///
    /// # Errors
    ///
    /// Returns an error if network communication fails or if the server sent
    /// back a different number of replies than commands were queued.
    pub async fn execute(&mut self) -> RedisResult<PipelineResult> {
        if self.is_empty() {
            return Ok(PipelineResult::new(Vec::new()));
        }

        let expected = self.len();
        let requests = std::mem::take(&mut self.requests);
        let results = self.executor.execute_pipeline(requests).await?;
        if results.len() != expected {
            return Err(RedisError::Protocol(format!(
                "Pipeline sent {} commands but received {} replies",
                expected,
                results.len()
            )));
        }

        Ok(PipelineResult::new(results))
    }
}

/// Replies of an executed pipeline
#[derive(Debug, Clone)]
pub struct PipelineResult {
    results: Vec<RespValue>,
}

impl PipelineResult {
    /// Create a new pipeline result
    #[must_use]
    pub fn new(results: Vec<RespValue>) -> Self {
        Self { results }
    }

    /// Decode the reply in `slot`
    ///
    /// # Errors
    ///
    /// Returns the server error if that command failed, or a type error if
    /// the reply does not decode.
    pub fn get<T: FromResp>(&self, slot: &Slot<T>) -> RedisResult<T> {
        let reply = self.results.get(slot.index).cloned().ok_or_else(|| {
            RedisError::Protocol(format!("Index {} out of bounds", slot.index))
        })?;
        from_reply(reply)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch and answers with canned replies
    struct MockExecutor {
        replies: Vec<RespValue>,
        batches: Mutex<Vec<Vec<Request>>>,
    }

    impl MockExecutor {
        fn new(replies: Vec<RespValue>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl PipelineExecutor for MockExecutor {
        async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>> {
            self.batches.lock().unwrap().push(requests);
            Ok(self.replies.clone())
        }
    }

    #[tokio::test]
    async fn test_typed_slots() {
        let executor = MockExecutor::new(vec![RespValue::Integer(2), RespValue::Integer(7)]);
        let mut pipeline = Pipeline::new(executor.clone());

        let added = pipeline.sadd("{T}", vec!["a".into(), "b".into()]);
        let card = pipeline.zadd("{T}email0@email.com", vec![(1.0, "1".into())]);
        assert_eq!(pipeline.len(), 2);

        let results = pipeline.execute().await.unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(results.get(&added).unwrap(), 2);
        assert_eq!(results.get(&card).unwrap(), 7);

        let batches = executor.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].command, "SADD");
        assert_eq!(batches[0][1].command, "ZADD");
    }

    #[tokio::test]
    async fn test_empty_pipeline_skips_executor() {
        let executor = MockExecutor::new(vec![]);
        let mut pipeline = Pipeline::new(executor.clone());
        pipeline.execute().await.unwrap();
        assert!(executor.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_command_error_stays_in_slot() {
        let executor = MockExecutor::new(vec![
            RespValue::Integer(1),
            RespValue::Error("WRONGTYPE bad".into()),
        ]);
        let mut pipeline = Pipeline::new(executor);
        let first = pipeline.sadd("{T}", vec!["a".into()]);
        let second = pipeline.zadd("{T}", vec![(1.0, "1".into())]);

        let results = pipeline.execute().await.unwrap();
        assert_eq!(results.get(&first).unwrap(), 1);
        assert!(matches!(results.get(&second), Err(RedisError::Server(_))));
    }

    #[tokio::test]
    async fn test_reply_count_mismatch() {
        let executor = MockExecutor::new(vec![RespValue::Integer(1)]);
        let mut pipeline = Pipeline::new(executor);
        pipeline.del(vec!["a".into()]);
        pipeline.del(vec!["b".into()]);
        assert!(matches!(
            pipeline.execute().await,
            Err(RedisError::Protocol(_))
        ));
    }
}
