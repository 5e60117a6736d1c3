//! High-level client API
//!
//! [`Client`] talks to a single standalone server through a [`Pool`]. It
//! exposes just the commands the seeding, writing and aggregation flow uses,
//! plus the scripting calls behind [`Script`](crate::Script).

use crate::commands::{
    Command, DbSizeCommand, SCardCommand, SMembersCommand, ScanCommand, ScanPage, ScoreRange,
    ZCardCommand, ZCountCommand,
};
use crate::connection::Request;
use crate::core::{
    config::ConnectionConfig,
    error::RedisResult,
    value::{from_reply, FromResp, RespValue},
};
use crate::pipeline::Pipeline;
use crate::pool::Pool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Redis client over a pooled set of connections
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    /// Connect to Redis with the given configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use redis_aggz::{Client, ConnectionConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = ConnectionConfig::new("redis://localhost:6379");
    ///     let client = Client::connect(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: ConnectionConfig) -> RedisResult<Self> {
        let endpoint = config.endpoint()?;
        info!("Connecting to Redis at {}", endpoint.address());

        let pool = Pool::new(&config, &endpoint).await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Execute any command and decode its reply
    pub async fn execute<C: Command>(&self, command: C) -> RedisResult<C::Output> {
        let response = self.pool.execute_command(command.request()).await?;
        command.parse_response(response)
    }

    /// Issue DBSIZE and log the result, proving the connection works
    pub async fn health_check(&self) -> RedisResult<i64> {
        let size = self.dbsize().await?;
        info!("Connection verified, database holds {} keys", size);
        Ok(size)
    }

    /// Create a new pipeline on this client's pool
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.pool.clone())
    }

    // Keyspace commands

    /// Number of keys in the selected database
    pub async fn dbsize(&self) -> RedisResult<i64> {
        self.execute(DbSizeCommand).await
    }

    /// One SCAN step
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<usize>,
    ) -> RedisResult<ScanPage> {
        let mut command = ScanCommand::new(cursor);
        if let Some(pattern) = pattern {
            command = command.matching(pattern);
        }
        if let Some(count) = count {
            command = command.count(count);
        }
        self.execute(command).await
    }

    // Set commands

    /// All members of a set
    pub async fn smembers(&self, key: impl Into<String>) -> RedisResult<HashSet<String>> {
        self.execute(SMembersCommand::new(key)).await
    }

    /// Number of members in a set
    pub async fn scard(&self, key: impl Into<String>) -> RedisResult<i64> {
        self.execute(SCardCommand::new(key)).await
    }

    // Sorted set commands

    /// Number of entries in a sorted set
    pub async fn zcard(&self, key: impl Into<String>) -> RedisResult<i64> {
        self.execute(ZCardCommand::new(key)).await
    }

    /// Number of entries with a score inside `range`
    pub async fn zcount(&self, key: impl Into<String>, range: ScoreRange) -> RedisResult<i64> {
        self.execute(ZCountCommand::new(key, range)).await
    }

    // Scripting

    /// Run a Lua script by source
    pub async fn eval<T: FromResp>(
        &self,
        script: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> RedisResult<T> {
        self.run_script("EVAL", script, keys, args).await
    }

    /// Run a cached Lua script by SHA1
    pub async fn evalsha<T: FromResp>(
        &self,
        sha: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> RedisResult<T> {
        self.run_script("EVALSHA", sha, keys, args).await
    }

    async fn run_script<T: FromResp>(
        &self,
        command: &str,
        body: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> RedisResult<T> {
        let mut cmd_args = Vec::with_capacity(2 + keys.len() + args.len());
        cmd_args.push(RespValue::from(body));
        cmd_args.push(RespValue::from(keys.len()));
        cmd_args.extend(keys.into_iter().map(RespValue::from));
        cmd_args.extend(args.into_iter().map(RespValue::from));

        let response = self
            .pool
            .execute_command(Request::new(command, cmd_args))
            .await?;
        from_reply(response)
    }
}
