//! Connection pooling implementations
//!
//! This module provides two strategies for managing Redis connections:
//! - Multiplexed: Single connection shared across multiple tasks
//! - Pool: Multiple connections managed in a pool
//!
//! Either way a pipelined batch is written and read on exactly one
//! connection, so a batch aimed at colocated keys never gets split.

use crate::connection::{RedisConnection, Request};
use crate::core::{
    config::{ConnectionConfig, Endpoint, PoolStrategy},
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Work sent to the multiplexed connection task
enum Job {
    Single {
        request: Request,
        reply: oneshot::Sender<RedisResult<RespValue>>,
    },
    Batch {
        requests: Vec<Request>,
        reply: oneshot::Sender<RedisResult<Vec<RespValue>>>,
    },
}

/// Multiplexed connection pool - uses a single connection with mpsc channel
///
/// A transport or protocol failure leaves unread bytes on the socket, so the
/// task drops that connection and dials a fresh one for the next job.
pub struct MultiplexedPool {
    job_tx: mpsc::UnboundedSender<Job>,
}

impl MultiplexedPool {
    /// Open the connection and start the task that owns it
    pub async fn new(config: &ConnectionConfig, endpoint: &Endpoint) -> RedisResult<Self> {
        let mut conn = Some(open_connection(config, endpoint).await?);
        let config = config.clone();
        let endpoint = endpoint.clone();

        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                // Ignore send errors - caller may have dropped the receiver
                match job {
                    Job::Single { request, reply } => {
                        let result = match live_connection(&mut conn, &config, &endpoint).await {
                            Ok(active) => {
                                active
                                    .execute_command(&request.command, &request.args)
                                    .await
                            }
                            Err(e) => Err(e),
                        };
                        discard_if_broken(&mut conn, result.as_ref().err());
                        let _ = reply.send(result);
                    }
                    Job::Batch { requests, reply } => {
                        let result = match live_connection(&mut conn, &config, &endpoint).await {
                            Ok(active) => active.execute_pipeline(&requests).await,
                            Err(e) => Err(e),
                        };
                        discard_if_broken(&mut conn, result.as_ref().err());
                        let _ = reply.send(result);
                    }
                }
            }
            debug!("Multiplexed connection handler stopped");
        });

        Ok(Self { job_tx })
    }

    fn submit(&self, job: Job) -> RedisResult<()> {
        self.job_tx
            .send(job)
            .map_err(|_| RedisError::Connection("Multiplexed connection closed".to_string()))
    }

    /// Execute a command through the multiplexed connection
    pub async fn execute_command(&self, request: Request) -> RedisResult<RespValue> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Single { request, reply })?;
        rx.await
            .map_err(|_| RedisError::Connection("Response channel closed".to_string()))?
    }

    /// Execute a pipelined batch through the multiplexed connection
    pub async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Batch { requests, reply })?;
        rx.await
            .map_err(|_| RedisError::Connection("Response channel closed".to_string()))?
    }
}

/// Dial a connection, checking it with PING when configured to
async fn open_connection(
    config: &ConnectionConfig,
    endpoint: &Endpoint,
) -> RedisResult<RedisConnection> {
    let mut conn = RedisConnection::connect(endpoint, config).await?;
    if config.pool.test_on_create {
        conn.ping().await?;
    }
    Ok(conn)
}

/// The held connection, redialed if the previous one was discarded
async fn live_connection<'a>(
    slot: &'a mut Option<RedisConnection>,
    config: &ConnectionConfig,
    endpoint: &Endpoint,
) -> RedisResult<&'a mut RedisConnection> {
    if slot.is_none() {
        debug!("Reconnecting multiplexed connection to {}", endpoint.address());
        *slot = Some(open_connection(config, endpoint).await?);
    }
    slot.as_mut()
        .ok_or_else(|| RedisError::Connection("Multiplexed connection unavailable".to_string()))
}

/// Drop the held connection when the last call left it unusable
fn discard_if_broken(slot: &mut Option<RedisConnection>, error: Option<&RedisError>) {
    let Some(e) = error.filter(|e| e.breaks_connection()) else {
        return;
    };
    if let Some(conn) = slot.take() {
        warn!("Discarding connection to {}: {}", conn.address(), e);
    }
}

/// Traditional connection pool with multiple connections
pub struct ConnectionPool {
    idle: Mutex<Vec<RedisConnection>>,
    semaphore: Arc<Semaphore>,
    config: ConnectionConfig,
    endpoint: Endpoint,
}

impl ConnectionPool {
    /// Create a pool and open `min_idle` connections (at least one)
    pub async fn new(config: &ConnectionConfig, endpoint: &Endpoint) -> RedisResult<Self> {
        let max_size = config.pool.max_size.max(1);
        let pool = Self {
            idle: Mutex::new(Vec::new()),
            semaphore: Arc::new(Semaphore::new(max_size)),
            config: config.clone(),
            endpoint: endpoint.clone(),
        };

        let initial_size = config.pool.min_idle.min(max_size).max(1);
        let mut opened = Vec::with_capacity(initial_size);
        for _ in 0..initial_size {
            opened.push(pool.open().await?);
        }
        pool.lock_idle()?.extend(opened);
        debug!(
            "Connection pool ready for {} ({} open, max {})",
            endpoint.address(),
            initial_size,
            max_size
        );

        Ok(pool)
    }

    async fn open(&self) -> RedisResult<RedisConnection> {
        open_connection(&self.config, &self.endpoint).await
    }

    fn lock_idle(&self) -> RedisResult<std::sync::MutexGuard<'_, Vec<RedisConnection>>> {
        self.idle
            .lock()
            .map_err(|_| RedisError::Pool("Idle connection list poisoned".to_string()))
    }

    async fn permit(&self) -> RedisResult<OwnedSemaphorePermit> {
        timeout(
            self.config.pool.connection_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| RedisError::Pool("Timed out waiting for a free connection".to_string()))?
        .map_err(|_| RedisError::Pool("Pool closed".to_string()))
    }

    /// Take an idle connection or open a new one
    async fn checkout(&self) -> RedisResult<RedisConnection> {
        let idle = self.lock_idle()?.pop();
        match idle {
            Some(conn) => Ok(conn),
            None => self.open().await,
        }
    }

    /// Return a connection unless the last call broke it
    fn checkin(&self, conn: RedisConnection, error: Option<&RedisError>) {
        if let Some(e) = error {
            if e.breaks_connection() {
                warn!("Discarding connection to {}: {}", conn.address(), e);
                return;
            }
        }
        if let Ok(mut idle) = self.lock_idle() {
            idle.push(conn);
        }
    }

    /// Execute a command using a connection from the pool
    pub async fn execute_command(&self, request: Request) -> RedisResult<RespValue> {
        let _permit = self.permit().await?;
        let mut conn = self.checkout().await?;
        let result = conn.execute_command(&request.command, &request.args).await;
        self.checkin(conn, result.as_ref().err());
        result
    }

    /// Execute a pipelined batch on one pooled connection
    pub async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>> {
        let _permit = self.permit().await?;
        let mut conn = self.checkout().await?;
        let result = conn.execute_pipeline(&requests).await;
        self.checkin(conn, result.as_ref().err());
        result
    }

    /// Number of connections currently idle
    pub fn idle_count(&self) -> usize {
        self.lock_idle().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// Unified pool abstraction that can be either multiplexed or traditional pool
pub enum Pool {
    /// Multiplexed connection
    Multiplexed(MultiplexedPool),
    /// Traditional connection pool
    Pool(ConnectionPool),
}

impl Pool {
    /// Create a new pool based on the configuration
    pub async fn new(config: &ConnectionConfig, endpoint: &Endpoint) -> RedisResult<Self> {
        match config.pool.strategy {
            PoolStrategy::Multiplexed => {
                Ok(Pool::Multiplexed(MultiplexedPool::new(config, endpoint).await?))
            }
            PoolStrategy::Pool => Ok(Pool::Pool(ConnectionPool::new(config, endpoint).await?)),
        }
    }

    /// Execute a command through the pool
    pub async fn execute_command(&self, request: Request) -> RedisResult<RespValue> {
        match self {
            Pool::Multiplexed(pool) => pool.execute_command(request).await,
            Pool::Pool(pool) => pool.execute_command(request).await,
        }
    }

    /// Execute a pipelined batch on a single connection
    pub async fn execute_pipeline(&self, requests: Vec<Request>) -> RedisResult<Vec<RespValue>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Pool::Multiplexed(pool) => pool.execute_pipeline(requests).await,
            Pool::Pool(pool) => pool.execute_pipeline(requests).await,
        }
    }
}
