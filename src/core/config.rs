//! Configuration types for store connections

use crate::core::error::{RedisError, RedisResult};
use std::time::Duration;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Strategy for connection pooling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStrategy {
    /// Single multiplexed connection shared across tasks
    Multiplexed,
    /// Connection pool with multiple connections
    Pool,
}

/// Configuration for connection pooling
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pooling strategy to use
    pub strategy: PoolStrategy,
    /// Maximum number of connections in pool (only for Pool strategy)
    pub max_size: usize,
    /// Minimum number of connections opened up front (only for Pool strategy)
    pub min_idle: usize,
    /// Timeout for acquiring a connection from pool
    pub connection_timeout: Duration,
    /// Send PING on every freshly created connection
    pub test_on_create: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: PoolStrategy::Pool,
            max_size: 10,
            min_idle: 1,
            connection_timeout: Duration::from_secs(60),
            test_on_create: true,
        }
    }
}

/// Configuration for a connection to one Redis-compatible server
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection string, `redis://[user[:password]@]host[:port][/db]`
    pub connection_string: String,

    /// ACL user name; overrides the user part of the connection string
    pub username: Option<String>,

    /// Password; overrides the password part of the connection string
    pub password: Option<String>,

    /// Database number; overrides the path part of the connection string
    pub database: Option<u8>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Read/write operation timeout
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Pool configuration
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: format!("redis://localhost:{DEFAULT_PORT}"),
            username: None,
            password: None,
            database: None,
            connect_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(120),
            tcp_keepalive: Some(Duration::from_secs(60)),
            pool: PoolConfig::default(),
        }
    }
}

/// Parsed server address and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// ACL user, if any
    pub username: Option<String>,
    /// Password, if any
    pub password: Option<String>,
    /// Database to SELECT after connecting
    pub database: u8,
}

impl Endpoint {
    /// `host:port` form used for dialing and logging
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from a host and port
    pub fn from_host_port(host: impl AsRef<str>, port: u16) -> Self {
        Self::new(format!("redis://{}:{}", host.as_ref(), port))
    }

    /// Set the ACL user name
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the pool configuration
    #[must_use]
    pub const fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse the connection string into an [`Endpoint`], applying the
    /// explicit credential and database overrides
    pub fn endpoint(&self) -> RedisResult<Endpoint> {
        let conn_str = self.connection_string.trim();
        if conn_str.starts_with("rediss://") {
            return Err(RedisError::Config("TLS connections are not supported".into()));
        }
        let rest = conn_str.strip_prefix("redis://").unwrap_or(conn_str);

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, Some(path)),
            None => (rest, None),
        };

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };

        let (mut username, mut password) = (None, None);
        if let Some(info) = userinfo {
            match info.split_once(':') {
                Some((user, pass)) => {
                    username = (!user.is_empty()).then(|| user.to_string());
                    password = (!pass.is_empty()).then(|| pass.to_string());
                }
                None if !info.is_empty() => username = Some(info.to_string()),
                None => {}
            }
        }

        let (host, port) = parse_host_port(hostport)?;

        let mut database = 0;
        if let Some(db) = path.filter(|p| !p.is_empty()) {
            database = db
                .parse::<u8>()
                .map_err(|_| RedisError::Config(format!("Invalid database number: {db}")))?;
        }

        Ok(Endpoint {
            host,
            port,
            username: self.username.clone().or(username),
            password: self.password.clone().or(password),
            database: self.database.unwrap_or(database),
        })
    }
}

fn parse_host_port(hostport: &str) -> RedisResult<(String, u16)> {
    if hostport.is_empty() {
        return Err(RedisError::Config("No endpoint specified".to_string()));
    }

    // [v6::addr]:port
    if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| RedisError::Config(format!("Invalid address: {hostport}")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match hostport.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((hostport.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(port: &str) -> RedisResult<u16> {
    port.parse::<u16>()
        .map_err(|_| RedisError::Config(format!("Invalid port: {port}")))
}
