//! Connection management
//!
//! This module handles a single TCP connection to a Redis-compatible server:
//! dialing, authentication, database selection and request/response
//! exchange, including pipelined batches written and read on the same socket.

use crate::core::{
    config::{ConnectionConfig, Endpoint},
    error::{RedisError, RedisResult},
    value::RespValue,
};
use crate::protocol::{RespDecoder, RespEncoder};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// One queued request inside a pipelined batch
#[derive(Debug, Clone)]
pub struct Request {
    /// Command name
    pub command: String,
    /// Command arguments
    pub args: Vec<RespValue>,
}

impl Request {
    /// Create a request
    pub fn new(command: impl Into<String>, args: Vec<RespValue>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// A connection to a Redis server
pub struct RedisConnection {
    stream: TcpStream,
    read_buffer: BytesMut,
    operation_timeout: Duration,
    address: String,
}

impl RedisConnection {
    /// Connect, authenticate and select the configured database
    pub async fn connect(endpoint: &Endpoint, config: &ConnectionConfig) -> RedisResult<Self> {
        let addr = endpoint.address();
        debug!("Connecting to Redis at {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(|e| RedisError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        if let Some(keepalive_duration) = config.tcp_keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
            socket2::SockRef::from(&stream)
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| {
                    RedisError::Connection(format!("Failed to set TCP keepalive: {}", e))
                })?;
        }

        let mut conn = Self {
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            operation_timeout: config.operation_timeout,
            address: addr,
        };

        if let Some(ref password) = endpoint.password {
            conn.authenticate(endpoint.username.as_deref(), password)
                .await?;
        }

        if endpoint.database != 0 {
            conn.select_database(endpoint.database).await?;
        }

        Ok(conn)
    }

    /// Address this connection was dialed to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Authenticate with the Redis server, as an ACL user when one is given
    async fn authenticate(&mut self, username: Option<&str>, password: &str) -> RedisResult<()> {
        match username {
            Some(user) => info!("Authenticating as user {}", user),
            None => debug!("Authenticating with password"),
        }

        let mut args = Vec::with_capacity(2);
        if let Some(user) = username {
            args.push(RespValue::from(user));
        }
        args.push(RespValue::from(password));

        match self.round_trip("AUTH", &args).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(RedisError::Auth(e)),
            other => Err(RedisError::Auth(format!(
                "Unexpected authentication response: {:?}",
                other
            ))),
        }
    }

    /// Select a database
    async fn select_database(&mut self, db: u8) -> RedisResult<()> {
        match self.execute_command("SELECT", &[RespValue::from(db as i64)]).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            other => Err(RedisError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Send PING and expect PONG
    pub async fn ping(&mut self) -> RedisResult<()> {
        match self.execute_command("PING", &[]).await? {
            RespValue::SimpleString(ref s) if s == "PONG" => Ok(()),
            other => Err(RedisError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Execute a command and return the response
    ///
    /// An error reply from the server is returned as `Err`.
    pub async fn execute_command(
        &mut self,
        command: &str,
        args: &[RespValue],
    ) -> RedisResult<RespValue> {
        match self.round_trip(command, args).await? {
            RespValue::Error(msg) => Err(RedisError::from_server_reply(command, msg)),
            response => Ok(response),
        }
    }

    /// Write every request in one burst, then read one reply per request
    ///
    /// Replies come back in request order. Per-command error replies stay in
    /// place as [`RespValue::Error`]; only transport failures abort the batch,
    /// in which case requests already written may have been applied.
    pub async fn execute_pipeline(&mut self, requests: &[Request]) -> RedisResult<Vec<RespValue>> {
        let mut out = BytesMut::new();
        for request in requests {
            RespEncoder::encode_command(&request.command, &request.args, &mut out)?;
        }
        self.write_frame(&out).await?;

        let mut replies = Vec::with_capacity(requests.len());
        for _ in requests {
            let reply = timeout(self.operation_timeout, self.read_response())
                .await
                .map_err(|_| RedisError::Timeout)??;
            replies.push(reply);
        }
        Ok(replies)
    }

    async fn round_trip(&mut self, command: &str, args: &[RespValue]) -> RedisResult<RespValue> {
        let encoded = RespEncoder::command_frame(command, args)?;
        self.write_frame(&encoded).await?;

        timeout(self.operation_timeout, self.read_response())
            .await
            .map_err(|_| RedisError::Timeout)?
    }

    async fn write_frame(&mut self, frame: &[u8]) -> RedisResult<()> {
        timeout(self.operation_timeout, self.stream.write_all(frame))
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(RedisError::Io)
    }

    /// Read a complete RESP response from the connection
    async fn read_response(&mut self) -> RedisResult<RespValue> {
        loop {
            if let Some((value, used)) = RespDecoder::decode(&self.read_buffer)? {
                self.read_buffer.advance(used);
                return Ok(value);
            }

            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(RedisError::Connection(
                    "Connection closed by server".to_string(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_server(reply: &'static [u8], expect_len: usize) -> (Endpoint, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0_u8; expect_len];
            socket.read_exact(&mut received).await.unwrap();
            socket.write_all(reply).await.unwrap();
            received
        });
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            database: 0,
        };
        (endpoint, handle)
    }

    #[tokio::test]
    async fn test_pipeline_single_write_ordered_replies() {
        let request = b"*2\r\n$5\r\nSCARD\r\n$1\r\na\r\n*2\r\n$5\r\nZCARD\r\n$1\r\nb\r\n";
        let (endpoint, server) = fake_server(b":3\r\n-WRONGTYPE nope\r\n", request.len()).await;
        let config = ConnectionConfig::default();
        let mut conn = RedisConnection::connect(&endpoint, &config).await.unwrap();

        let replies = conn
            .execute_pipeline(&[
                Request::new("SCARD", vec![RespValue::from("a")]),
                Request::new("ZCARD", vec![RespValue::from("b")]),
            ])
            .await
            .unwrap();

        assert_eq!(replies[0], RespValue::Integer(3));
        assert!(matches!(replies[1], RespValue::Error(ref m) if m == "WRONGTYPE nope"));
        assert_eq!(server.await.unwrap(), request.to_vec());
    }

    #[tokio::test]
    async fn test_error_reply_becomes_err() {
        let request = b"*1\r\n$4\r\nPING\r\n";
        let (endpoint, _server) = fake_server(b"-ERR boom\r\n", request.len()).await;
        let mut conn = RedisConnection::connect(&endpoint, &ConnectionConfig::default())
            .await
            .unwrap();
        let err = conn.ping().await.unwrap_err();
        assert!(matches!(err, RedisError::Server(ref m) if m == "ERR boom"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            database: 0,
        };
        let result = RedisConnection::connect(&endpoint, &ConnectionConfig::default()).await;
        assert!(matches!(result, Err(RedisError::Connection(_))));
    }
}
