//! Error types for store operations

use std::io;
use thiserror::Error;

/// Result type for store operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Error type for everything the crate does against a store
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connect or operation timeout elapsed
    #[error("Operation timed out")]
    Timeout,

    /// Reply had an unexpected shape for the requested type
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The store lacks a capability the operation requires (e.g. scripting)
    #[error("Capability unsupported: {0}")]
    Unsupported(String),

    /// Keys that must share a hash slot do not
    #[error("Key {key} hashes to slot {slot}, expected slot {expected}")]
    CrossSlot {
        /// Offending key
        key: String,
        /// Slot of the offending key
        slot: u16,
        /// Slot of the routing tag
        expected: u16,
    },
}

impl RedisError {
    /// Classify a server error reply, mapping "no such command" replies for
    /// scripting commands to [`RedisError::Unsupported`]
    #[must_use]
    pub fn from_server_reply(command: &str, msg: String) -> Self {
        let lower = msg.to_ascii_lowercase();
        let scripting = matches!(command, "EVAL" | "EVALSHA" | "SCRIPT");
        if scripting
            && (lower.contains("unknown command")
                || lower.contains("command not supported")
                || lower.contains("scripting is disabled"))
        {
            return Self::Unsupported(format!("{command}: {msg}"));
        }
        Self::Server(msg)
    }

    /// Whether the reply is the `NOSCRIPT` error returned by EVALSHA for an
    /// uncached script
    #[must_use]
    pub fn is_noscript(&self) -> bool {
        matches!(self, Self::Server(msg) if msg.starts_with("NOSCRIPT"))
    }

    /// Whether the error means the server is unreachable or the link broke
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Auth(_)
        )
    }

    /// Whether a connection that produced this error may still hold unread
    /// replies and must not be reused
    #[must_use]
    pub const fn breaks_connection(&self) -> bool {
        self.is_connection() || matches!(self, Self::Protocol(_))
    }
}
