//! RESP (`REdis` Serialization Protocol) values and typed reply conversion

use crate::core::error::{RedisError, RedisResult};
use bytes::Bytes;
use std::collections::HashSet;

/// RESP2 protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string or null array
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Short name of the variant, for error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk string",
            Self::Null => "null",
            Self::Array(_) => "array",
        }
    }

    fn text(self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            other => Err(mismatch("string", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &RespValue) -> RedisError {
    RedisError::Type(format!("expected {expected}, got {}", got.kind()))
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}

impl From<u64> for RespValue {
    fn from(i: u64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}

impl From<usize> for RespValue {
    fn from(i: usize) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}

/// Conversion from a decoded reply into a Rust type
///
/// Server error replies are turned into [`RedisError::Server`] before any
/// conversion is attempted, so implementations only see data replies.
pub trait FromResp: Sized {
    /// Convert a data reply
    fn from_resp(value: RespValue) -> RedisResult<Self>;
}

/// Convert a reply, surfacing server error replies as errors first
pub fn from_reply<T: FromResp>(value: RespValue) -> RedisResult<T> {
    match value {
        RespValue::Error(msg) => Err(RedisError::Server(msg)),
        other => T::from_resp(other),
    }
}

impl FromResp for RespValue {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        Ok(value)
    }
}

impl FromResp for i64 {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value {
            RespValue::Integer(i) => Ok(i),
            RespValue::BulkString(_) | RespValue::SimpleString(_) => {
                let s = value.text()?;
                s.parse::<i64>()
                    .map_err(|e| RedisError::Type(format!("Cannot parse integer {s:?}: {e}")))
            }
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl FromResp for u64 {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        let i = i64::from_resp(value)?;
        u64::try_from(i).map_err(|_| RedisError::Type(format!("Negative count: {i}")))
    }
}

impl FromResp for String {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.text()
    }
}

impl FromResp for Vec<RespValue> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value {
            RespValue::Array(items) => Ok(items),
            RespValue::Null => Ok(Vec::new()),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl FromResp for Vec<String> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        Vec::<RespValue>::from_resp(value)?
            .into_iter()
            .map(String::from_resp)
            .collect()
    }
}

impl FromResp for HashSet<String> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        Vec::<RespValue>::from_resp(value)?
            .into_iter()
            .map(String::from_resp)
            .collect()
    }
}
