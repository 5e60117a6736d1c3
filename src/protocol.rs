//! RESP2 protocol implementation
//!
//! Commands go out as arrays of bulk strings; replies are decoded
//! incrementally from a read buffer, returning `None` until a complete value
//! is available.

use crate::core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Upper bound on array slots reserved before the elements have arrived
const MAX_PREALLOC: usize = 1024;

/// Largest bulk string a server sends (`proto-max-bulk-len` default)
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Encodes commands into RESP2 request frames
pub struct RespEncoder;

impl RespEncoder {
    /// Append one command frame to `buf`
    ///
    /// Every argument is sent as a bulk string; integers are rendered in
    /// decimal, as the server expects for numeric arguments.
    pub fn encode_command(command: &str, args: &[RespValue], buf: &mut BytesMut) -> RedisResult<()> {
        Self::put_header(buf, b'*', 1 + args.len());
        Self::put_bulk(buf, command.as_bytes());

        for arg in args {
            match arg {
                RespValue::BulkString(data) => Self::put_bulk(buf, data),
                RespValue::SimpleString(s) => Self::put_bulk(buf, s.as_bytes()),
                RespValue::Integer(i) => Self::put_bulk(buf, i.to_string().as_bytes()),
                other => {
                    return Err(RedisError::Protocol(format!(
                        "Cannot send {} as a command argument",
                        other.kind()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Encode a single command into a fresh frame
    pub fn command_frame(command: &str, args: &[RespValue]) -> RedisResult<Bytes> {
        let mut buf = BytesMut::with_capacity(64);
        Self::encode_command(command, args, &mut buf)?;
        Ok(buf.freeze())
    }

    fn put_header(buf: &mut BytesMut, marker: u8, len: usize) {
        buf.put_u8(marker);
        buf.put_slice(len.to_string().as_bytes());
        buf.put_slice(CRLF);
    }

    fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
        Self::put_header(buf, b'$', data.len());
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// Decodes RESP2 replies
pub struct RespDecoder;

impl RespDecoder {
    /// Try to decode one reply from the front of `buf`
    ///
    /// Returns the value and the number of bytes it occupied, or `None` if
    /// the buffer does not yet hold a complete reply.
    pub fn decode(buf: &[u8]) -> RedisResult<Option<(RespValue, usize)>> {
        Self::decode_at(buf, 0)
    }

    fn decode_at(buf: &[u8], pos: usize) -> RedisResult<Option<(RespValue, usize)>> {
        let Some(&marker) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = Self::line(buf, pos + 1) else {
            return Ok(None);
        };

        match marker {
            b'+' => Ok(Some((RespValue::SimpleString(Self::utf8(line)?), next))),
            b'-' => Ok(Some((RespValue::Error(Self::utf8(line)?), next))),
            b':' => Ok(Some((RespValue::Integer(Self::number(line)?), next))),
            b'$' => {
                let len = Self::number(line)?;
                if len < 0 {
                    return Ok(Some((RespValue::Null, next)));
                }
                let end = Self::offset(next, len)?;
                if buf.len() < end.saturating_add(2) {
                    return Ok(None);
                }
                if &buf[end..end + 2] != CRLF {
                    return Err(RedisError::Protocol(
                        "Bulk string not terminated by CRLF".to_string(),
                    ));
                }
                let data = Bytes::copy_from_slice(&buf[next..end]);
                Ok(Some((RespValue::BulkString(data), end + 2)))
            }
            b'*' => {
                let len = Self::number(line)?;
                if len < 0 {
                    return Ok(Some((RespValue::Null, next)));
                }
                let count = Self::length(len)?;
                let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
                let mut cursor = next;
                for _ in 0..len {
                    match Self::decode_at(buf, cursor)? {
                        Some((item, after)) => {
                            items.push(item);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(items), cursor)))
            }
            other => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: {:?}",
                other as char
            ))),
        }
    }

    /// Line starting at `start`, without its CRLF, plus the offset after it
    fn line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(start..)?;
        let offset = rest.windows(2).position(|w| w == CRLF)?;
        Some((&rest[..offset], start + offset + 2))
    }

    fn length(len: i64) -> RedisResult<usize> {
        usize::try_from(len).map_err(|_| RedisError::Protocol(format!("Invalid length: {len}")))
    }

    /// Offset `len` bytes past `start`, rejecting oversized bulk lengths
    fn offset(start: usize, len: i64) -> RedisResult<usize> {
        let len = Self::length(len)?;
        if len > MAX_BULK_LEN {
            return Err(RedisError::Protocol(format!("Bulk length {len} out of range")));
        }
        start
            .checked_add(len)
            .ok_or_else(|| RedisError::Protocol(format!("Bulk length {len} out of range")))
    }

    fn utf8(line: &[u8]) -> RedisResult<String> {
        String::from_utf8(line.to_vec())
            .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}")))
    }

    fn number(line: &[u8]) -> RedisResult<i64> {
        let text = Self::utf8(line)?;
        text.parse::<i64>()
            .map_err(|e| RedisError::Protocol(format!("Invalid integer {text:?}: {e}")))
    }
}
