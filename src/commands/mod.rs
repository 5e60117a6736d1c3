//! Command builders
//!
//! Each builder knows its name, its arguments, the keys it touches and how
//! to turn the reply into a typed value. Only the commands the seeding,
//! writing and aggregation flow needs are provided.

pub mod set;
pub mod sorted_set;

use crate::connection::Request;
use crate::core::{
    error::{RedisError, RedisResult},
    value::{from_reply, FromResp, RespValue},
};

pub use set::{SAddCommand, SCardCommand, SMembersCommand};
pub use sorted_set::{ScoreRange, ZAddCommand, ZCardCommand, ZCountCommand};

/// Trait for commands that can be executed
pub trait Command {
    /// The return type of the command
    type Output: FromResp;

    /// Get the command name
    fn command_name(&self) -> &str;

    /// Get the command arguments
    fn args(&self) -> Vec<RespValue>;

    /// Get the key(s) involved in this command
    fn keys(&self) -> Vec<&[u8]>;

    /// Parse the response into the output type
    fn parse_response(&self, response: RespValue) -> RedisResult<Self::Output> {
        from_reply(response)
    }

    /// Wire request for this command
    fn request(&self) -> Request {
        Request::new(self.command_name(), self.args())
    }
}

/// DEL command builder
#[derive(Debug, Clone)]
pub struct DelCommand {
    keys: Vec<String>,
}

impl DelCommand {
    /// Create a new DEL command
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Command for DelCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "DEL"
    }

    fn args(&self) -> Vec<RespValue> {
        self.keys.iter().map(|k| RespValue::from(k.as_str())).collect()
    }

    fn keys(&self) -> Vec<&[u8]> {
        self.keys.iter().map(String::as_bytes).collect()
    }
}

/// UNLINK command builder (non-blocking delete)
#[derive(Debug, Clone)]
pub struct UnlinkCommand {
    keys: Vec<String>,
}

impl UnlinkCommand {
    /// Create a new UNLINK command
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Command for UnlinkCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "UNLINK"
    }

    fn args(&self) -> Vec<RespValue> {
        self.keys.iter().map(|k| RespValue::from(k.as_str())).collect()
    }

    fn keys(&self) -> Vec<&[u8]> {
        self.keys.iter().map(String::as_bytes).collect()
    }
}

/// One page of a SCAN iteration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    /// Cursor for the next call; 0 once iteration is complete
    pub cursor: u64,
    /// Keys returned in this page (may be empty even when `cursor != 0`)
    pub keys: Vec<String>,
}

impl FromResp for ScanPage {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        let mut parts = Vec::<RespValue>::from_resp(value)?.into_iter();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(cursor), Some(keys), None) => {
                let cursor = String::from_resp(cursor)?;
                let cursor = cursor
                    .parse::<u64>()
                    .map_err(|e| RedisError::Type(format!("Invalid SCAN cursor {cursor:?}: {e}")))?;
                Ok(Self {
                    cursor,
                    keys: Vec::<String>::from_resp(keys)?,
                })
            }
            _ => Err(RedisError::Type("SCAN reply must have two elements".into())),
        }
    }
}

/// SCAN command builder
#[derive(Debug, Clone)]
pub struct ScanCommand {
    cursor: u64,
    pattern: Option<String>,
    count: Option<usize>,
}

impl ScanCommand {
    /// Create a SCAN starting at `cursor`
    pub fn new(cursor: u64) -> Self {
        Self {
            cursor,
            pattern: None,
            count: None,
        }
    }

    /// Only return keys matching a glob pattern (MATCH)
    pub fn matching(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Hint how much work to do per call (COUNT)
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

impl Command for ScanCommand {
    type Output = ScanPage;

    fn command_name(&self) -> &str {
        "SCAN"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = vec![RespValue::from(self.cursor)];
        if let Some(ref pattern) = self.pattern {
            args.push(RespValue::from("MATCH"));
            args.push(RespValue::from(pattern.as_str()));
        }
        if let Some(count) = self.count {
            args.push(RespValue::from("COUNT"));
            args.push(RespValue::from(count));
        }
        args
    }

    fn keys(&self) -> Vec<&[u8]> {
        Vec::new()
    }
}

/// DBSIZE command builder
#[derive(Debug, Clone, Default)]
pub struct DbSizeCommand;

impl Command for DbSizeCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "DBSIZE"
    }

    fn args(&self) -> Vec<RespValue> {
        Vec::new()
    }

    fn keys(&self) -> Vec<&[u8]> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_args() {
        let cmd = ScanCommand::new(42).matching("{T}*").count(500);
        assert_eq!(cmd.command_name(), "SCAN");
        assert_eq!(
            cmd.args(),
            vec![
                RespValue::from("42"),
                RespValue::from("MATCH"),
                RespValue::from("{T}*"),
                RespValue::from("COUNT"),
                RespValue::from("500"),
            ]
        );
        assert!(cmd.keys().is_empty());
    }

    #[test]
    fn test_scan_page_parsing() {
        let reply = RespValue::Array(vec![
            RespValue::from("0"),
            RespValue::Array(vec![RespValue::from("{T}:member:1")]),
        ]);
        let page = ScanCommand::new(9).parse_response(reply).unwrap();
        assert_eq!(page.cursor, 0);
        assert_eq!(page.keys, vec!["{T}:member:1".to_string()]);

        let malformed = RespValue::Array(vec![RespValue::from("0")]);
        assert!(ScanPage::from_resp(malformed).is_err());
    }

    #[test]
    fn test_unlink_keys() {
        let cmd = UnlinkCommand::new(vec!["a".into(), "b".into()]);
        assert_eq!(cmd.keys(), vec![b"a".as_slice(), b"b".as_slice()]);
        let request = cmd.request();
        assert_eq!(request.command, "UNLINK");
        assert_eq!(request.args.len(), 2);
    }

    #[test]
    fn test_del_error_reply() {
        let cmd = DelCommand::new(vec!["k".into()]);
        assert!(cmd
            .parse_response(RespValue::Error("ERR nope".into()))
            .is_err());
        assert_eq!(cmd.parse_response(RespValue::Integer(1)).unwrap(), 1);
    }
}
