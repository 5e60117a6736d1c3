//! Set commands for Redis
//!
//! The member key set lives in a plain Redis SET, so uniqueness of member
//! names is enforced by the server.

use super::Command;
use crate::core::value::RespValue;
use std::collections::HashSet;

/// SADD command - Add one or more members to a set
#[derive(Debug, Clone)]
pub struct SAddCommand {
    key: String,
    members: Vec<String>,
}

impl SAddCommand {
    /// Create a new SADD command
    pub fn new(key: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            key: key.into(),
            members,
        }
    }
}

impl Command for SAddCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "SADD"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = Vec::with_capacity(1 + self.members.len());
        args.push(RespValue::from(self.key.as_str()));
        args.extend(self.members.iter().map(|m| RespValue::from(m.as_str())));
        args
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// SMEMBERS command - Get all members in a set
#[derive(Debug, Clone)]
pub struct SMembersCommand {
    key: String,
}

impl SMembersCommand {
    /// Create a new SMEMBERS command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for SMembersCommand {
    type Output = HashSet<String>;

    fn command_name(&self) -> &str {
        "SMEMBERS"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// SCARD command - Get the number of members in a set
#[derive(Debug, Clone)]
pub struct SCardCommand {
    key: String,
}

impl SCardCommand {
    /// Create a new SCARD command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for SCardCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "SCARD"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sadd_args() {
        let cmd = SAddCommand::new("{T}", vec!["{T}:member:0".into(), "{T}:member:1".into()]);
        assert_eq!(cmd.command_name(), "SADD");
        assert_eq!(
            cmd.args(),
            vec![
                RespValue::from("{T}"),
                RespValue::from("{T}:member:0"),
                RespValue::from("{T}:member:1"),
            ]
        );
    }

    #[test]
    fn test_smembers_parse() {
        let cmd = SMembersCommand::new("{T}");
        let reply = RespValue::Array(vec![RespValue::from("x"), RespValue::from("y")]);
        let members = cmd.parse_response(reply).unwrap();
        assert_eq!(members.len(), 2);

        // A missing key is an empty set, not an error
        let empty = cmd.parse_response(RespValue::Array(vec![])).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_smembers_wrong_type() {
        let cmd = SMembersCommand::new("{T}");
        let err = cmd.parse_response(RespValue::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
        ));
        assert!(err.is_err());
    }
}
