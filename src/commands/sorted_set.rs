//! Command builders for Redis Sorted Set operations

use crate::commands::Command;
use crate::core::value::RespValue;
use serde::Serialize;

/// Inclusive score interval `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreRange {
    /// Lowest score counted
    pub min: f64,
    /// Highest score counted
    pub max: f64,
}

impl ScoreRange {
    /// Interval including both ends
    #[must_use]
    pub const fn inclusive(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether no score can fall inside the interval
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// Represents the `ZADD` command.
#[derive(Debug, Clone)]
pub struct ZAddCommand {
    key: String,
    entries: Vec<(f64, String)>,
}

impl ZAddCommand {
    /// Create a new `ZADD` command from `(score, member)` pairs.
    #[must_use]
    pub fn new(key: impl Into<String>, entries: Vec<(f64, String)>) -> Self {
        Self {
            key: key.into(),
            entries,
        }
    }
}

impl Command for ZAddCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "ZADD"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = Vec::with_capacity(1 + 2 * self.entries.len());
        args.push(RespValue::from(self.key.as_str()));
        for (score, member) in &self.entries {
            args.push(RespValue::from(score.to_string()));
            args.push(RespValue::from(member.as_str()));
        }
        args
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// Represents the `ZCARD` command.
#[derive(Debug, Clone)]
pub struct ZCardCommand {
    key: String,
}

impl ZCardCommand {
    /// Create a new `ZCARD` command.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for ZCardCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "ZCARD"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// Represents the `ZCOUNT` command.
#[derive(Debug, Clone)]
pub struct ZCountCommand {
    key: String,
    range: ScoreRange,
}

impl ZCountCommand {
    /// Create a new `ZCOUNT` command over an inclusive range.
    #[must_use]
    pub fn new(key: impl Into<String>, range: ScoreRange) -> Self {
        Self {
            key: key.into(),
            range,
        }
    }
}

impl Command for ZCountCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "ZCOUNT"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(self.range.min.to_string()),
            RespValue::from(self.range.max.to_string()),
        ]
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zadd_renders_whole_millis_without_exponent() {
        let cmd = ZAddCommand::new(
            "{T}:member:0",
            vec![(1_700_000_000_000.0, "1700000000000".to_string())],
        );
        assert_eq!(
            cmd.args(),
            vec![
                RespValue::from("{T}:member:0"),
                RespValue::from("1700000000000"),
                RespValue::from("1700000000000"),
            ]
        );
    }

    #[test]
    fn test_zcount_args() {
        let cmd = ZCountCommand::new("k", ScoreRange::inclusive(400.0, 1000.0));
        assert_eq!(cmd.command_name(), "ZCOUNT");
        assert_eq!(
            cmd.args(),
            vec![RespValue::from("k"), RespValue::from("400"), RespValue::from("1000")]
        );
    }

    #[test]
    fn test_score_range() {
        let range = ScoreRange::inclusive(10.0, 20.0);
        assert!(!range.is_empty());
        assert!(ScoreRange::inclusive(5.0, 4.0).is_empty());
    }
}
