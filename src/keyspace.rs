//! Key naming and hash-slot colocation
//!
//! Every key this crate creates embeds the routing tag as a cluster hash tag
//! (`{tag}`), so the members key and all member keys land in one hash slot
//! and a single script may touch all of them.

use crate::core::error::{RedisError, RedisResult};
use crc16::*;

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Infix between the hash tag and the member index in a member key name
pub const MEMBER_INFIX: &str = "email";

/// Suffix after the member index in a member key name
pub const MEMBER_SUFFIX: &str = "@email.com";

/// Calculate the hash slot for a given key
///
/// Uses CRC16 XMODEM modulo 16384, hashing only the hash tag when the key
/// carries one.
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % CLUSTER_SLOTS
}

/// Extract the hash tag from a key
///
/// The tag is whatever sits between the first `{` and the next `}`, provided
/// it is non-empty. Otherwise the whole key is hashed.
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// Escape glob metacharacters so `text` matches itself literally in a
/// SCAN MATCH pattern
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Names of the keys derived from one routing tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    routing_tag: String,
    members_key: String,
}

impl KeySpace {
    /// Key space for `routing_tag`, with the members key named `{routing_tag}`
    pub fn new(routing_tag: impl Into<String>) -> Self {
        let routing_tag = routing_tag.into();
        let members_key = format!("{{{routing_tag}}}");
        Self {
            routing_tag,
            members_key,
        }
    }

    /// Key space whose routing tag is taken from the hash tag of
    /// `members_key`, or from the whole key when it has none
    pub fn from_members_key(members_key: impl Into<String>) -> Self {
        let members_key = members_key.into();
        let tag = String::from_utf8_lossy(extract_hash_tag(members_key.as_bytes())).into_owned();
        Self {
            routing_tag: tag,
            members_key,
        }
    }

    /// Store the member key set under a different name
    #[must_use]
    pub fn with_members_key(mut self, members_key: impl Into<String>) -> Self {
        self.members_key = members_key.into();
        self
    }

    /// The routing tag, without braces
    pub fn routing_tag(&self) -> &str {
        &self.routing_tag
    }

    /// Name of the SET holding the member key names
    pub fn members_key(&self) -> &str {
        &self.members_key
    }

    /// `{tag}`: the prefix every derived key starts with, also usable as a
    /// key of its own
    pub fn routing_key(&self) -> String {
        format!("{{{}}}", self.routing_tag)
    }

    /// Name of the `index`-th member key
    pub fn member_name(&self, index: usize) -> String {
        format!(
            "{}{}{}{}",
            self.routing_key(),
            MEMBER_INFIX,
            index,
            MEMBER_SUFFIX
        )
    }

    /// SCAN MATCH pattern selecting every key that starts with the routing
    /// prefix
    pub fn scan_pattern(&self) -> String {
        format!("{}*", escape_glob(&self.routing_key()))
    }

    /// Hash slot shared by every key of this key space
    pub fn slot(&self) -> u16 {
        calculate_slot(self.routing_tag.as_bytes())
    }

    /// Check that the tag is usable and that the members key shares the
    /// tag's slot
    pub fn validate(&self) -> RedisResult<()> {
        if self.routing_tag.is_empty() {
            return Err(RedisError::Config("Routing tag must not be empty".into()));
        }
        if self.routing_tag.contains(['{', '}']) {
            return Err(RedisError::Config(format!(
                "Routing tag {:?} must not contain braces",
                self.routing_tag
            )));
        }
        self.check_slot(&self.members_key)
    }

    /// Fail with [`RedisError::CrossSlot`] if `key` hashes elsewhere
    pub fn check_slot(&self, key: &str) -> RedisResult<()> {
        let expected = self.slot();
        let slot = calculate_slot(key.as_bytes());
        if slot == expected {
            Ok(())
        } else {
            Err(RedisError::CrossSlot {
                key: key.to_string(),
                slot,
                expected,
            })
        }
    }
}
