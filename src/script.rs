//! Lua scripting support for Redis
//!
//! Scripts are hashed with SHA1 on creation and executed with EVALSHA. When
//! the server answers `NOSCRIPT` the full source is sent once with EVAL,
//! which also caches it for the next call.
//!
//! ```no_run
//! use redis_aggz::{Client, ConnectionConfig, Script};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//! let script = Script::new("return redis.call('SCARD', KEYS[1])");
//! let size: i64 = script.execute(&client, vec!["{T}".to_string()], vec![]).await?;
//! println!("{size}");
//! # Ok(())
//! # }
//! ```

use crate::client::Client;
use crate::core::{error::RedisResult, value::FromResp};
use sha1::{Digest, Sha1};
use tracing::debug;

/// A Lua script that can be executed on Redis
#[derive(Debug, Clone)]
pub struct Script {
    /// The Lua script source code
    source: String,
    /// SHA1 hash of the script (for EVALSHA)
    sha: String,
}

impl Script {
    /// Create a new script from Lua source code
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let sha = calculate_sha1(&source);

        Self { source, sha }
    }

    /// Get the SHA1 hash of the script
    #[must_use]
    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// Get the source code of the script
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Execute the script on the given client
    ///
    /// Tries EVALSHA first and falls back to EVAL if the script is not
    /// cached on the server.
    ///
    /// # Errors
    ///
    /// [`crate::RedisError::Unsupported`] when the server has no scripting
    /// commands, or whatever error the script raised.
    pub async fn execute<T: FromResp>(
        &self,
        client: &Client,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> RedisResult<T> {
        match client.evalsha(&self.sha, keys.clone(), args.clone()).await {
            Err(e) if e.is_noscript() => {
                debug!("Script {} not cached, sending source", self.sha);
                client.eval(&self.source, keys, args).await
            }
            other => other,
        }
    }
}

/// Calculate SHA1 hash of a string
fn calculate_sha1(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Scripts used by the aggregation flow
pub mod patterns {
    use super::Script;

    /// Source of [`window_counts`]
    pub const WINDOW_COUNTS: &str = r"
local members = redis.call('SMEMBERS', KEYS[1])
if ARGV[3] == '1' and KEYS[2] then
    local kind = redis.call('TYPE', KEYS[2])
    if kind['ok'] == 'zset' then
        members[#members + 1] = KEYS[2]
    end
end
local out = {}
for _, key in ipairs(members) do
    out[#out + 1] = key
    out[#out + 1] = redis.call('ZCARD', key)
    out[#out + 1] = redis.call('ZCOUNT', key, ARGV[1], ARGV[2])
end
return out
";

    /// Total and windowed entry counts for every member of a set, in one
    /// atomic call
    ///
    /// # Arguments
    /// - KEYS\[1\]: the members key (a SET of sorted-set key names)
    /// - KEYS\[2\]: the routing key, optionally counted like a member
    /// - ARGV\[1\]: lowest score in the window (inclusive)
    /// - ARGV\[2\]: highest score in the window (inclusive)
    /// - ARGV\[3\]: `1` to count KEYS\[2\] when it holds a sorted set
    ///
    /// Returns a flat array `[key, total, windowed, key, total, windowed, ...]`
    /// in the order the server enumerates the set. A missing members key
    /// yields an empty array. A member holding a non-sorted-set value aborts
    /// the script with a WRONGTYPE error.
    pub fn window_counts() -> Script {
        Script::new(WINDOW_COUNTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_creation() {
        let script = Script::new("return 'hello'");
        assert_eq!(script.source(), "return 'hello'");
        assert_eq!(script.sha().len(), 40);
    }

    #[test]
    fn test_sha1_calculation() {
        let sha = calculate_sha1("hello world");
        assert_eq!(sha, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_window_counts_is_stable() {
        let a = patterns::window_counts();
        let b = patterns::window_counts();
        assert_eq!(a.sha(), b.sha());
        assert!(a.source().contains("ZCOUNT"));
        assert_ne!(a.sha(), Script::new("return 1").sha());
    }
}
