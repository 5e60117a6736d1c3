//! Timestamped entries for the member sorted sets

use crate::core::error::RedisResult;
use crate::keyspace::KeySpace;
use crate::store::{Store, WriteBatch};
use serde::Serialize;
use rand::Rng;
use tracing::{info, warn};

/// Default spread of entry timestamps behind "now", in milliseconds
pub const DEFAULT_MAX_JITTER_MS: i64 = 30_000;

/// A sorted-set entry for timestamp `ts_ms`: the score is the timestamp and
/// the member is its decimal form
///
/// Two entries with the same timestamp are the same entry.
pub fn entry(ts_ms: i64) -> (f64, String) {
    (ts_ms as f64, ts_ms.to_string())
}

/// Outcome of [`EntryWriter::write_recent`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Member keys written to
    pub keys: u64,
    /// Entries that were new to their sorted set
    pub added: u64,
}

/// Appends recent timestamped entries to every member key
#[derive(Debug, Clone)]
pub struct EntryWriter {
    per_key: usize,
    max_jitter_ms: i64,
}

impl EntryWriter {
    /// Writer adding `per_key` entries to each member key
    pub fn new(per_key: usize) -> Self {
        Self {
            per_key,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
        }
    }

    /// Spread timestamps uniformly over `[now - max_jitter_ms, now]`
    #[must_use]
    pub fn with_max_jitter_ms(mut self, max_jitter_ms: i64) -> Self {
        self.max_jitter_ms = max_jitter_ms.max(0);
        self
    }

    /// `per_key` entries at `now_ms` minus a random jitter
    pub fn jittered_entries<R: Rng>(&self, now_ms: i64, rng: &mut R) -> Vec<(f64, String)> {
        (0..self.per_key)
            .map(|_| {
                let jitter = if self.max_jitter_ms > 0 {
                    rng.random_range(0..self.max_jitter_ms)
                } else {
                    0
                };
                entry(now_ms - jitter)
            })
            .collect()
    }

    /// Write jittered entries behind `now_ms` into every key listed in the
    /// member key set, in one batch
    ///
    /// Colliding timestamps collapse into one entry, so a key may end up
    /// with fewer than `per_key` new entries.
    pub async fn write_recent<S: Store + ?Sized>(
        &self,
        store: &S,
        keyspace: &KeySpace,
        now_ms: i64,
    ) -> RedisResult<WriteSummary> {
        let mut members: Vec<String> = store
            .smembers(keyspace.members_key())
            .await?
            .into_iter()
            .collect();
        members.sort();

        if members.is_empty() {
            warn!(
                "Member key set {} is empty, no entries written",
                keyspace.members_key()
            );
            return Ok(WriteSummary::default());
        }
        if self.per_key == 0 {
            return Ok(WriteSummary {
                keys: members.len() as u64,
                added: 0,
            });
        }

        let batch = {
            let mut rng = rand::rng();
            let mut batch = WriteBatch::new();
            for key in &members {
                batch.zadd(key.clone(), self.jittered_entries(now_ms, &mut rng));
            }
            batch
        };

        let added = store.apply(batch).await?.iter().sum::<i64>().max(0) as u64;
        info!(
            "Wrote {} new entries across {} member keys",
            added,
            members.len()
        );
        Ok(WriteSummary {
            keys: members.len() as u64,
            added,
        })
    }

    /// Record entries at exact timestamps into one key
    pub async fn record<S: Store + ?Sized>(
        &self,
        store: &S,
        key: &str,
        timestamps: &[i64],
    ) -> RedisResult<u64> {
        if timestamps.is_empty() {
            return Ok(0);
        }
        let mut batch = WriteBatch::new();
        batch.zadd(key, timestamps.iter().copied().map(entry).collect());
        Ok(store.apply(batch).await?.iter().sum::<i64>().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_entry_member_is_score_text() {
        assert_eq!(entry(1_700_000_000_123), (1_700_000_000_123.0, "1700000000123".to_string()));
    }

    #[test]
    fn test_jitter_stays_behind_now() {
        let writer = EntryWriter::new(200);
        let mut rng = StdRng::seed_from_u64(7);
        let now = 10_000_000;
        for (score, member) in writer.jittered_entries(now, &mut rng) {
            assert!(score <= now as f64);
            assert!(score > (now - DEFAULT_MAX_JITTER_MS) as f64);
            assert_eq!(member, (score as i64).to_string());
        }
    }

    #[test]
    fn test_zero_jitter() {
        let writer = EntryWriter::new(3).with_max_jitter_ms(0);
        let mut rng = StdRng::seed_from_u64(1);
        let entries = writer.jittered_entries(42, &mut rng);
        assert!(entries.iter().all(|(score, _)| *score == 42.0));
    }
}
