//! Total and trailing-window entry counts across the member keys
//!
//! The window for reference time `ref` (ms) and look-back `w` (s) is the
//! inclusive score range `[ref - w * 1000, ref]`. A negative look-back gives
//! an empty range and a zero look-back counts only entries scored exactly at
//! `ref`.

use crate::commands::ScoreRange;
use crate::core::error::{RedisError, RedisResult};
use crate::keyspace::KeySpace;
use crate::report::{AggregateReport, KeyCount};
use crate::store::{Store, WindowQuery};
use tracing::{debug, warn};

/// How the counts are gathered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMode {
    /// One server-side script; fails with `Unsupported` without scripting
    #[default]
    Atomic,
    /// The script, or per-key reads when the store has no scripting
    AtomicWithFallback,
    /// Per-key reads only; not a consistent snapshot
    PerKey,
}

/// Inclusive score range covering `lookback_secs` up to `reference_ms`
pub fn window_range(reference_ms: i64, lookback_secs: i64) -> ScoreRange {
    let lower = reference_ms.saturating_sub(lookback_secs.saturating_mul(1000));
    ScoreRange::inclusive(lower as f64, reference_ms as f64)
}

/// Computes [`AggregateReport`]s for a key space
#[derive(Debug, Clone, Default)]
pub struct WindowAggregator {
    mode: AggregationMode,
    include_routing_key: bool,
}

impl WindowAggregator {
    /// Atomic aggregator that only counts members of the member key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose how counts are gathered
    #[must_use]
    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Also count the `{tag}` key itself when it holds a sorted set
    #[must_use]
    pub fn with_routing_key(mut self, include: bool) -> Self {
        self.include_routing_key = include;
        self
    }

    /// Count every member key of `keyspace` at `reference_ms`
    ///
    /// A missing or empty member key set yields an empty report.
    pub async fn aggregate<S: Store + ?Sized>(
        &self,
        store: &S,
        keyspace: &KeySpace,
        reference_ms: i64,
        lookback_secs: i64,
    ) -> RedisResult<AggregateReport> {
        let query = WindowQuery {
            members_key: keyspace.members_key().to_string(),
            routing_key: self.include_routing_key.then(|| keyspace.routing_key()),
            range: window_range(reference_ms, lookback_secs),
        };
        debug!(
            "Aggregating {} over [{}, {}]",
            query.members_key, query.range.min, query.range.max
        );

        let rows = match self.mode {
            AggregationMode::Atomic => store.aggregate_window(&query).await?,
            AggregationMode::AtomicWithFallback => match store.aggregate_window(&query).await {
                Err(RedisError::Unsupported(reason)) => {
                    warn!("Atomic aggregation unavailable ({}), reading keys one by one", reason);
                    per_key_counts(store, &query).await?
                }
                other => other?,
            },
            AggregationMode::PerKey => {
                warn!("Per-key aggregation does not read a consistent snapshot");
                per_key_counts(store, &query).await?
            }
        };

        Ok(AggregateReport {
            rows,
            reference_ms,
            lookback_secs,
            window: query.range,
        })
    }
}

/// Same result as the script, but each key is read separately
async fn per_key_counts<S: Store + ?Sized>(
    store: &S,
    query: &WindowQuery,
) -> RedisResult<Vec<KeyCount>> {
    let mut keys: Vec<String> = store
        .smembers(&query.members_key)
        .await?
        .into_iter()
        .collect();
    keys.sort();

    if let Some(ref routing_key) = query.routing_key {
        // Only a sorted set is counted; anything else reports WRONGTYPE or 0
        if matches!(store.zcard(routing_key).await, Ok(n) if n > 0) {
            keys.push(routing_key.clone());
        }
    }

    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let total = store.zcard(&key).await?;
        let windowed = store.zcount(&key, query.range).await?;
        rows.push(KeyCount {
            key,
            total,
            windowed,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_range() {
        let range = window_range(1_000_000, 600);
        assert_eq!(range, ScoreRange::inclusive(400_000.0, 1_000_000.0));

        let zero = window_range(5_000, 0);
        assert_eq!(zero.min, zero.max);
        assert!(!zero.is_empty());

        assert!(window_range(5_000, -1).is_empty());
    }

    #[test]
    fn test_window_range_saturates() {
        let range = window_range(i64::MIN + 10, i64::MAX);
        assert_eq!(range.min, i64::MIN as f64);
    }
}
