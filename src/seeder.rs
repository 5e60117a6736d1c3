//! Creation and clean-up of the member key set

use crate::commands::ScanPage;
use crate::core::error::RedisResult;
use crate::keyspace::KeySpace;
use crate::store::{Store, WriteBatch};
use serde::Serialize;
use tracing::{debug, info};

/// Default COUNT hint for each SCAN step during reset
pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Default number of member names per SADD in a populate batch
pub const DEFAULT_SADD_CHUNK: usize = 500;

/// Outcome of [`KeySetSeeder::seed`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedOutcome {
    /// Keys removed by the reset step (0 when no reset ran)
    pub removed: u64,
    /// Names newly added to the member key set
    pub added: u64,
}

/// Fills and clears the member key set of one [`KeySpace`]
#[derive(Debug, Clone)]
pub struct KeySetSeeder {
    keyspace: KeySpace,
    scan_count: usize,
    sadd_chunk: usize,
}

impl KeySetSeeder {
    /// Seeder for `keyspace` with default batch sizes
    pub fn new(keyspace: KeySpace) -> Self {
        Self {
            keyspace,
            scan_count: DEFAULT_SCAN_COUNT,
            sadd_chunk: DEFAULT_SADD_CHUNK,
        }
    }

    /// COUNT hint passed to every SCAN step
    #[must_use]
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }

    /// Largest number of names sent in one SADD
    #[must_use]
    pub fn with_sadd_chunk(mut self, chunk: usize) -> Self {
        self.sadd_chunk = chunk.max(1);
        self
    }

    /// Delete every key starting with the routing prefix, then the members key
    ///
    /// Walks a SCAN cursor until it returns to 0 and unlinks each page. This
    /// is not atomic: a key created behind the cursor while the walk is in
    /// progress survives. Returns the number of keys removed.
    pub async fn reset<S: Store + ?Sized>(&self, store: &S) -> RedisResult<u64> {
        let pattern = self.keyspace.scan_pattern();
        let mut cursor = 0;
        let mut removed = 0;
        let mut steps = 0;

        loop {
            let ScanPage { cursor: next, keys } =
                store.scan(cursor, &pattern, self.scan_count).await?;
            steps += 1;
            if !keys.is_empty() {
                let mut batch = WriteBatch::new();
                batch.unlink(keys);
                removed += store.apply(batch).await?.iter().sum::<i64>().max(0) as u64;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut batch = WriteBatch::new();
        batch.del(vec![self.keyspace.members_key().to_string()]);
        removed += store.apply(batch).await?.iter().sum::<i64>().max(0) as u64;

        debug!("Reset scanned {} pages for {}", steps, pattern);
        info!(
            "Removed {} keys from routing tag {}",
            removed,
            self.keyspace.routing_tag()
        );
        Ok(removed)
    }

    /// Add the first `count` derived member names to the member key set
    ///
    /// Names are deterministic, so repeating a call adds nothing. All SADDs
    /// go out as one batch. Returns how many names were new.
    pub async fn populate<S: Store + ?Sized>(&self, store: &S, count: usize) -> RedisResult<u64> {
        if count == 0 {
            return Ok(0);
        }

        let names: Vec<String> = (0..count).map(|i| self.keyspace.member_name(i)).collect();
        let mut batch = WriteBatch::new();
        for chunk in names.chunks(self.sadd_chunk) {
            batch.sadd(self.keyspace.members_key(), chunk.to_vec());
        }

        let added = store.apply(batch).await?.iter().sum::<i64>().max(0) as u64;
        info!(
            "Member key set {} holds {} requested names ({} new)",
            self.keyspace.members_key(),
            count,
            added
        );
        Ok(added)
    }

    /// Optionally reset, then populate
    pub async fn seed<S: Store + ?Sized>(
        &self,
        store: &S,
        count: usize,
        reset: bool,
    ) -> RedisResult<SeedOutcome> {
        let removed = if reset { self.reset(store).await? } else { 0 };
        let added = self.populate(store, count).await?;
        Ok(SeedOutcome { removed, added })
    }
}
