//! One complete seed, write and aggregate pass

use crate::aggregator::{AggregationMode, WindowAggregator};
use crate::core::error::RedisResult;
use crate::keyspace::KeySpace;
use crate::report::AggregateReport;
use crate::seeder::{KeySetSeeder, SeedOutcome, DEFAULT_SCAN_COUNT};
use crate::store::Store;
use crate::writer::{EntryWriter, WriteSummary, DEFAULT_MAX_JITTER_MS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Routing tag used when none is configured
pub const DEFAULT_ROUTING_TAG: &str = "whoIsHungry?";

/// Settings for [`run`]
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Names of the members key and member keys
    pub keyspace: KeySpace,
    /// Member names to ensure in the member key set
    pub key_quantity: usize,
    /// Entries written to each member key
    pub entry_count: usize,
    /// Window length behind the reference time
    pub lookback_secs: i64,
    /// Clear every key under the routing prefix before populating
    pub reset_members: bool,
    /// Skip seeding and writing, only aggregate
    pub read_only: bool,
    /// How the counts are gathered
    pub mode: AggregationMode,
    /// Count the `{tag}` key itself when it holds a sorted set
    pub include_routing_key: bool,
    /// COUNT hint for SCAN during reset
    pub scan_count: usize,
    /// Spread of written timestamps behind now
    pub max_jitter_ms: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keyspace: KeySpace::new(DEFAULT_ROUTING_TAG),
            key_quantity: 25,
            entry_count: 25,
            lookback_secs: 3,
            reset_members: false,
            read_only: false,
            mode: AggregationMode::Atomic,
            include_routing_key: false,
            scan_count: DEFAULT_SCAN_COUNT,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
        }
    }
}

/// What a [`run`] did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Keys in the database at start-up
    pub db_size: i64,
    /// Seeding result; `None` for read-only runs
    pub seed: Option<SeedOutcome>,
    /// Entry writing result; `None` for read-only runs
    pub written: Option<WriteSummary>,
    /// The aggregation result
    pub report: AggregateReport,
    /// Size of the member key set after aggregation
    pub members: u64,
    /// Time spent in the aggregation call
    pub elapsed: Duration,
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Check the store, optionally seed and write entries, then aggregate
///
/// `clock` supplies epoch milliseconds; it is read once before writing and
/// once more for the reference time of the aggregation.
pub async fn run<S, C>(store: &S, config: &RunConfig, clock: C) -> RedisResult<RunSummary>
where
    S: Store + ?Sized,
    C: Fn() -> i64,
{
    config.keyspace.validate()?;

    let db_size = store.dbsize().await?;
    info!("Testing connection with DBSIZE: {} keys", db_size);

    let (seed, written) = if config.read_only {
        info!("Read-only run, skipping seeding and writing");
        (None, None)
    } else {
        let seeder =
            KeySetSeeder::new(config.keyspace.clone()).with_scan_count(config.scan_count);
        let seed = seeder
            .seed(store, config.key_quantity, config.reset_members)
            .await?;
        let writer = EntryWriter::new(config.entry_count).with_max_jitter_ms(config.max_jitter_ms);
        let written = writer
            .write_recent(store, &config.keyspace, clock())
            .await?;
        (Some(seed), Some(written))
    };

    let aggregator = WindowAggregator::new()
        .with_mode(config.mode)
        .with_routing_key(config.include_routing_key);
    let reference_ms = clock();
    let started = Instant::now();
    let report = aggregator
        .aggregate(store, &config.keyspace, reference_ms, config.lookback_secs)
        .await?;
    let elapsed = started.elapsed();
    info!(
        "Aggregated {} keys in {:?}, {} entries inside the window",
        report.len(),
        elapsed,
        report.windowed_entries()
    );

    let members = store.scard(config.keyspace.members_key()).await?;

    Ok(RunSummary {
        db_size,
        seed,
        written,
        report,
        members,
        elapsed,
    })
}
