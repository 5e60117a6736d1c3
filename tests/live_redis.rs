//! Integration tests against a running server
//!
//! Ignored by default. Run with `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`.

use redis_aggz::{
    now_ms, run, Client, ConnectionConfig, EntryWriter, KeySetSeeder, KeySpace, PoolConfig,
    PoolStrategy, RunConfig, Script, Store, WindowAggregator,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn setup_client() -> Result<Client, redis_aggz::RedisError> {
    Client::connect(ConnectionConfig::new(redis_url())).await
}

/// A tag no other test run uses
fn fresh_space(name: &str) -> KeySpace {
    KeySpace::new(format!("aggz-{}-{}", name, now_ms()))
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_end_to_end_against_server() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_client().await?;
    client.health_check().await?;

    let space = fresh_space("e2e");
    let seeder = KeySetSeeder::new(space.clone());
    seeder.populate(&client, 3).await?;

    let now = now_ms();
    let writer = EntryWriter::new(0);
    for i in 0..3 {
        writer
            .record(
                &client,
                &space.member_name(i),
                &[now - 700_000, now - 500_000, now - 100_000, now - 50_000, now],
            )
            .await?;
    }

    let report = WindowAggregator::new()
        .aggregate(&client, &space, now, 600)
        .await?;
    assert_eq!(report.len(), 3);
    for row in &report.rows {
        assert_eq!(row.total, 5);
        assert_eq!(row.windowed, 4);
    }

    let removed = seeder.reset(&client).await?;
    assert_eq!(removed, 4);
    assert_eq!(client.scard(space.members_key()).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_reset_over_many_scan_steps() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_client().await?;
    let space = fresh_space("reset");
    let seeder = KeySetSeeder::new(space.clone()).with_scan_count(5);

    seeder.populate(&client, 60).await?;
    EntryWriter::new(2)
        .write_recent(&client, &space, now_ms())
        .await?;

    let removed = seeder.reset(&client).await?;
    assert_eq!(removed, 61);
    let page = Store::scan(&client, 0, &space.scan_pattern(), 10_000).await?;
    assert!(page.keys.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_script_falls_back_to_eval() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_client().await?;

    // Unique source so the server cannot have it cached yet
    let script = Script::new(format!("return '{}'", now_ms()));
    let result: String = script.execute(&client, vec![], vec![]).await?;
    assert!(!result.is_empty());

    // Now cached, so EVALSHA answers directly
    let again: String = script.execute(&client, vec![], vec![]).await?;
    assert_eq!(again, result);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_run_over_multiplexed_connection() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConnectionConfig::new(redis_url()).with_pool_config(PoolConfig {
        strategy: PoolStrategy::Multiplexed,
        ..Default::default()
    });
    let client = Client::connect(config).await?;

    let run_config = RunConfig {
        keyspace: fresh_space("run"),
        key_quantity: 5,
        entry_count: 4,
        lookback_secs: 60,
        reset_members: true,
        ..RunConfig::default()
    };
    let summary = run(&client, &run_config, now_ms).await?;
    assert_eq!(summary.members, 5);
    assert_eq!(summary.report.len(), 5);
    assert!(summary.report.rows.iter().all(|row| row.windowed == row.total));

    KeySetSeeder::new(run_config.keyspace.clone())
        .reset(&client)
        .await?;
    Ok(())
}
