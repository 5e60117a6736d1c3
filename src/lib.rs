//! Time-windowed counting across colocated Redis sorted sets
//!
//! `redis-aggz` seeds a set of "member" keys that all share one cluster hash
//! tag, appends timestamped entries to each member's sorted set, and then
//! reports for every member its total entry count and the count inside a
//! trailing time window. The report comes from a single Lua script, so it
//! reflects one consistent snapshot of the server.
//!
//! # Features
//!
//! - Minimal async RESP2 client with pooled or multiplexed connections
//! - Typed pipelines: every queued command yields a typed reply slot
//! - EVALSHA with automatic EVAL fallback
//! - A [`Store`] seam with a live [`Client`] and an in-process [`MemoryStore`]
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_aggz::{run, Client, ConnectionConfig, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//!     let summary = run(&client, &RunConfig::default(), redis_aggz::now_ms).await?;
//!     print!("{}", summary.report);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::return_self_not_must_use)]

pub mod aggregator;
pub mod client;
pub mod commands;
pub mod connection;
pub mod core;
pub mod keyspace;
pub mod memory;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod report;
pub mod run;
pub mod script;
pub mod seeder;
pub mod store;
pub mod writer;

pub use crate::core::{
    config::{ConnectionConfig, Endpoint, PoolConfig, PoolStrategy},
    error::{RedisError, RedisResult},
    value::{FromResp, RespValue},
};
pub use aggregator::{window_range, AggregationMode, WindowAggregator};
pub use client::Client;
pub use keyspace::KeySpace;
pub use memory::MemoryStore;
pub use pipeline::{Pipeline, PipelineResult, Slot};
pub use report::{AggregateReport, KeyCount};
pub use run::{now_ms, run, RunConfig, RunSummary};
pub use script::Script;
pub use seeder::{KeySetSeeder, SeedOutcome};
pub use store::{Store, WindowQuery, WriteBatch, WriteOp};
pub use writer::{EntryWriter, WriteSummary};
