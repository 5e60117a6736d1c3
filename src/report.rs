//! Aggregation results and their console form

use crate::commands::ScoreRange;
use crate::core::{
    error::{RedisError, RedisResult},
    value::{FromResp, RespValue},
};
use serde::Serialize;
use std::fmt;

/// Entry counts for one member key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    /// Member key name
    pub key: String,
    /// All entries in the key
    pub total: u64,
    /// Entries whose score falls in the window
    pub windowed: u64,
}

impl KeyCount {
    /// Decode the flat `[key, total, windowed, ...]` reply of the window
    /// script
    pub fn from_flat_reply(values: Vec<RespValue>) -> RedisResult<Vec<Self>> {
        if values.len() % 3 != 0 {
            return Err(RedisError::UnexpectedResponse(format!(
                "window script returned {} values, expected a multiple of 3",
                values.len()
            )));
        }

        let mut rows = Vec::with_capacity(values.len() / 3);
        let mut values = values.into_iter();
        while let (Some(key), Some(total), Some(windowed)) =
            (values.next(), values.next(), values.next())
        {
            rows.push(Self {
                key: String::from_resp(key)?,
                total: u64::from_resp(total)?,
                windowed: u64::from_resp(windowed)?,
            });
        }
        Ok(rows)
    }
}

/// Per-key totals and windowed counts from one aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    /// One row per member key, in server enumeration order
    pub rows: Vec<KeyCount>,
    /// Upper end of the window, in epoch milliseconds
    pub reference_ms: i64,
    /// Look-back the window was built from
    pub lookback_secs: i64,
    /// The inclusive score range that was counted
    pub window: ScoreRange,
}

impl AggregateReport {
    /// Number of keys reported
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no keys were reported
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for `key`, if present
    pub fn get(&self, key: &str) -> Option<&KeyCount> {
        self.rows.iter().find(|row| row.key == key)
    }

    /// Sum of all totals
    pub fn total_entries(&self) -> u64 {
        self.rows.iter().map(|row| row.total).sum()
    }

    /// Sum of all windowed counts
    pub fn windowed_entries(&self) -> u64 {
        self.rows.iter().map(|row| row.windowed).sum()
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[keyName] [totalCount] [countForTimeWindow]")?;
        for row in &self.rows {
            writeln!(f, "{} {} {}", row.key, row.total, row.windowed)?;
        }
        Ok(())
    }
}
