use serde::Serialize;
use std::collections::BTreeSet;
use time::OffsetDateTime;

use crate::modules::liquidity::schemas::StoredPoolData;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AvgLiquidity {
    pub token0: f64,
    pub token1: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_data_points: usize,
    pub snapshots: usize,
    pub avg_liquidity: AvgLiquidity,
    pub tick_range: TickRange,
    #[serde(with = "time::serde::rfc3339")]
    pub latest_snapshot: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub oldest_snapshot: OffsetDateTime,
}

/// `None` when there is nothing to aggregate.
pub fn summarize(records: &[StoredPoolData]) -> Option<PoolStats> {
    let first = records.first()?;
    let n = records.len() as f64;

    let mut min_tick = first.tick_idx;
    let mut max_tick = first.tick_idx;
    let mut sum0 = 0.0;
    let mut sum1 = 0.0;
    let mut snapshots = BTreeSet::new();
    for r in records {
        min_tick = min_tick.min(r.tick_idx);
        max_tick = max_tick.max(r.tick_idx);
        sum0 += r.token0_amount;
        sum1 += r.token1_amount;
        snapshots.insert(r.timestamp);
    }

    Some(PoolStats {
        total_data_points: records.len(),
        snapshots: snapshots.len(),
        avg_liquidity: AvgLiquidity { token0: sum0 / n, token1: sum1 / n },
        tick_range: TickRange { min: min_tick, max: max_tick },
        latest_snapshot: *snapshots.last()?,
        oldest_snapshot: *snapshots.first()?,
    })
}
