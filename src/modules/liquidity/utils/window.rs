use time::OffsetDateTime;

use crate::modules::liquidity::schemas::{
    LiquidityRange, PoolConfig, PoolSnapshot, PoolSummary, RawPoolData,
};
use crate::modules::liquidity::utils::tick_math::{TransformParams, compute_liquidity_ranges};
use crate::utils::floor_to_hour;

/// Index of the range whose tick is closest to `target`. Ties go to the lowest index.
pub fn nearest_index(ranges: &[LiquidityRange], target: i32) -> Option<usize> {
    ranges
        .iter()
        .enumerate()
        .min_by_key(|(_, r)| (i64::from(r.tick_idx) - i64::from(target)).abs())
        .map(|(i, _)| i)
}

/// `[center - radius, center + radius)` clamped to the slice, so at most `2 * radius` entries.
pub fn window_around(ranges: &[LiquidityRange], target: i32, radius: usize) -> &[LiquidityRange] {
    let Some(center) = nearest_index(ranges, target) else { return &[] };
    let start = center.saturating_sub(radius);
    let end = center.saturating_add(radius).min(ranges.len());
    &ranges[start..end]
}

pub fn build_snapshot(
    pool_address: &str,
    summary: PoolSummary,
    ranges: &[LiquidityRange],
    window_radius: usize,
    collected_at: OffsetDateTime,
) -> PoolSnapshot {
    let liquidity_data = window_around(ranges, summary.tick, window_radius).to_vec();
    PoolSnapshot {
        pool_address: pool_address.to_string(),
        timestamp: floor_to_hour(collected_at),
        summary,
        liquidity_data,
    }
}

/// Full write-path preparation for one pool: transform every fetched tick,
/// then keep the window around the current tick.
pub fn snapshot_from_raw(
    pool: &PoolConfig,
    raw: RawPoolData,
    window_radius: usize,
    collected_at: OffsetDateTime,
) -> PoolSnapshot {
    let (decimals0, decimals1) = raw.summary.decimals(pool);
    let params = TransformParams::new(raw.summary.tick, decimals0, decimals1);
    let ranges = compute_liquidity_ranges(&raw.summary, &raw.ticks, &params);
    build_snapshot(&pool.pool_address, raw.summary, &ranges, window_radius, collected_at)
}
