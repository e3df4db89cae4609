//! Canned upstream payloads and snapshots.

use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::modules::liquidity::schemas::{
    LiquidityRange, PoolConfig, PoolSnapshot, PoolSummary, RawPoolData, TickEntry, TokenInfo,
};

pub const TEST_POOL: &str = "0x1111111111111111111111111111111111111111";
pub const TEST_SPACING: i32 = 10;

pub fn test_pool(address: &str) -> PoolConfig {
    PoolConfig::new("base", "uniswap", address).with_fee_tier("500")
}

/// WETH/USDC-like pool: 18 and 6 decimals, spacing 10.
pub fn summary(tick: i32) -> PoolSummary {
    PoolSummary {
        address: Some(TEST_POOL.to_string()),
        token0: TokenInfo {
            address: "0x4200000000000000000000000000000000000006".into(),
            symbol: "WETH".into(),
            decimals: Some(18),
        },
        token1: TokenInfo {
            address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".into(),
            symbol: "USDC".into(),
            decimals: Some(6),
        },
        tick_spacing: TEST_SPACING,
        tick,
        liquidity: Some("1000000".into()),
    }
}

pub fn summary_json(tick: i32) -> Value {
    json!({
        "address": TEST_POOL,
        "token0": { "address": "0x4200000000000000000000000000000000000006", "symbol": "WETH", "decimals": 18 },
        "token1": { "address": "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", "symbol": "USDC", "decimals": "6" },
        "tickSpacing": TEST_SPACING,
        "tick": tick.to_string(),
        "liquidity": 1000000,
    })
}

/// A successful two-entry batch response as the upstream returns it.
pub fn batch_response_json(tick: i32, ticks: &[(i32, &str)]) -> Value {
    let ticks: Vec<Value> = ticks
        .iter()
        .map(|(idx, net)| json!({ "tickIdx": idx.to_string(), "liquidityNet": net }))
        .collect();
    json!([
        { "result": { "data": { "json": summary_json(tick) } } },
        { "result": { "data": { "json": { "ticks": ticks } } } },
    ])
}

/// `count` initialized ticks spaced evenly around `tick`, liquidity added on
/// the way up and removed on the way down so the running total stays positive.
pub fn raw_ladder(tick: i32, count: usize) -> RawPoolData {
    let half = (count / 2) as i32;
    let ticks: Vec<(i32, String)> = (0..count as i32)
        .map(|i| {
            let idx = tick - (tick.rem_euclid(TEST_SPACING)) + (i - half) * TEST_SPACING;
            let net = if i < half { 1_000 } else { -500 };
            (idx, net.to_string())
        })
        .collect();
    RawPoolData {
        summary: summary(tick),
        ticks: ticks.iter().map(|(idx, net)| TickEntry::new(*idx, net)).collect(),
    }
}

/// `n` ranges with ascending ticks and finite amounts.
pub fn snapshot_with_ticks(pool_address: &str, timestamp: OffsetDateTime, n: usize) -> PoolSnapshot {
    let liquidity_data = (0..n)
        .map(|i| {
            let f = i as f64;
            let token0_amount = 0.25 * (f + 1.0);
            let token1_amount = 1_500.0 / (f + 1.0);
            LiquidityRange {
                tick_idx: i as i32 * TEST_SPACING,
                price_lower: 1.0 + f,
                price_upper: 2.0 + f,
                liquidity: 1_000.0,
                token0_amount,
                token1_amount,
                total_amount: token0_amount + token1_amount,
            }
        })
        .collect();
    PoolSnapshot {
        pool_address: pool_address.to_string(),
        timestamp,
        summary: summary(0),
        liquidity_data,
    }
}
