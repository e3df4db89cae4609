use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::runtime::store::EntityKey;

use super::consts::{DEFAULT_TOKEN_DECIMALS, DEFAULT_POOL_ADDRESS};

/// One pool the collector snapshots every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub chain: String,
    pub exchange: String,
    pub network: String,
    pub pool_address: String,
    #[serde(default)]
    pub fee_tier: String,
    /// Used when the upstream summary omits token decimals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token0_decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token1_decimals: Option<u8>,
}

impl PoolConfig {
    pub fn new(
        chain: impl Into<String>,
        exchange: impl Into<String>,
        pool_address: impl Into<String>,
    ) -> Self {
        let chain = chain.into();
        Self {
            network: chain.clone(),
            chain,
            exchange: exchange.into(),
            pool_address: pool_address.into(),
            fee_tier: String::new(),
            token0_decimals: None,
            token1_decimals: None,
        }
    }

    pub fn with_fee_tier(mut self, fee_tier: impl Into<String>) -> Self {
        self.fee_tier = fee_tier.into();
        self
    }

    /// The pool tracked when the config file lists none.
    pub fn default_pools() -> Vec<Self> {
        vec![Self::new("base", "uniswap", DEFAULT_POOL_ADDRESS).with_fee_tier("100")]
    }

    pub fn same_pool(&self, pool_address: &str) -> bool {
        self.pool_address.eq_ignore_ascii_case(pool_address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient::opt_u8")]
    pub decimals: Option<u8>,
}

/// Pool metadata as reported by the upstream simulate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    #[serde(default)]
    pub address: Option<String>,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    #[serde(deserialize_with = "lenient::i32")]
    pub tick_spacing: i32,
    /// Current tick of the pool.
    #[serde(deserialize_with = "lenient::i32")]
    pub tick: i32,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub liquidity: Option<String>,
}

impl PoolSummary {
    pub fn decimals(&self, pool: &PoolConfig) -> (u8, u8) {
        (
            self.token0.decimals.or(pool.token0_decimals).unwrap_or(DEFAULT_TOKEN_DECIMALS),
            self.token1.decimals.or(pool.token1_decimals).unwrap_or(DEFAULT_TOKEN_DECIMALS),
        )
    }
}

/// One initialized tick. Numeric fields stay textual until the transform
/// parses them, so one malformed entry never fails a whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickEntry {
    #[serde(deserialize_with = "lenient::string")]
    pub tick_idx: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub liquidity_net: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub liquidity_gross: Option<String>,
}

impl TickEntry {
    pub fn new(tick: i32, liquidity_net: impl ToString) -> Self {
        Self {
            tick_idx: tick.to_string(),
            liquidity_net: Some(liquidity_net.to_string()),
            liquidity_gross: None,
        }
    }

    pub fn tick(&self) -> Option<i32> {
        self.tick_idx.trim().parse().ok()
    }

    /// Signed liquidity change when crossing this tick upward. Net is preferred,
    /// gross is used only when net is absent.
    pub fn liquidity_delta(&self) -> Option<f64> {
        let raw = self.liquidity_net.as_deref().or(self.liquidity_gross.as_deref())?;
        let value: f64 = raw.trim().parse().ok()?;
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDistribution {
    #[serde(default)]
    pub ticks: Vec<TickEntry>,
}

/// Both upstream results for one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoolData {
    pub summary: PoolSummary,
    pub ticks: Vec<TickEntry>,
}

/// Liquidity held between `tick_idx` and the next initialized tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityRange {
    pub tick_idx: i32,
    pub price_lower: f64,
    pub price_upper: f64,
    /// Active liquidity across the range.
    pub liquidity: f64,
    pub token0_amount: f64,
    pub token1_amount: f64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub pool_address: String,
    /// Collection time rounded down to the hour, UTC.
    pub timestamp: OffsetDateTime,
    pub summary: PoolSummary,
    pub liquidity_data: Vec<LiquidityRange>,
}

/// One record as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPoolData {
    #[serde(skip)]
    pub entity_key: EntityKey,
    pub pool_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tick_idx: i32,
    pub price_lower: f64,
    pub price_upper: f64,
    pub total_amount: f64,
    pub token0_amount: f64,
    pub token1_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarChartEntry {
    pub tick_idx: i32,
    pub price_lower: f64,
    pub price_upper: f64,
    pub total_amount: f64,
}

impl From<&StoredPoolData> for BarChartEntry {
    fn from(r: &StoredPoolData) -> Self {
        Self {
            tick_idx: r.tick_idx,
            price_lower: r.price_lower,
            price_upper: r.price_upper,
            total_amount: r.total_amount,
        }
    }
}

mod lenient {
    use super::*;

    fn stringify(v: Value) -> Option<String> {
        match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        stringify(Value::deserialize(d)?)
            .ok_or_else(|| serde::de::Error::custom("expected a string or number, got null"))
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.and_then(stringify))
    }

    pub fn i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        let raw = string(d)?;
        raw.trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid integer '{raw}'")))
    }

    pub fn opt_u8<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
        match opt_string(d)? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid decimals '{raw}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tick_entry_accepts_numbers_and_strings() {
        let e: TickEntry =
            serde_json::from_value(json!({"tickIdx": -120, "liquidityNet": "42"})).unwrap();
        assert_eq!(e.tick(), Some(-120));
        assert_eq!(e.liquidity_delta(), Some(42.0));

        let e: TickEntry =
            serde_json::from_value(json!({"tickIdx": "7", "liquidityNet": -3})).unwrap();
        assert_eq!(e.tick(), Some(7));
        assert_eq!(e.liquidity_delta(), Some(-3.0));
    }

    #[test]
    fn gross_is_used_only_without_net() {
        let e: TickEntry =
            serde_json::from_value(json!({"tickIdx": 1, "liquidityGross": "9"})).unwrap();
        assert_eq!(e.liquidity_delta(), Some(9.0));

        let e: TickEntry = serde_json::from_value(
            json!({"tickIdx": 1, "liquidityNet": "-2", "liquidityGross": "9"}),
        )
        .unwrap();
        assert_eq!(e.liquidity_delta(), Some(-2.0));
    }

    #[test]
    fn malformed_liquidity_is_kept_but_unparsable() {
        let e: TickEntry =
            serde_json::from_value(json!({"tickIdx": 1, "liquidityNet": "abc"})).unwrap();
        assert_eq!(e.liquidity_delta(), None);
        let e: TickEntry = serde_json::from_value(json!({"tickIdx": 1})).unwrap();
        assert_eq!(e.liquidity_delta(), None);
    }

    #[test]
    fn summary_decimals_fall_back_to_pool_config() {
        let summary: PoolSummary = serde_json::from_value(json!({
            "token0": {"address": "0xa", "symbol": "WETH", "decimals": "18"},
            "token1": {"address": "0xb", "symbol": "USDC"},
            "tickSpacing": 10,
            "tick": "-200"
        }))
        .unwrap();
        assert_eq!(summary.tick, -200);

        let mut pool = PoolConfig::new("base", "uniswap", "0xpool");
        assert_eq!(summary.decimals(&pool), (18, DEFAULT_TOKEN_DECIMALS));
        pool.token1_decimals = Some(6);
        assert_eq!(summary.decimals(&pool), (18, 6));
    }

    #[test]
    fn summary_without_tick_is_rejected() {
        let res = serde_json::from_value::<PoolSummary>(json!({
            "token0": {}, "token1": {}, "tickSpacing": 10
        }));
        assert!(res.is_err());
    }

    #[test]
    fn pool_address_comparison_ignores_case() {
        let pool = PoolConfig::new("base", "uniswap", "0xAbC");
        assert!(pool.same_pool("0xabc"));
        assert!(!pool.same_pool("0xabd"));
    }
}
