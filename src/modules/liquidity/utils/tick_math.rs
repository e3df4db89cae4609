use crate::modules::liquidity::schemas::{LiquidityRange, PoolSummary, TickEntry};

const TICK_BASE: f64 = 1.0001;

/// Human price of token0 in token1 at `tick`. The decimal shift is folded into
/// the exponent so extreme ticks do not overflow before the adjustment.
pub fn tick_to_price(tick: i32, decimals0: u8, decimals1: u8) -> f64 {
    let shift = f64::from(decimals0) - f64::from(decimals1);
    (f64::from(tick) * TICK_BASE.ln() + shift * std::f64::consts::LN_10).exp()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub current_tick: i32,
    pub decimals0: u8,
    pub decimals1: u8,
    /// Active liquidity below the first tick. Zero when `ticks` starts at the
    /// lowest initialized tick of the pool.
    pub seed_liquidity: f64,
}

impl TransformParams {
    pub fn new(current_tick: i32, decimals0: u8, decimals1: u8) -> Self {
        Self { current_tick, decimals0, decimals1, seed_liquidity: 0.0 }
    }

    pub fn with_seed(mut self, seed_liquidity: f64) -> Self {
        self.seed_liquidity = seed_liquidity;
        self
    }
}

/// Implied token amounts for liquidity `l` spread over `[sqrt_lower, sqrt_upper)`.
pub fn split_amounts(l: f64, sqrt_lower: f64, sqrt_upper: f64, sqrt_current: f64) -> (f64, f64) {
    if sqrt_current <= sqrt_lower {
        (l * (sqrt_upper - sqrt_lower) / (sqrt_lower * sqrt_upper), 0.0)
    } else if sqrt_current >= sqrt_upper {
        (0.0, l * (sqrt_upper - sqrt_lower))
    } else {
        (
            l * (sqrt_upper - sqrt_current) / (sqrt_current * sqrt_upper),
            l * (sqrt_current - sqrt_lower),
        )
    }
}

/// Walks the ticks in ascending order, accumulating signed liquidity, and turns
/// every tick into the range it owns up to the next tick. The last range is
/// closed with the pool's tick spacing.
///
/// Entries whose tick or liquidity cannot be parsed are skipped. Zero-width
/// ranges and ranges with non-finite results are dropped, so the output has
/// strictly increasing `tick_idx`.
///
/// `total_amount` is `|token0_amount| + |token1_amount|`.
pub fn compute_liquidity_ranges(
    summary: &PoolSummary,
    ticks: &[TickEntry],
    params: &TransformParams,
) -> Vec<LiquidityRange> {
    let mut parsed: Vec<(i32, f64)> = ticks
        .iter()
        .filter_map(|entry| match (entry.tick(), entry.liquidity_delta()) {
            (Some(tick), Some(delta)) => Some((tick, delta)),
            _ => {
                tracing::debug!(
                    tick_idx = %entry.tick_idx,
                    "[liquidity] skipping malformed tick entry"
                );
                None
            }
        })
        .collect();
    parsed.sort_by_key(|(tick, _)| *tick);

    let sqrt_current =
        tick_to_price(params.current_tick, params.decimals0, params.decimals1).sqrt();
    let mut active = params.seed_liquidity;
    let mut out = Vec::with_capacity(parsed.len());

    for (i, &(tick, delta)) in parsed.iter().enumerate() {
        active += delta;
        let upper_tick = match parsed.get(i + 1) {
            Some(&(next, _)) => next,
            None => tick.saturating_add(summary.tick_spacing),
        };
        if upper_tick <= tick {
            continue;
        }

        let price_lower = tick_to_price(tick, params.decimals0, params.decimals1);
        let price_upper = tick_to_price(upper_tick, params.decimals0, params.decimals1);
        let (token0_amount, token1_amount) =
            split_amounts(active, price_lower.sqrt(), price_upper.sqrt(), sqrt_current);
        let total_amount = token0_amount.abs() + token1_amount.abs();

        let finite = [price_lower, price_upper, token0_amount, token1_amount, total_amount]
            .iter()
            .all(|v| v.is_finite());
        if !finite || price_lower > price_upper {
            tracing::debug!(tick, "[liquidity] dropping range with non-finite values");
            continue;
        }

        out.push(LiquidityRange {
            tick_idx: tick,
            price_lower,
            price_upper,
            liquidity: active,
            token0_amount,
            token1_amount,
            total_amount,
        });
    }
    out
}
