// src/graph/weights.rs
//! Composite edge weight.
//!
//! `w_fee·fee + w_liq·(1/ln(liquidity+1)) + w_gas·gas_cost + w_slip·slippage`,
//! clamped to be non-negative so Dijkstra stays correct.

use crate::config::WeightConfig;
use crate::curve::{Curve, PricingCurve};
use crate::types::{Amount, Asset, Direction};

/// Share of the input-side reserve used as the slippage probe when the
/// input asset has no reference price.
const FALLBACK_PROBE_SHARE: f64 = 0.001;

/// Raw inputs to the weight function for one directed edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightTerms {
    pub fee: f64,
    pub liquidity_usd: f64,
    pub gas_cost: f64,
    pub expected_slippage: f64,
}

pub fn composite_weight(config: &WeightConfig, terms: &WeightTerms) -> f64 {
    let liquidity_term = if terms.liquidity_usd > 0.0 {
        1.0 / (terms.liquidity_usd + 1.0).ln()
    } else {
        0.0
    };
    let weight = config.fee * terms.fee
        + config.liquidity * liquidity_term
        + config.gas * terms.gas_cost
        + config.slippage * terms.expected_slippage;

    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Native-token cost of executing one hop.
pub fn gas_cost(gas_units: u64, gas_price_gwei: f64) -> f64 {
    gas_units as f64 * gas_price_gwei * 1e-9
}

/// Base-unit trade size worth `probe_usd` of the input asset.
pub fn probe_amount(input: &Asset, probe_usd: f64, curve: &Curve, direction: Direction) -> Amount {
    let scaled = match input.reference_price {
        Some(price) if price.is_finite() && price > 0.0 => {
            probe_usd / price * 10f64.powi(input.decimals as i32)
        }
        _ => curve.input_reserve(direction) * FALLBACK_PROBE_SHARE,
    };
    if scaled.is_finite() && scaled >= 1.0 {
        scaled.floor() as Amount
    } else {
        1
    }
}

/// Fee-free price impact of trading `probe` through the curve; a probe the
/// curve cannot absorb counts as full impact.
pub fn expected_slippage(curve: &Curve, direction: Direction, probe: Amount) -> f64 {
    let spot = match curve.spot_rate(direction) {
        Ok(rate) if rate.is_finite() && rate > 0.0 => rate,
        _ => return 1.0,
    };
    match curve.quote(probe, direction, 0.0) {
        Ok(out) => {
            let ideal = probe as f64 * spot;
            if ideal <= 0.0 {
                return 0.0;
            }
            (1.0 - out as f64 / ideal).clamp(0.0, 1.0)
        }
        Err(_) => 1.0,
    }
}
