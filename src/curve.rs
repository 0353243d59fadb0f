// src/curve.rs
//! Venue pricing curves.
//!
//! Each venue prices trades with one of a closed set of curve variants. All
//! variants implement [`PricingCurve`]; [`Curve`] is the tagged enum stored
//! in a `VenueState` and dispatches to the concrete implementation.
//!
//! Math runs in `f64` and results are floored to base units.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Amount, Direction};

const STABLE_MAX_ITERATIONS: usize = 255;
const STABLE_CONVERGENCE: f64 = 1e-10;
const MIN_ACTIVE_LIQUIDITY: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("amount is zero")]
    ZeroAmount,
    #[error("trade exceeds available depth")]
    ExceedsDepth,
    #[error("invalid curve state: {0}")]
    InvalidState(String),
    #[error("invariant solver did not converge")]
    NoConvergence,
}

/// The `quote(amount_in) -> amount_out` capability shared by every curve.
pub trait PricingCurve {
    /// Output for `amount_in`, with `fee` charged as a fraction.
    fn quote(&self, amount_in: Amount, direction: Direction, fee: f64)
        -> Result<Amount, QuoteError>;

    /// Fee-free marginal rate (output units per input unit) at the current state.
    fn spot_rate(&self, direction: Direction) -> Result<f64, QuoteError>;

    /// Reserve on the input side; virtual reserve at the current price for
    /// concentrated liquidity.
    fn input_reserve(&self, direction: Direction) -> f64;

    /// Output that can be taken before the curve runs dry.
    fn output_depth(&self, direction: Direction) -> f64;

    fn gas_units(&self) -> u64;

    /// Rejects parameter sets that cannot price anything.
    fn check(&self) -> Result<(), QuoteError>;
}

fn floor_amount(value: f64) -> Amount {
    if value.is_finite() && value > 0.0 {
        value.floor() as Amount
    } else {
        0
    }
}

fn fee_factor(fee: f64) -> Result<f64, QuoteError> {
    if !fee.is_finite() || !(0.0..1.0).contains(&fee) {
        return Err(QuoteError::InvalidState(format!("fee {} outside [0, 1)", fee)));
    }
    Ok(1.0 - fee)
}

/// x·y = k pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantProduct {
    pub reserve_a: Amount,
    pub reserve_b: Amount,
}

impl ConstantProduct {
    fn reserves(&self, direction: Direction) -> (f64, f64) {
        match direction {
            Direction::AToB => (self.reserve_a as f64, self.reserve_b as f64),
            Direction::BToA => (self.reserve_b as f64, self.reserve_a as f64),
        }
    }
}

impl PricingCurve for ConstantProduct {
    fn quote(
        &self,
        amount_in: Amount,
        direction: Direction,
        fee: f64,
    ) -> Result<Amount, QuoteError> {
        if amount_in == 0 {
            return Err(QuoteError::ZeroAmount);
        }
        self.check()?;
        let (reserve_in, reserve_out) = self.reserves(direction);
        let effective_in = amount_in as f64 * fee_factor(fee)?;
        let out = effective_in * reserve_out / (reserve_in + effective_in);
        Ok(floor_amount(out))
    }

    fn spot_rate(&self, direction: Direction) -> Result<f64, QuoteError> {
        self.check()?;
        let (reserve_in, reserve_out) = self.reserves(direction);
        Ok(reserve_out / reserve_in)
    }

    fn input_reserve(&self, direction: Direction) -> f64 {
        self.reserves(direction).0
    }

    fn output_depth(&self, direction: Direction) -> f64 {
        self.reserves(direction).1
    }

    fn gas_units(&self) -> u64 {
        100_000
    }

    fn check(&self) -> Result<(), QuoteError> {
        if self.reserve_a == 0 || self.reserve_b == 0 {
            return Err(QuoteError::InvalidState("empty reserve".to_string()));
        }
        Ok(())
    }
}

/// An initialized tick boundary. Crossing it upward adds `liquidity_net`
/// to the active liquidity, crossing downward subtracts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub sqrt_price: f64,
    pub liquidity_net: f64,
}

/// Concentrated-liquidity pool. Price is asset B per asset A; ticks are
/// sorted by ascending sqrt price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentratedLiquidity {
    pub sqrt_price: f64,
    pub liquidity: f64,
    pub ticks: Vec<Tick>,
}

/// Outcome of walking the tick ranges in one direction.
struct TickWalk {
    output: f64,
    exhausted: bool,
}

impl ConcentratedLiquidity {
    /// Walks ranges starting at the current price, consuming up to `budget`
    /// of (fee-adjusted) input. An infinite budget measures total depth.
    fn walk(&self, direction: Direction, budget: f64) -> TickWalk {
        let mut remaining = budget;
        let mut sqrt_p = self.sqrt_price;
        let mut liquidity = self.liquidity;
        let mut walk = TickWalk {
            output: 0.0,
            exhausted: false,
        };

        match direction {
            // Selling A: price moves down.
            Direction::AToB => {
                let mut idx = self.ticks.partition_point(|t| t.sqrt_price < sqrt_p);
                while remaining > 0.0 {
                    if idx == 0 {
                        walk.exhausted = true;
                        break;
                    }
                    let tick = &self.ticks[idx - 1];
                    if liquidity > MIN_ACTIVE_LIQUIDITY {
                        let dx_max = liquidity * (1.0 / tick.sqrt_price - 1.0 / sqrt_p);
                        if remaining < dx_max {
                            let next = liquidity * sqrt_p / (liquidity + remaining * sqrt_p);
                            walk.output += liquidity * (sqrt_p - next);
                            break;
                        }
                        walk.output += liquidity * (sqrt_p - tick.sqrt_price);
                        remaining -= dx_max;
                    }
                    sqrt_p = tick.sqrt_price;
                    liquidity -= tick.liquidity_net;
                    idx -= 1;
                }
            }
            // Selling B: price moves up.
            Direction::BToA => {
                let mut idx = self.ticks.partition_point(|t| t.sqrt_price <= sqrt_p);
                while remaining > 0.0 {
                    if idx == self.ticks.len() {
                        walk.exhausted = true;
                        break;
                    }
                    let tick = &self.ticks[idx];
                    if liquidity > MIN_ACTIVE_LIQUIDITY {
                        let dy_max = liquidity * (tick.sqrt_price - sqrt_p);
                        if remaining < dy_max {
                            let next = sqrt_p + remaining / liquidity;
                            walk.output += liquidity * (1.0 / sqrt_p - 1.0 / next);
                            break;
                        }
                        walk.output += liquidity * (1.0 / sqrt_p - 1.0 / tick.sqrt_price);
                        remaining -= dy_max;
                    }
                    sqrt_p = tick.sqrt_price;
                    liquidity += tick.liquidity_net;
                    idx += 1;
                }
            }
        }
        walk
    }
}

impl PricingCurve for ConcentratedLiquidity {
    fn quote(
        &self,
        amount_in: Amount,
        direction: Direction,
        fee: f64,
    ) -> Result<Amount, QuoteError> {
        if amount_in == 0 {
            return Err(QuoteError::ZeroAmount);
        }
        self.check()?;
        let walk = self.walk(direction, amount_in as f64 * fee_factor(fee)?);
        if walk.exhausted {
            return Err(QuoteError::ExceedsDepth);
        }
        Ok(floor_amount(walk.output))
    }

    fn spot_rate(&self, direction: Direction) -> Result<f64, QuoteError> {
        self.check()?;
        let price = self.sqrt_price * self.sqrt_price;
        Ok(match direction {
            Direction::AToB => price,
            Direction::BToA => 1.0 / price,
        })
    }

    fn input_reserve(&self, direction: Direction) -> f64 {
        match direction {
            Direction::AToB => self.liquidity / self.sqrt_price,
            Direction::BToA => self.liquidity * self.sqrt_price,
        }
    }

    fn output_depth(&self, direction: Direction) -> f64 {
        self.walk(direction, f64::INFINITY).output
    }

    fn gas_units(&self) -> u64 {
        150_000 + 20_000 * self.ticks.len().min(8) as u64
    }

    fn check(&self) -> Result<(), QuoteError> {
        if !self.sqrt_price.is_finite() || self.sqrt_price <= 0.0 {
            return Err(QuoteError::InvalidState(format!(
                "sqrt price {}",
                self.sqrt_price
            )));
        }
        if !self.liquidity.is_finite() || self.liquidity < 0.0 {
            return Err(QuoteError::InvalidState(format!(
                "liquidity {}",
                self.liquidity
            )));
        }
        if self.ticks.is_empty() {
            return Err(QuoteError::InvalidState("empty tick range".to_string()));
        }
        let ordered = self
            .ticks
            .windows(2)
            .all(|w| w[0].sqrt_price < w[1].sqrt_price);
        let finite = self
            .ticks
            .iter()
            .all(|t| t.sqrt_price.is_finite() && t.sqrt_price > 0.0 && t.liquidity_net.is_finite());
        if !ordered || !finite {
            return Err(QuoteError::InvalidState("ticks unsorted or non-finite".to_string()));
        }
        Ok(())
    }
}

/// Two-coin stable-invariant pool (Curve style), `amp` being the pool's
/// amplification coefficient. Fee is charged on the output side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableSwap {
    pub reserve_a: Amount,
    pub reserve_b: Amount,
    pub amp: u64,
}

impl StableSwap {
    fn reserves(&self, direction: Direction) -> (f64, f64) {
        match direction {
            Direction::AToB => (self.reserve_a as f64, self.reserve_b as f64),
            Direction::BToA => (self.reserve_b as f64, self.reserve_a as f64),
        }
    }

    fn ann(&self) -> f64 {
        self.amp as f64 * 2.0
    }

    /// Solves the invariant D for balances `x`, `y` by Newton iteration.
    fn compute_d(&self, x: f64, y: f64) -> Result<f64, QuoteError> {
        let sum = x + y;
        if sum == 0.0 {
            return Ok(0.0);
        }
        let ann = self.ann();
        let mut d = sum;
        for _ in 0..STABLE_MAX_ITERATIONS {
            let d_p = d * d / (x * 2.0) * d / (y * 2.0);
            let prev = d;
            d = (ann * sum + d_p * 2.0) * d / ((ann - 1.0) * d + 3.0 * d_p);
            if (d - prev).abs() <= STABLE_CONVERGENCE * d.max(1.0) {
                return Ok(d);
            }
        }
        Err(QuoteError::NoConvergence)
    }

    /// Balance of the other coin once this side holds `x`.
    fn compute_y(&self, x: f64, d: f64) -> Result<f64, QuoteError> {
        let ann = self.ann();
        let c = d * d / (x * 2.0) * d / (ann * 2.0);
        let b = x + d / ann;
        let mut y = d;
        for _ in 0..STABLE_MAX_ITERATIONS {
            let prev = y;
            y = (y * y + c) / (2.0 * y + b - d);
            if (y - prev).abs() <= STABLE_CONVERGENCE * y.max(1.0) {
                return Ok(y);
            }
        }
        Err(QuoteError::NoConvergence)
    }

    fn gross_out(&self, amount_in: f64, direction: Direction) -> Result<f64, QuoteError> {
        let (x, y) = self.reserves(direction);
        let d = self.compute_d(x, y)?;
        let new_y = self.compute_y(x + amount_in, d)?;
        Ok((y - new_y).max(0.0))
    }
}

impl PricingCurve for StableSwap {
    fn quote(
        &self,
        amount_in: Amount,
        direction: Direction,
        fee: f64,
    ) -> Result<Amount, QuoteError> {
        if amount_in == 0 {
            return Err(QuoteError::ZeroAmount);
        }
        self.check()?;
        let fee_keep = fee_factor(fee)?;
        let dy = self.gross_out(amount_in as f64, direction)?;
        let (_, reserve_out) = self.reserves(direction);
        if dy >= reserve_out {
            return Err(QuoteError::ExceedsDepth);
        }
        Ok(floor_amount(dy * fee_keep))
    }

    fn spot_rate(&self, direction: Direction) -> Result<f64, QuoteError> {
        self.check()?;
        let (x, _) = self.reserves(direction);
        let dx = (x * 1e-6).max(1.0);
        Ok(self.gross_out(dx, direction)? / dx)
    }

    fn input_reserve(&self, direction: Direction) -> f64 {
        self.reserves(direction).0
    }

    fn output_depth(&self, direction: Direction) -> f64 {
        self.reserves(direction).1
    }

    fn gas_units(&self) -> u64 {
        120_000
    }

    fn check(&self) -> Result<(), QuoteError> {
        if self.reserve_a == 0 || self.reserve_b == 0 {
            return Err(QuoteError::InvalidState("empty reserve".to_string()));
        }
        if self.amp == 0 {
            return Err(QuoteError::InvalidState("amp is zero".to_string()));
        }
        Ok(())
    }
}

/// Closed set of supported curve variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    ConstantProduct(ConstantProduct),
    ConcentratedLiquidity(ConcentratedLiquidity),
    StableSwap(StableSwap),
}

impl Curve {
    fn inner(&self) -> &dyn PricingCurve {
        match self {
            Curve::ConstantProduct(c) => c,
            Curve::ConcentratedLiquidity(c) => c,
            Curve::StableSwap(c) => c,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Curve::ConstantProduct(_) => "constant_product",
            Curve::ConcentratedLiquidity(_) => "concentrated_liquidity",
            Curve::StableSwap(_) => "stable_swap",
        }
    }
}

impl PricingCurve for Curve {
    fn quote(
        &self,
        amount_in: Amount,
        direction: Direction,
        fee: f64,
    ) -> Result<Amount, QuoteError> {
        self.inner().quote(amount_in, direction, fee)
    }

    fn spot_rate(&self, direction: Direction) -> Result<f64, QuoteError> {
        self.inner().spot_rate(direction)
    }

    fn input_reserve(&self, direction: Direction) -> f64 {
        self.inner().input_reserve(direction)
    }

    fn output_depth(&self, direction: Direction) -> f64 {
        self.inner().output_depth(direction)
    }

    fn gas_units(&self) -> u64 {
        self.inner().gas_units()
    }

    fn check(&self) -> Result<(), QuoteError> {
        self.inner().check()
    }
}
