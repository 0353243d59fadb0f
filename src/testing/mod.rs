//! Testing infrastructure
//!
//! Venue constructors, seeded synthetic graphs and in-memory stand-ins for
//! the collaborator traits (feed, gas oracle, simulator). Used by the unit
//! tests and by the integration suites under `tests/`.

use chrono::Utc;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::RouterConfig;
use crate::curve::{ConcentratedLiquidity, ConstantProduct, Curve, PricingCurve, StableSwap, Tick};
use crate::error::Result;
use crate::external::{ExecutionSimulator, GasPriceOracle, PoolSnapshotFeed, SimulationOutcome};
use crate::graph::snapshot::EdgeSpec;
use crate::graph::{EdgeStatus, GraphBuilder, GraphSnapshot};
use crate::search::Path;
use crate::types::{Amount, AssetId, Direction, VenueId, VenueState};

fn venue(id: &str, a: &str, b: &str, curve: Curve, fee: f64, liquidity_usd: f64) -> VenueState {
    VenueState {
        id: VenueId::new(id),
        asset_a: AssetId::new(a),
        asset_b: AssetId::new(b),
        curve,
        fee,
        liquidity_usd,
        timestamp: Utc::now(),
    }
}

/// Constant-product venue; reserves double as the USD liquidity figure.
pub fn cp_venue(id: &str, a: &str, b: &str, reserve_a: Amount, reserve_b: Amount, fee: f64) -> VenueState {
    venue(
        id,
        a,
        b,
        Curve::ConstantProduct(ConstantProduct { reserve_a, reserve_b }),
        fee,
        (reserve_a + reserve_b) as f64,
    )
}

/// Concentrated-liquidity venue with one position between the sqrt prices
/// `lower` and `upper`.
#[allow(clippy::too_many_arguments)]
pub fn clmm_venue(
    id: &str,
    a: &str,
    b: &str,
    sqrt_price: f64,
    liquidity: f64,
    lower: f64,
    upper: f64,
    fee: f64,
) -> VenueState {
    let curve = Curve::ConcentratedLiquidity(ConcentratedLiquidity {
        sqrt_price,
        liquidity,
        ticks: vec![
            Tick {
                sqrt_price: lower,
                liquidity_net: liquidity,
            },
            Tick {
                sqrt_price: upper,
                liquidity_net: -liquidity,
            },
        ],
    });
    venue(id, a, b, curve, fee, liquidity * (sqrt_price + 1.0 / sqrt_price))
}

pub fn stable_venue(id: &str, a: &str, b: &str, reserve_a: Amount, reserve_b: Amount, amp: u64, fee: f64) -> VenueState {
    venue(
        id,
        a,
        b,
        Curve::StableSwap(StableSwap {
            reserve_a,
            reserve_b,
            amp,
        }),
        fee,
        (reserve_a + reserve_b) as f64,
    )
}

/// Snapshot with fixed edge weights over balanced constant-product venues.
/// Each tuple is `(venue, asset_a, asset_b, weight)`; both directions get the
/// same weight.
pub fn test_snapshot(venues: &[(&str, &str, &str, f64)]) -> GraphSnapshot {
    let edges = venues
        .iter()
        .flat_map(|&(id, a, b, weight)| {
            let state = Arc::new(cp_venue(id, a, b, 1_000_000, 1_000_000, 0.003));
            [Direction::AToB, Direction::BToA].map(|direction| EdgeSpec {
                venue: state.clone(),
                direction,
                weight,
                status: EdgeStatus::Enabled,
            })
        })
        .collect();
    GraphSnapshot::from_parts(1, Utc::now(), Vec::new(), edges)
}

/// Builder with `venues` ingested and one snapshot published.
pub fn builder_with(config: &RouterConfig, venues: Vec<VenueState>) -> Result<Arc<GraphBuilder>> {
    let builder = Arc::new(GraphBuilder::from_config(config));
    for state in venues {
        builder.ingest(state)?;
    }
    builder.publish()?;
    Ok(builder)
}

/// Seeded random venue set over assets `T0..T{assets-1}`. A chain
/// `T0-T1-...` keeps every asset reachable; the remaining venues join random
/// pairs with a mix of curve variants. Reserves are deep enough that
/// moderate trades never exhaust a venue.
pub fn synthetic_venues(seed: u64, assets: usize, venues: usize) -> Vec<VenueState> {
    let mut rng = StdRng::seed_from_u64(seed);
    let assets = assets.max(2);
    let name = |i: usize| format!("T{}", i);
    let mut pairs: Vec<(usize, usize)> = (1..assets).map(|i| (i - 1, i)).collect();
    while pairs.len() < venues.max(assets - 1) {
        let a = rng.gen_range(0..assets);
        let b = rng.gen_range(0..assets);
        if a != b {
            pairs.push((a, b));
        }
    }

    pairs
        .into_iter()
        .enumerate()
        .map(|(i, (a, b))| {
            let id = format!("v{:03}", i);
            let fee = [0.0005, 0.003, 0.01][rng.gen_range(0..3)];
            let reserve_a: Amount = rng.gen_range(1_000_000_000u128..50_000_000_000);
            let price: f64 = rng.gen_range(0.5..2.0);
            let reserve_b = (reserve_a as f64 * price) as Amount;
            match rng.gen_range(0..10) {
                0..=5 => cp_venue(&id, &name(a), &name(b), reserve_a, reserve_b, fee),
                6..=7 => {
                    let sqrt_price = price.sqrt();
                    let liquidity = ((reserve_a as f64) * (reserve_b as f64)).sqrt();
                    clmm_venue(
                        &id,
                        &name(a),
                        &name(b),
                        sqrt_price,
                        liquidity,
                        sqrt_price * 0.5,
                        sqrt_price * 2.0,
                        fee,
                    )
                }
                _ => stable_venue(&id, &name(a), &name(b), reserve_a, reserve_a, 100, fee.min(0.001)),
            }
        })
        .collect()
}

/// One scripted response of [`MockFeed`]
#[derive(Debug, Clone)]
pub enum FeedStep {
    Batch(Vec<VenueState>),
    Fail(String),
    /// Never answers within any reasonable deadline
    Hang,
}

/// Replays scripted steps, then reports end of stream.
pub struct MockFeed {
    steps: Mutex<VecDeque<FeedStep>>,
    polls: AtomicUsize,
}

impl MockFeed {
    pub fn new(batches: Vec<Vec<VenueState>>) -> Self {
        Self::from_steps(batches.into_iter().map(FeedStep::Batch).collect())
    }

    pub fn from_steps(steps: Vec<FeedStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl PoolSnapshotFeed for MockFeed {
    async fn next_batch(&self) -> anyhow::Result<Option<Vec<VenueState>>> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let step = self.steps.lock().await.pop_front();
        match step {
            None => Ok(None),
            Some(FeedStep::Batch(batch)) => Ok(Some(batch)),
            Some(FeedStep::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(FeedStep::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    fn feed_name(&self) -> &str {
        "mock"
    }
}

pub struct MockOracle {
    price_gwei: f64,
    delay: Option<Duration>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockOracle {
    pub fn new(price_gwei: f64) -> Self {
        Self {
            price_gwei,
            delay: None,
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl GasPriceOracle for MockOracle {
    async fn current_price(&self, chain: &str) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            anyhow::bail!("gas oracle unavailable for {}", chain);
        }
        Ok(self.price_gwei)
    }
}

/// Executes paths against the builder's latest snapshot. Reverts on
/// unknown, disabled or scripted venues and on exhausted depth.
pub struct MockSimulator {
    builder: Arc<GraphBuilder>,
    reverting: HashSet<VenueId>,
    delay: Option<Duration>,
    output_scale: f64,
    calls: AtomicUsize,
}

impl MockSimulator {
    pub fn new(builder: Arc<GraphBuilder>) -> Self {
        Self {
            builder,
            reverting: HashSet::new(),
            delay: None,
            output_scale: 1.0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reverting_on(mut self, venues: &[&str]) -> Self {
        self.reverting.extend(venues.iter().map(|v| VenueId::new(*v)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Scales every simulated output, to provoke deviation checks.
    pub fn with_output_scale(mut self, scale: f64) -> Self {
        self.output_scale = scale;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl ExecutionSimulator for MockSimulator {
    async fn simulate(&self, path: &Path, amount: Amount) -> anyhow::Result<SimulationOutcome> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let snapshot = self.builder.current();
        let mut carried = amount;
        let mut gas_used = 0;
        for (venue, from) in path.venues.iter().zip(&path.assets) {
            if self.reverting.contains(venue) {
                debug!("Mock revert on {}", venue);
                return Ok(SimulationOutcome::reverted("scripted revert", Some(venue.clone())));
            }
            let edge = match snapshot.edge_for(venue, from).map(|idx| snapshot.edge(idx)) {
                Some(edge) if edge.is_enabled() => edge,
                _ => {
                    return Ok(SimulationOutcome::reverted(
                        format!("venue {} unavailable", venue),
                        Some(venue.clone()),
                    ))
                }
            };
            carried = match edge.quote(carried) {
                Ok(out) => out,
                Err(e) => return Ok(SimulationOutcome::reverted(e.to_string(), Some(venue.clone()))),
            };
            gas_used += edge.venue.curve.gas_units();
        }

        let output = (carried as f64 * self.output_scale) as Amount;
        Ok(SimulationOutcome::succeeded(output, gas_used))
    }
}
