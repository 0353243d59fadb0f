// src/splitter.rs
//! Order Splitter
//!
//! Allocates a total input across candidate paths. Small orders go down the
//! best single path; larger ones are spread with a marginal-utility
//! waterfall, which is optimal for concave, increasing output curves.

use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::config::SplitterConfig;
use crate::error::{Result, RouteError};
use crate::graph::GraphSnapshot;
use crate::optimizer::{AmountOptimizer, EvaluatedPath};
use crate::search::Path;
use crate::types::{Amount, AssetId, VenueId};

/// One path of a plan with its allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitLeg {
    pub route: EvaluatedPath,
    /// Least output acceptable under the request's slippage tolerance
    pub min_output: Amount,
}

impl SplitLeg {
    pub fn amount_in(&self) -> Amount {
        self.route.amount_in
    }

    pub fn expected_output(&self) -> Amount {
        self.route.amount_out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPlan {
    pub source: AssetId,
    pub dest: AssetId,
    pub total_input: Amount,
    pub legs: Vec<SplitLeg>,
    pub expected_output: Amount,
    pub min_output: Amount,
    pub price_impact: f64,
    pub confidence: f64,
    pub snapshot_version: u64,
}

impl SplitPlan {
    pub fn allocated(&self) -> Amount {
        self.legs.iter().map(SplitLeg::amount_in).sum()
    }

    pub fn is_single_path(&self) -> bool {
        self.legs.len() == 1
    }

    pub fn venues(&self) -> BTreeSet<&VenueId> {
        self.legs
            .iter()
            .flat_map(|leg| leg.route.path.venues.iter())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    path: &'a Path,
    ideal_rate: f64,
}

pub fn min_output(amount: Amount, ideal_rate: f64, tolerance: f64) -> Amount {
    let min = amount as f64 * ideal_rate * (1.0 - tolerance);
    if min.is_finite() && min > 0.0 {
        min.floor() as Amount
    } else {
        0
    }
}

/// Best-ranked candidates, at most `max_splits`, that share no venue with a
/// better-ranked pick. Legs are priced independently, so two legs must never
/// draw on the same reserves.
fn venue_disjoint(active: &[Candidate], max_splits: usize) -> Vec<usize> {
    let mut used: HashSet<&VenueId> = HashSet::new();
    let mut chosen = Vec::new();
    for (i, candidate) in active.iter().enumerate() {
        if chosen.len() == max_splits {
            break;
        }
        if candidate.path.venues.iter().any(|v| used.contains(v)) {
            continue;
        }
        used.extend(candidate.path.venues.iter());
        chosen.push(i);
    }
    chosen
}

#[derive(Debug, Clone)]
pub struct OrderSplitter {
    config: SplitterConfig,
    optimizer: AmountOptimizer,
    /// Required venue depth as a multiple of each hop's output
    liquidity_margin: f64,
}

impl OrderSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            optimizer: AmountOptimizer::new(),
            liquidity_margin: 1.0,
        }
    }

    /// Allocations that would break `margin` count as exhausted depth.
    pub fn with_liquidity_margin(mut self, margin: f64) -> Self {
        self.liquidity_margin = margin;
        self
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Splits `total` across `candidates` (best-ranked first) using at most
    /// the configured number of paths at once.
    pub fn split(
        &self,
        snapshot: &GraphSnapshot,
        total: Amount,
        candidates: &[Path],
        tolerance: f64,
    ) -> Result<SplitPlan> {
        self.split_limited(snapshot, total, candidates, tolerance, self.config.max_splits)
    }

    pub fn split_limited(
        &self,
        snapshot: &GraphSnapshot,
        total: Amount,
        candidates: &[Path],
        tolerance: f64,
        max_splits: usize,
    ) -> Result<SplitPlan> {
        if total == 0 {
            return Err(RouteError::InvalidRequest("amount must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&tolerance) {
            return Err(RouteError::InvalidRequest(format!(
                "slippage tolerance {} outside [0, 1)",
                tolerance
            )));
        }
        if candidates.is_empty() {
            return Err(RouteError::InvalidRequest("no candidate paths".to_string()));
        }
        let max_splits = max_splits.max(1);

        let mut depth_error: Option<RouteError> = None;
        let mut active: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for path in candidates {
            match self.optimizer.ideal_rate(snapshot, path) {
                Ok(rate) if rate > 0.0 && rate.is_finite() => active.push(Candidate {
                    path,
                    ideal_rate: rate,
                }),
                Ok(_) => {}
                Err(e) => depth_error = Some(e),
            }
        }

        // Single-path policy: best full-amount output, ties to the lower rank.
        let mut best_single: Option<(EvaluatedPath, f64)> = None;
        for candidate in &active {
            let evaluated = self
                .optimizer
                .evaluate(snapshot, candidate.path, total)
                .and_then(|evaluated| {
                    self.optimizer
                        .check_margin(snapshot, &evaluated, self.liquidity_margin)
                        .map(|()| evaluated)
                });
            match evaluated {
                Ok(evaluated) => {
                    if best_single
                        .as_ref()
                        .map_or(true, |(best, _)| evaluated.amount_out > best.amount_out)
                    {
                        best_single = Some((evaluated, candidate.ideal_rate));
                    }
                }
                Err(e) => depth_error = Some(e),
            }
        }
        if let Some((evaluated, rate)) = best_single {
            let min = min_output(total, rate, tolerance);
            if evaluated.price_impact < self.config.single_path_impact_threshold
                && evaluated.amount_out >= min
            {
                debug!(
                    "Single path {:?} (impact {:.4}%)",
                    evaluated.path.venues,
                    evaluated.price_impact * 100.0
                );
                return Ok(self.assemble(snapshot, total, vec![SplitLeg {
                    route: evaluated,
                    min_output: min,
                }]));
            }
        }

        let mut slippage: Option<(Amount, Amount)> = None;
        loop {
            if active.is_empty() {
                return Err(match slippage {
                    Some((expected_output, minimum_output)) => RouteError::SlippageExceeded {
                        expected_output,
                        minimum_output,
                        tolerance,
                    },
                    None => depth_error.unwrap_or_else(|| RouteError::InsufficientLiquidity {
                        venue: candidates[0].venues.first().cloned().unwrap_or_else(|| VenueId::new("")),
                        hop: 0,
                        last_good_amount: 0,
                        message: "no candidate path can be priced".to_string(),
                    }),
                });
            }

            let chosen = venue_disjoint(&active, max_splits);
            let pool: Vec<Candidate> = chosen.iter().map(|&i| active[i].clone()).collect();
            let allocation = self.waterfall(snapshot, total, &pool)?;

            let mut legs = Vec::new();
            let mut violated = Vec::new();
            for (slot, &amount) in allocation.iter().enumerate() {
                if amount == 0 {
                    continue;
                }
                let i = chosen[slot];
                let candidate = &active[i];
                let route = self.optimizer.evaluate(snapshot, candidate.path, amount)?;
                let min = min_output(amount, candidate.ideal_rate, tolerance);
                if route.amount_out < min {
                    debug!(
                        "Excluding {:?}: {} below minimum {} for {}",
                        candidate.path.venues, route.amount_out, min, amount
                    );
                    slippage = Some((route.amount_out, min));
                    violated.push(i);
                } else {
                    legs.push(SplitLeg {
                        route,
                        min_output: min,
                    });
                }
            }

            if violated.is_empty() {
                return Ok(self.assemble(snapshot, total, legs));
            }
            for i in violated.into_iter().rev() {
                active.remove(i);
            }
        }
    }

    /// Single-path plan for `path`, used for fallbacks and alternatives.
    pub fn single_path(
        &self,
        snapshot: &GraphSnapshot,
        total: Amount,
        path: &Path,
        tolerance: f64,
    ) -> Result<SplitPlan> {
        if total == 0 {
            return Err(RouteError::InvalidRequest("amount must be positive".to_string()));
        }
        let route = self.optimizer.evaluate(snapshot, path, total)?;
        self.optimizer
            .check_margin(snapshot, &route, self.liquidity_margin)?;
        let min = min_output(total, route.ideal_rate, tolerance);
        if route.amount_out < min {
            return Err(RouteError::SlippageExceeded {
                expected_output: route.amount_out,
                minimum_output: min,
                tolerance,
            });
        }
        Ok(self.assemble(snapshot, total, vec![SplitLeg {
            route,
            min_output: min,
        }]))
    }

    /// Hands out `total` in integer chunks, each to the candidate with the
    /// highest marginal output. The last chunk takes the remainder so the
    /// allocation sums to `total` exactly.
    fn waterfall(
        &self,
        snapshot: &GraphSnapshot,
        total: Amount,
        active: &[Candidate],
    ) -> Result<Vec<Amount>> {
        let increments = Amount::from(self.config.increments.max(1));
        let (chunk, steps) = if total < increments {
            (1, total)
        } else {
            (total / increments, increments)
        };

        let mut allocation = vec![0 as Amount; active.len()];
        let mut outputs = vec![0 as Amount; active.len()];
        let mut saturated = vec![false; active.len()];
        let mut last_error: Option<RouteError> = None;

        for step in 0..steps {
            let size = if step + 1 == steps {
                total - chunk * (steps - 1)
            } else {
                chunk
            };

            let mut pick: Option<(usize, Amount, Amount)> = None;
            for (i, candidate) in active.iter().enumerate() {
                if saturated[i] {
                    continue;
                }
                match self.optimizer.quote_within_margin(
                    snapshot,
                    candidate.path,
                    allocation[i] + size,
                    self.liquidity_margin,
                ) {
                    Ok(out) => {
                        let marginal = out.saturating_sub(outputs[i]);
                        if pick.map_or(true, |(_, best, _)| marginal > best) {
                            pick = Some((i, marginal, out));
                        }
                    }
                    Err(e) => {
                        saturated[i] = true;
                        last_error = Some(e);
                    }
                }
            }

            match pick {
                Some((i, _, out)) => {
                    allocation[i] += size;
                    outputs[i] = out;
                }
                None => {
                    let placed: Amount = allocation.iter().sum();
                    return Err(match last_error {
                        Some(RouteError::InsufficientLiquidity {
                            venue, hop, message, ..
                        }) => RouteError::InsufficientLiquidity {
                            venue,
                            hop,
                            last_good_amount: placed,
                            message: format!("placed {} of {}: {}", placed, total, message),
                        },
                        Some(other) => other,
                        None => RouteError::InvalidRequest("no active candidates".to_string()),
                    });
                }
            }
        }
        Ok(allocation)
    }

    fn assemble(&self, snapshot: &GraphSnapshot, total: Amount, legs: Vec<SplitLeg>) -> SplitPlan {
        let expected_output: Amount = legs.iter().map(SplitLeg::expected_output).sum();
        let min: Amount = legs.iter().map(|l| l.min_output).sum();
        let ideal: f64 = legs
            .iter()
            .map(|l| l.amount_in() as f64 * l.route.ideal_rate)
            .sum();
        let price_impact = if ideal > 0.0 {
            (1.0 - expected_output as f64 / ideal).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let confidence = legs
            .iter()
            .map(|l| l.route.confidence * l.amount_in() as f64)
            .sum::<f64>()
            / total as f64;

        let (source, dest) = match legs.first() {
            Some(leg) => (
                leg.route.path.source().clone(),
                leg.route.path.dest().clone(),
            ),
            None => (AssetId::new(""), AssetId::new("")),
        };
        if legs.len() > 1 {
            info!(
                "Split {} across {} paths: {:?}",
                total,
                legs.len(),
                legs.iter().map(SplitLeg::amount_in).collect::<Vec<_>>()
            );
        }
        SplitPlan {
            source,
            dest,
            total_input: total,
            legs,
            expected_output,
            min_output: min,
            price_impact,
            confidence,
            snapshot_version: snapshot.version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::search::{Exclusions, KShortestPaths, Dijkstra};
    use crate::testing::{builder_with, clmm_venue, cp_venue};
    use crate::types::VenueState;
    use std::sync::Arc;

    fn snapshot_of(venues: Vec<VenueState>) -> Arc<GraphSnapshot> {
        builder_with(&RouterConfig::default(), venues).unwrap().current()
    }

    fn candidates(snapshot: &GraphSnapshot, from: &str, to: &str) -> Vec<Path> {
        let s = snapshot.node_index(&AssetId::new(from)).unwrap();
        let d = snapshot.node_index(&AssetId::new(to)).unwrap();
        KShortestPaths::new(&Dijkstra, false).find(snapshot, s, d, 4, 3, &Exclusions::new())
    }

    fn direct(snapshot: &GraphSnapshot, venue: &str, from: &str) -> Path {
        let s = snapshot.node_index(&AssetId::new(from)).unwrap();
        let e = snapshot
            .edge_for(&VenueId::new(venue), &AssetId::new(from))
            .unwrap();
        Path::from_edges(snapshot, s, vec![e])
    }

    #[test]
    fn test_small_order_uses_single_path() {
        let snapshot = snapshot_of(vec![
            cp_venue("deep", "X", "Y", 1_000_000_000, 1_000_000_000, 0.003),
            cp_venue("shallow", "X", "Y", 10_000_000, 10_000_000, 0.003),
        ]);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        let plan = splitter
            .split(&snapshot, 100_000, &candidates(&snapshot, "X", "Y"), 0.01)
            .unwrap();
        assert!(plan.is_single_path());
        assert_eq!(plan.legs[0].route.path.venues, vec![VenueId::new("deep")]);
        assert_eq!(plan.allocated(), 100_000);
    }

    #[test]
    fn test_large_order_splits_by_depth() {
        let snapshot = snapshot_of(vec![
            cp_venue("deep", "X", "Y", 3_000_000_000, 3_000_000_000, 0.003),
            cp_venue("shallow", "X", "Y", 1_000_000_000, 1_000_000_000, 0.003),
        ]);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        let total = 400_000_003;
        let plan = splitter
            .split(&snapshot, total, &candidates(&snapshot, "X", "Y"), 0.5)
            .unwrap();
        assert_eq!(plan.legs.len(), 2);
        assert_eq!(plan.allocated(), total);

        let deep = plan
            .legs
            .iter()
            .find(|l| l.route.path.venues[0].as_str() == "deep")
            .unwrap();
        let share = deep.amount_in() as f64 / total as f64;
        assert!((share - 0.75).abs() < 0.02, "deep share {}", share);
        assert!(plan.legs.iter().all(|l| l.expected_output() > 0));
        assert!(plan.price_impact > 0.0);
    }

    #[test]
    fn test_violating_candidate_is_excluded() {
        let snapshot = snapshot_of(vec![
            cp_venue("small", "X", "Y", 1_000_000, 1_000_000, 0.003),
            cp_venue("big", "X", "Y", 1_000_000_000, 900_000_000, 0.003),
        ]);
        let splitter = OrderSplitter::new(SplitterConfig {
            single_path_impact_threshold: 0.001,
            ..Default::default()
        });
        let paths = vec![direct(&snapshot, "small", "X"), direct(&snapshot, "big", "X")];
        let plan = splitter.split(&snapshot, 5_000_000, &paths, 0.03).unwrap();
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].route.path.venues, vec![VenueId::new("big")]);
        assert_eq!(plan.allocated(), 5_000_000);
    }

    #[test]
    fn test_tight_tolerance_is_slippage_exceeded() {
        let snapshot = snapshot_of(vec![cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003)]);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        let paths = vec![direct(&snapshot, "xy", "X")];
        let err = splitter.split(&snapshot, 200_000, &paths, 0.01).unwrap_err();
        assert!(matches!(err, RouteError::SlippageExceeded { .. }), "{:?}", err);
        assert!(matches!(
            splitter.single_path(&snapshot, 200_000, &paths[0], 0.01),
            Err(RouteError::SlippageExceeded { .. })
        ));
    }

    #[test]
    fn test_exhausted_depth_is_insufficient_liquidity() {
        let snapshot = snapshot_of(vec![
            clmm_venue("a", "X", "Y", 1.0, 1_000_000.0, 0.99, 1.01, 0.003),
            clmm_venue("b", "X", "Y", 1.0, 2_000_000.0, 0.99, 1.01, 0.003),
        ]);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        let err = splitter
            .split(&snapshot, 50_000_000, &candidates(&snapshot, "X", "Y"), 0.5)
            .unwrap_err();
        assert!(matches!(err, RouteError::InsufficientLiquidity { .. }), "{:?}", err);
    }

    #[test]
    fn test_legs_never_share_a_venue() {
        // Both X -> Z candidates start on the same xy venue.
        let snapshot = snapshot_of(vec![
            cp_venue("xy", "X", "Y", 10_000_000, 10_000_000, 0.003),
            cp_venue("yz1", "Y", "Z", 5_000_000, 5_000_000, 0.003),
            cp_venue("yz2", "Y", "Z", 5_000_000, 5_000_000, 0.003),
        ]);
        let paths = candidates(&snapshot, "X", "Z");
        assert_eq!(paths.len(), 2);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        let plan = splitter.split(&snapshot, 2_000_000, &paths, 0.5).unwrap();

        let mut seen = HashSet::new();
        for leg in &plan.legs {
            for venue in &leg.route.path.venues {
                assert!(seen.insert(venue.clone()), "{} used by two legs", venue);
            }
        }
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.allocated(), 2_000_000);
        let executed = AmountOptimizer::new()
            .quote_output(&snapshot, &plan.legs[0].route.path, 2_000_000)
            .unwrap();
        assert_eq!(plan.expected_output, executed);
    }

    #[test]
    fn test_liquidity_margin_caps_allocation() {
        let snapshot = snapshot_of(vec![cp_venue("xy", "X", "Y", 10_000_000, 10_000_000, 0.003)]);
        let splitter = OrderSplitter::new(SplitterConfig::default()).with_liquidity_margin(2.0);
        let paths = vec![direct(&snapshot, "xy", "X")];

        match splitter.split(&snapshot, 15_000_000, &paths, 0.9).unwrap_err() {
            RouteError::InsufficientLiquidity {
                venue,
                hop,
                last_good_amount,
                ..
            } => {
                assert_eq!(venue, VenueId::new("xy"));
                assert_eq!(hop, 0);
                assert!(last_good_amount > 0 && last_good_amount < 15_000_000);
            }
            other => panic!("expected InsufficientLiquidity, got {:?}", other),
        }
        assert!(matches!(
            splitter.single_path(&snapshot, 15_000_000, &paths[0], 0.9),
            Err(RouteError::InsufficientLiquidity { .. })
        ));

        let plan = splitter.split(&snapshot, 1_000_000, &paths, 0.9).unwrap();
        let edge = snapshot.edge(paths[0].edges[0]);
        assert!(edge.output_depth() >= 2.0 * plan.expected_output as f64);
    }

    #[test]
    fn test_allocation_sums_exactly_for_awkward_totals() {
        let snapshot = snapshot_of(vec![
            cp_venue("p1", "X", "Y", 50_000, 50_000, 0.003),
            cp_venue("p2", "X", "Y", 70_000, 70_000, 0.003),
        ]);
        let splitter = OrderSplitter::new(SplitterConfig::default());
        for total in [1, 7, 199, 201, 12_345] {
            let plan = splitter
                .split(&snapshot, total, &candidates(&snapshot, "X", "Y"), 0.9)
                .unwrap();
            assert_eq!(plan.allocated(), total);
        }
        assert!(matches!(
            splitter.split(&snapshot, 0, &candidates(&snapshot, "X", "Y"), 0.1),
            Err(RouteError::InvalidRequest(_))
        ));
    }
}
