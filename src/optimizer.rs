// src/optimizer.rs
//! Multi-hop Amount Optimizer
//!
//! Search ranks paths by static weight; this module computes what a path
//! actually returns for a given amount by running each hop through its
//! venue's pricing curve. It also recombines the hops of several candidates
//! with a per-(asset, hop) dynamic program to find a better mix.

use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::curve::QuoteError;
use crate::error::{Result, RouteError};
use crate::graph::{Edge, EdgeIndex, GraphSnapshot, NodeIndex};
use crate::search::Path;
use crate::types::{Amount, AssetId, VenueId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopQuote {
    pub venue: VenueId,
    pub from: AssetId,
    pub to: AssetId,
    pub amount_in: Amount,
    pub amount_out: Amount,
    pub spot_rate: f64,
    pub fee: f64,
}

/// A path with ground-truth amounts for one input size
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedPath {
    pub path: Path,
    pub amount_in: Amount,
    pub amount_out: Amount,
    pub hops: Vec<HopQuote>,
    /// Output per input unit after fees, before price impact
    pub ideal_rate: f64,
    pub price_impact: f64,
    /// Share of the fee-free ideal output lost to fees and impact
    pub realized_cost: f64,
    pub confidence: f64,
}

fn hop_error(edge: &Edge, hop: usize, last_good_amount: Amount, err: QuoteError) -> RouteError {
    RouteError::InsufficientLiquidity {
        venue: edge.venue_id().clone(),
        hop,
        last_good_amount,
        message: err.to_string(),
    }
}

/// Best state reaching one asset at one hop count.
#[derive(Debug, Clone)]
struct DpState {
    amount: Amount,
    edges: Vec<EdgeIndex>,
    nodes: Vec<NodeIndex>,
}

impl DpState {
    /// More output wins; ties go to fewer hops, then the smaller edge sequence.
    fn beats(&self, other: &DpState) -> bool {
        self.amount
            .cmp(&other.amount)
            .then(other.edges.len().cmp(&self.edges.len()))
            .then_with(|| other.edges.cmp(&self.edges))
            .is_gt()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AmountOptimizer;

impl AmountOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Product of `spot * (1 - fee)` along the path.
    pub fn ideal_rate(&self, snapshot: &GraphSnapshot, path: &Path) -> Result<f64> {
        let mut rate = 1.0;
        for (hop, &idx) in path.edges.iter().enumerate() {
            let edge = snapshot.edge(idx);
            let spot = edge.spot_rate().map_err(|e| hop_error(edge, hop, 0, e))?;
            rate *= spot * (1.0 - edge.venue.fee);
        }
        Ok(rate)
    }

    /// Output of `amount` pushed through every hop. Amounts that round to
    /// zero part-way yield zero.
    pub fn quote_output(&self, snapshot: &GraphSnapshot, path: &Path, amount: Amount) -> Result<Amount> {
        self.quote_within_margin(snapshot, path, amount, 0.0)
    }

    /// `quote_output`, failing on the first hop whose venue would hold less
    /// than `margin` times that hop's output.
    pub fn quote_within_margin(
        &self,
        snapshot: &GraphSnapshot,
        path: &Path,
        amount: Amount,
        margin: f64,
    ) -> Result<Amount> {
        let mut carried = amount;
        for (hop, &idx) in path.edges.iter().enumerate() {
            if carried == 0 {
                return Ok(0);
            }
            let edge = snapshot.edge(idx);
            let out = edge
                .quote(carried)
                .map_err(|e| hop_error(edge, hop, carried, e))?;
            check_margin(edge, hop, carried, out, margin)?;
            carried = out;
        }
        Ok(carried)
    }

    /// Checks every hop of an evaluation against `margin`.
    pub fn check_margin(&self, snapshot: &GraphSnapshot, route: &EvaluatedPath, margin: f64) -> Result<()> {
        for (hop, (&idx, quote)) in route.path.edges.iter().zip(&route.hops).enumerate() {
            check_margin(snapshot.edge(idx), hop, quote.amount_in, quote.amount_out, margin)?;
        }
        Ok(())
    }

    /// Full per-hop evaluation of `path` for `amount`.
    pub fn evaluate(&self, snapshot: &GraphSnapshot, path: &Path, amount: Amount) -> Result<EvaluatedPath> {
        if amount == 0 {
            return Err(RouteError::InvalidRequest("amount must be positive".to_string()));
        }
        let mut hops = Vec::with_capacity(path.hops());
        let mut carried = amount;
        let mut ideal_rate = 1.0;
        let mut spot_product = 1.0;
        for (hop, &idx) in path.edges.iter().enumerate() {
            let edge = snapshot.edge(idx);
            let spot = edge.spot_rate().map_err(|e| hop_error(edge, hop, carried, e))?;
            let out = if carried == 0 {
                0
            } else {
                edge.quote(carried)
                    .map_err(|e| hop_error(edge, hop, carried, e))?
            };
            ideal_rate *= spot * (1.0 - edge.venue.fee);
            spot_product *= spot;
            hops.push(HopQuote {
                venue: edge.venue_id().clone(),
                from: path.assets[hop].clone(),
                to: path.assets[hop + 1].clone(),
                amount_in: carried,
                amount_out: out,
                spot_rate: spot,
                fee: edge.venue.fee,
            });
            carried = out;
        }

        let price_impact = shortfall(carried, amount as f64 * ideal_rate);
        let realized_cost = shortfall(carried, amount as f64 * spot_product);
        let confidence = self.confidence(snapshot, path, price_impact);
        Ok(EvaluatedPath {
            path: path.clone(),
            amount_in: amount,
            amount_out: carried,
            hops,
            ideal_rate,
            price_impact,
            realized_cost,
            confidence,
        })
    }

    /// Confidence score from venue liquidity and price impact
    fn confidence(&self, snapshot: &GraphSnapshot, path: &Path, price_impact: f64) -> f64 {
        if path.edges.is_empty() {
            return 0.0;
        }
        let avg_liquidity = path
            .edges
            .iter()
            .map(|&idx| snapshot.edge(idx).venue.liquidity_usd.max(0.0))
            .sum::<f64>()
            / path.edges.len() as f64;
        let liquidity_score = ((avg_liquidity + 1.0).ln() / 30.0).clamp(0.0, 1.0);
        let impact_score = (1.0 - price_impact).max(0.0);

        (liquidity_score + impact_score) / 2.0
    }

    /// `dp[asset][hop]` over the union of the candidates' edges: the most
    /// output reachable at each asset after each hop count, never revisiting
    /// an asset. Returns the best route into `dest` and its output, which
    /// may mix hops from different candidates.
    pub fn recombine(
        &self,
        snapshot: &GraphSnapshot,
        candidates: &[Path],
        amount: Amount,
        max_hops: usize,
    ) -> Option<(Path, Amount)> {
        let first = candidates.first()?;
        let (source, dest) = (first.nodes[0], first.nodes[first.nodes.len() - 1]);

        let union: BTreeSet<EdgeIndex> = candidates.iter().flat_map(|p| p.edges.iter().copied()).collect();
        let mut adjacency: HashMap<NodeIndex, Vec<EdgeIndex>> = HashMap::new();
        for &idx in &union {
            adjacency.entry(snapshot.edge(idx).from).or_default().push(idx);
        }

        let mut layer: BTreeMap<NodeIndex, DpState> = BTreeMap::new();
        layer.insert(
            source,
            DpState {
                amount,
                edges: Vec::new(),
                nodes: vec![source],
            },
        );
        let mut best: Option<DpState> = None;

        for _ in 0..max_hops {
            let mut next: BTreeMap<NodeIndex, DpState> = BTreeMap::new();
            for (node, state) in &layer {
                if *node == dest {
                    continue;
                }
                for &idx in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                    let edge = snapshot.edge(idx);
                    if state.nodes.contains(&edge.to) {
                        continue;
                    }
                    let out = match edge.quote(state.amount) {
                        Ok(out) if out > 0 => out,
                        _ => continue,
                    };
                    let mut edges = state.edges.clone();
                    edges.push(idx);
                    let mut nodes = state.nodes.clone();
                    nodes.push(edge.to);
                    let candidate = DpState {
                        amount: out,
                        edges,
                        nodes,
                    };
                    match next.get(&edge.to) {
                        Some(existing) if !candidate.beats(existing) => {}
                        _ => {
                            next.insert(edge.to, candidate);
                        }
                    }
                }
            }
            if let Some(arrived) = next.get(&dest) {
                if best.as_ref().map_or(true, |b| arrived.beats(b)) {
                    best = Some(arrived.clone());
                }
            }
            if next.is_empty() {
                break;
            }
            layer = next;
        }

        let best = best?;
        debug!(
            "Recombined {} candidates into a {}-hop route returning {}",
            candidates.len(),
            best.edges.len(),
            best.amount
        );
        Some((Path::from_edges(snapshot, source, best.edges), best.amount))
    }
}

fn check_margin(edge: &Edge, hop: usize, amount_in: Amount, out: Amount, margin: f64) -> Result<()> {
    let depth = edge.output_depth();
    if depth < margin * out as f64 {
        return Err(RouteError::InsufficientLiquidity {
            venue: edge.venue_id().clone(),
            hop,
            last_good_amount: amount_in,
            message: format!("depth {:.0} below {:.1}x margin on {}", depth, margin, out),
        });
    }
    Ok(())
}

/// `1 - actual / ideal`, clamped to [0, 1].
fn shortfall(actual: Amount, ideal: f64) -> f64 {
    if !(ideal > 0.0) {
        return 0.0;
    }
    (1.0 - actual as f64 / ideal).clamp(0.0, 1.0)
}
