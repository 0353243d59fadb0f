// src/graph/snapshot.rs
//! Immutable, versioned routing graph.
//!
//! A snapshot is never mutated after it is published; readers hold an
//! `Arc<GraphSnapshot>` for the whole request. Each venue contributes two
//! directed edges sharing one `Arc<VenueState>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::curve::{PricingCurve, QuoteError};
use crate::error::{Result, RouteError};
use crate::types::{Amount, Asset, AssetId, Direction, VenueId, VenueState};

pub type NodeIndex = usize;
pub type EdgeIndex = usize;

/// Why an edge can or cannot be used for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStatus {
    Enabled,
    /// Venue state older than the freshness threshold
    Stale,
    /// Curve parameters or fee cannot price a trade
    InvalidCurve,
    /// Reported liquidity is zero or negative
    NoLiquidity,
    /// Degraded after a missed external deadline
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub venue: Arc<VenueState>,
    pub direction: Direction,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub weight: f64,
    pub status: EdgeStatus,
}

impl Edge {
    pub fn is_enabled(&self) -> bool {
        self.status == EdgeStatus::Enabled
    }

    pub fn venue_id(&self) -> &VenueId {
        &self.venue.id
    }

    pub fn quote(&self, amount_in: Amount) -> std::result::Result<Amount, QuoteError> {
        self.venue
            .curve
            .quote(amount_in, self.direction, self.venue.fee)
    }

    /// Fee-free marginal rate
    pub fn spot_rate(&self) -> std::result::Result<f64, QuoteError> {
        self.venue.curve.spot_rate(self.direction)
    }

    pub fn output_depth(&self) -> f64 {
        self.venue.curve.output_depth(self.direction)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub asset: Asset,
    pub outgoing: Vec<EdgeIndex>,
    pub incoming: Vec<EdgeIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub version: u64,
    pub assets: usize,
    pub venues: usize,
    pub edges: usize,
    pub enabled_edges: usize,
    pub total_liquidity_usd: f64,
}

/// One directed edge before indexing.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub venue: Arc<VenueState>,
    pub direction: Direction,
    pub weight: f64,
    pub status: EdgeStatus,
}

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: u64,
    published_at: DateTime<Utc>,
    nodes: Vec<Node>,
    node_index: HashMap<AssetId, NodeIndex>,
    edges: Vec<Edge>,
    venue_edges: HashMap<VenueId, [EdgeIndex; 2]>,
    stats: GraphStats,
}

impl GraphSnapshot {
    pub fn empty() -> Self {
        Self::from_parts(0, Utc::now(), Vec::new(), Vec::new())
    }

    /// Indexes assets and edges into a snapshot. Node indices follow asset
    /// id order and edge indices follow (venue id, direction) order, so
    /// comparing index sequences compares id sequences. Endpoints missing
    /// from `assets` get a placeholder node.
    pub fn from_parts(
        version: u64,
        published_at: DateTime<Utc>,
        mut assets: Vec<Asset>,
        mut edges: Vec<EdgeSpec>,
    ) -> Self {
        edges.sort_by(|a, b| {
            a.venue
                .id
                .cmp(&b.venue.id)
                .then(a.direction.cmp(&b.direction))
        });
        let mut listed: HashSet<AssetId> = assets.iter().map(|a| a.id.clone()).collect();
        for spec in &edges {
            for id in [&spec.venue.asset_a, &spec.venue.asset_b] {
                if listed.insert(id.clone()) {
                    assets.push(Asset::unlisted(id));
                }
            }
        }
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        assets.dedup_by(|a, b| a.id == b.id);

        let mut nodes: Vec<Node> = Vec::with_capacity(assets.len());
        let mut node_index = HashMap::with_capacity(assets.len());
        for mut asset in assets {
            asset.liquidity_score = 0.0;
            node_index.insert(asset.id.clone(), nodes.len());
            nodes.push(Node {
                asset,
                outgoing: Vec::new(),
                incoming: Vec::new(),
            });
        }

        let mut built = Vec::with_capacity(edges.len());
        let mut venue_edges: HashMap<VenueId, [EdgeIndex; 2]> = HashMap::new();
        for spec in edges {
            let (from_id, to_id) = spec.venue.endpoints(spec.direction);
            let from = Self::intern(&mut nodes, &mut node_index, from_id);
            let to = Self::intern(&mut nodes, &mut node_index, to_id);
            let idx = built.len();
            nodes[from].outgoing.push(idx);
            nodes[to].incoming.push(idx);

            let slot = match spec.direction {
                Direction::AToB => 0,
                Direction::BToA => 1,
            };
            venue_edges
                .entry(spec.venue.id.clone())
                .or_insert([usize::MAX; 2])[slot] = idx;

            built.push(Edge {
                venue: spec.venue,
                direction: spec.direction,
                from,
                to,
                weight: spec.weight,
                status: spec.status,
            });
        }

        // Liquidity score: USD depth of enabled venues touching the asset.
        let mut total_liquidity = 0.0;
        for pair in venue_edges.values() {
            let Some(edge) = pair.iter().find_map(|&i| built.get(i)) else {
                continue;
            };
            if !edge.is_enabled() {
                continue;
            }
            let liquidity = edge.venue.liquidity_usd;
            total_liquidity += liquidity;
            nodes[edge.from].asset.liquidity_score += liquidity;
            nodes[edge.to].asset.liquidity_score += liquidity;
        }

        let stats = GraphStats {
            version,
            assets: nodes.len(),
            venues: venue_edges.len(),
            edges: built.len(),
            enabled_edges: built.iter().filter(|e| e.is_enabled()).count(),
            total_liquidity_usd: total_liquidity,
        };

        Self {
            version,
            published_at,
            nodes,
            node_index,
            edges: built,
            venue_edges,
            stats,
        }
    }

    fn intern(
        nodes: &mut Vec<Node>,
        node_index: &mut HashMap<AssetId, NodeIndex>,
        id: &AssetId,
    ) -> NodeIndex {
        if let Some(&idx) = node_index.get(id) {
            return idx;
        }
        let idx = nodes.len();
        node_index.insert(id.clone(), idx);
        nodes.push(Node {
            asset: Asset::unlisted(id),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        idx
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.published_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_index(&self, id: &AssetId) -> Option<NodeIndex> {
        self.node_index.get(id).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx]
    }

    pub fn asset(&self, idx: NodeIndex) -> &Asset {
        &self.nodes[idx].asset
    }

    pub fn edge(&self, idx: EdgeIndex) -> &Edge {
        &self.edges[idx]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outgoing(&self, idx: NodeIndex) -> &[EdgeIndex] {
        &self.nodes[idx].outgoing
    }

    pub fn incoming(&self, idx: NodeIndex) -> &[EdgeIndex] {
        &self.nodes[idx].incoming
    }

    pub fn venue(&self, id: &VenueId) -> Option<&Arc<VenueState>> {
        self.venue_edges
            .get(id)
            .and_then(|pair| self.edges.get(pair[0]))
            .map(|edge| &edge.venue)
    }

    pub fn venue_edges(&self, id: &VenueId) -> Option<[EdgeIndex; 2]> {
        self.venue_edges.get(id).copied()
    }

    /// The edge trading `from` through venue `id`
    pub fn edge_for(&self, id: &VenueId, from: &AssetId) -> Option<EdgeIndex> {
        let pair = self.venue_edges.get(id)?;
        pair.iter()
            .copied()
            .find(|&idx| self.edges.get(idx).map_or(false, |e| self.nodes[e.from].asset.id == *from))
    }

    /// Structural checks run before a snapshot is published.
    pub fn verify_integrity(&self) -> Result<()> {
        let fail = |msg: String| Err(RouteError::Integrity(msg));

        for (idx, edge) in self.edges.iter().enumerate() {
            if edge.from >= self.nodes.len() || edge.to >= self.nodes.len() {
                return fail(format!("edge {} references a missing node", idx));
            }
            let (from_id, to_id) = edge.venue.endpoints(edge.direction);
            if self.nodes[edge.from].asset.id != *from_id || self.nodes[edge.to].asset.id != *to_id
            {
                return fail(format!(
                    "edge {} of venue {} points at the wrong assets",
                    idx, edge.venue.id
                ));
            }
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                return fail(format!("edge {} has weight {}", idx, edge.weight));
            }
        }

        for (venue, pair) in &self.venue_edges {
            let ok = pair.iter().all(|&i| i < self.edges.len())
                && self.edges[pair[0]].direction == Direction::AToB
                && self.edges[pair[1]].direction == Direction::BToA
                && Arc::ptr_eq(&self.edges[pair[0]].venue, &self.edges[pair[1]].venue);
            if !ok {
                return fail(format!("venue {} does not have exactly two edges", venue));
            }
        }
        if self.venue_edges.len() * 2 != self.edges.len() {
            return fail(format!(
                "{} edges for {} venues",
                self.edges.len(),
                self.venue_edges.len()
            ));
        }

        for (n, node) in self.nodes.iter().enumerate() {
            let out_ok = node
                .outgoing
                .iter()
                .all(|&e| e < self.edges.len() && self.edges[e].from == n);
            let in_ok = node
                .incoming
                .iter()
                .all(|&e| e < self.edges.len() && self.edges[e].to == n);
            if !out_ok || !in_ok {
                return fail(format!("adjacency of asset {} is inconsistent", node.asset.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cp_venue;

    fn spec(venue: &Arc<VenueState>, direction: Direction, weight: f64) -> EdgeSpec {
        EdgeSpec {
            venue: venue.clone(),
            direction,
            weight,
            status: EdgeStatus::Enabled,
        }
    }

    fn two_venue_snapshot() -> GraphSnapshot {
        let xy = Arc::new(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003));
        let yz = Arc::new(cp_venue("yz", "Y", "Z", 500_000, 500_000, 0.003));
        GraphSnapshot::from_parts(
            7,
            Utc::now(),
            vec![Asset::new("X", "X", 6), Asset::new("Y", "Y", 6)],
            vec![
                spec(&xy, Direction::AToB, 0.1),
                spec(&xy, Direction::BToA, 0.1),
                spec(&yz, Direction::AToB, 0.2),
                spec(&yz, Direction::BToA, 0.2),
            ],
        )
    }

    #[test]
    fn test_snapshot_indexing() {
        let snapshot = two_venue_snapshot();
        assert_eq!(snapshot.version(), 7);
        // Z was not listed and gets a placeholder node.
        assert_eq!(snapshot.node_count(), 3);
        assert_eq!(snapshot.edge_count(), 4);
        assert!(snapshot.verify_integrity().is_ok());

        let y = snapshot.node_index(&AssetId::new("Y")).unwrap();
        assert_eq!(snapshot.outgoing(y).len(), 2);
        assert_eq!(snapshot.incoming(y).len(), 2);

        let edge = snapshot
            .edge_for(&VenueId::new("yz"), &AssetId::new("Z"))
            .unwrap();
        assert_eq!(snapshot.edge(edge).direction, Direction::BToA);

        let stats = snapshot.stats();
        assert_eq!(stats.venues, 2);
        assert_eq!(stats.enabled_edges, 4);
        assert!(snapshot.asset(y).liquidity_score > 0.0);
    }

    #[test]
    fn test_integrity_detects_corruption() {
        let mut snapshot = two_venue_snapshot();
        snapshot.edges[1].weight = f64::NAN;
        assert!(matches!(
            snapshot.verify_integrity(),
            Err(RouteError::Integrity(_))
        ));

        let mut snapshot = two_venue_snapshot();
        snapshot.edges[0].to = 99;
        assert!(snapshot.verify_integrity().is_err());

        let mut snapshot = two_venue_snapshot();
        snapshot.nodes[0].outgoing.push(3);
        assert!(snapshot.verify_integrity().is_err());
    }
}
