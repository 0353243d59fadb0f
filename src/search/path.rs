// src/search/path.rs
//! Routes through one snapshot, exclusion sets and the ranking key.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::graph::{EdgeIndex, GraphSnapshot, NodeIndex};
use crate::types::{AssetId, VenueId};

/// An ordered route of assets and the venues between them. Indices are only
/// meaningful for the snapshot the path was found on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub assets: Vec<AssetId>,
    pub venues: Vec<VenueId>,
    pub total_weight: f64,
}

impl Path {
    pub fn from_edges(snapshot: &GraphSnapshot, source: NodeIndex, edges: Vec<EdgeIndex>) -> Self {
        let mut nodes = Vec::with_capacity(edges.len() + 1);
        nodes.push(source);
        let mut total_weight = 0.0;
        let mut venues = Vec::with_capacity(edges.len());
        for &idx in &edges {
            let edge = snapshot.edge(idx);
            nodes.push(edge.to);
            venues.push(edge.venue_id().clone());
            total_weight += edge.weight;
        }
        let assets = nodes
            .iter()
            .map(|&n| snapshot.asset(n).id.clone())
            .collect();
        Self {
            nodes,
            edges,
            assets,
            venues,
            total_weight,
        }
    }

    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    pub fn source(&self) -> &AssetId {
        &self.assets[0]
    }

    pub fn dest(&self) -> &AssetId {
        &self.assets[self.assets.len() - 1]
    }

    pub fn is_acyclic(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        self.nodes.iter().all(|n| seen.insert(*n))
    }

    /// Same assets through the same venues
    pub fn same_route(&self, other: &Path) -> bool {
        self.venues == other.venues && self.assets == other.assets
    }

    pub fn key(&self) -> PathKey {
        PathKey {
            weight: self.total_weight,
            edges: self.edges.clone(),
            nodes: self.nodes.clone(),
        }
    }
}

/// Total order used to rank paths: weight, then fewer hops, then
/// (venue id, direction) sequence, then asset sequence. Edge and node
/// indices follow id order within a snapshot, so index sequences compare
/// like the id sequences they stand for.
#[derive(Debug, Clone)]
pub struct PathKey {
    weight: f64,
    edges: Vec<EdgeIndex>,
    nodes: Vec<NodeIndex>,
}

impl PathKey {
    pub fn compare(
        weight: f64,
        edges: &[EdgeIndex],
        nodes: &[NodeIndex],
        other_weight: f64,
        other_edges: &[EdgeIndex],
        other_nodes: &[NodeIndex],
    ) -> Ordering {
        weight
            .total_cmp(&other_weight)
            .then(edges.len().cmp(&other_edges.len()))
            .then_with(|| edges.cmp(other_edges))
            .then_with(|| nodes.cmp(other_nodes))
    }
}

impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        PathKey::compare(
            self.weight,
            &self.edges,
            &self.nodes,
            other.weight,
            &other.edges,
            &other.nodes,
        )
    }
}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PathKey {}

/// Edges and nodes a search must not use. Passed into every search call
/// instead of mutating the graph.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    pub edges: HashSet<EdgeIndex>,
    pub nodes: HashSet<NodeIndex>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes both directed edges of each listed venue present in the snapshot.
    pub fn for_venues<'a>(
        snapshot: &GraphSnapshot,
        venues: impl IntoIterator<Item = &'a VenueId>,
    ) -> Self {
        let mut exclusions = Self::default();
        for venue in venues {
            if let Some(pair) = snapshot.venue_edges(venue) {
                exclusions.edges.extend(pair);
            }
        }
        exclusions
    }

    pub fn allows_edge(&self, idx: EdgeIndex) -> bool {
        !self.edges.contains(&idx)
    }

    pub fn allows_node(&self, idx: NodeIndex) -> bool {
        !self.nodes.contains(&idx)
    }
}
