// src/search/dijkstra.rs
//! Hop-bounded best-first search over composite weights.
//!
//! Labels are (node, hop count) states, so the settled set is bounded by
//! `nodes * (max_hops + 1)`. With a zero heuristic this is plain Dijkstra;
//! `astar` reuses it with a destination-based lower bound.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use super::path::{Exclusions, Path, PathKey};
use super::PathSearch;
use crate::graph::{EdgeIndex, GraphSnapshot, NodeIndex};

/// A partial route waiting in the frontier
#[derive(Debug, Clone)]
struct Label {
    priority: f64,
    cost: f64,
    node: NodeIndex,
    edges: Vec<EdgeIndex>,
    nodes: Vec<NodeIndex>,
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior
        PathKey::compare(
            other.priority,
            &other.edges,
            &other.nodes,
            self.priority,
            &self.edges,
            &self.nodes,
        )
    }
}

pub(crate) fn best_first<H>(
    snapshot: &GraphSnapshot,
    source: NodeIndex,
    dest: NodeIndex,
    max_hops: usize,
    exclusions: &Exclusions,
    heuristic: H,
) -> Option<Path>
where
    H: Fn(NodeIndex) -> f64,
{
    if source == dest
        || source >= snapshot.node_count()
        || dest >= snapshot.node_count()
        || !exclusions.allows_node(source)
        || !exclusions.allows_node(dest)
    {
        return None;
    }

    let mut frontier = BinaryHeap::new();
    let mut settled: HashSet<(NodeIndex, usize)> = HashSet::new();
    frontier.push(Label {
        priority: heuristic(source),
        cost: 0.0,
        node: source,
        edges: Vec::new(),
        nodes: vec![source],
    });

    while let Some(label) = frontier.pop() {
        if label.node == dest {
            return Some(Path::from_edges(snapshot, source, label.edges));
        }
        let hops = label.edges.len();
        if !settled.insert((label.node, hops)) || hops >= max_hops {
            continue;
        }

        for &idx in snapshot.outgoing(label.node) {
            let edge = snapshot.edge(idx);
            if !edge.is_enabled()
                || !exclusions.allows_edge(idx)
                || !exclusions.allows_node(edge.to)
                || label.nodes.contains(&edge.to)
                || settled.contains(&(edge.to, hops + 1))
            {
                continue;
            }
            let cost = label.cost + edge.weight;
            let mut edges = label.edges.clone();
            edges.push(idx);
            let mut nodes = label.nodes.clone();
            nodes.push(edge.to);
            frontier.push(Label {
                priority: cost + heuristic(edge.to),
                cost,
                node: edge.to,
                edges,
                nodes,
            });
        }
    }
    None
}

/// Dijkstra over composite weight; used for smaller graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dijkstra;

impl PathSearch for Dijkstra {
    fn find_path(
        &self,
        snapshot: &GraphSnapshot,
        source: NodeIndex,
        dest: NodeIndex,
        max_hops: usize,
        exclusions: &Exclusions,
    ) -> Option<Path> {
        best_first(snapshot, source, dest, max_hops, exclusions, |_| 0.0)
    }

    fn name(&self) -> &'static str {
        "dijkstra"
    }
}
