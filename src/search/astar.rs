// src/search/astar.rs
//! A* over composite weights for larger graphs.
//!
//! Every route into the destination ends with one of its incoming edges, so
//! the cheapest usable incoming edge is a lower bound on the remaining cost
//! from any other node. The bound is consistent because weights are never
//! negative.

use super::dijkstra::best_first;
use super::path::{Exclusions, Path};
use super::PathSearch;
use crate::graph::{GraphSnapshot, NodeIndex};

/// Cheapest enabled, non-excluded edge entering `dest`, or `None` if the
/// destination cannot be reached at all.
pub fn min_incoming_weight(
    snapshot: &GraphSnapshot,
    dest: NodeIndex,
    exclusions: &Exclusions,
) -> Option<f64> {
    snapshot
        .incoming(dest)
        .iter()
        .map(|&idx| (idx, snapshot.edge(idx)))
        .filter(|(idx, edge)| {
            edge.is_enabled() && exclusions.allows_edge(*idx) && exclusions.allows_node(edge.from)
        })
        .map(|(_, edge)| edge.weight)
        .reduce(f64::min)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AStar;

impl PathSearch for AStar {
    fn find_path(
        &self,
        snapshot: &GraphSnapshot,
        source: NodeIndex,
        dest: NodeIndex,
        max_hops: usize,
        exclusions: &Exclusions,
    ) -> Option<Path> {
        if dest >= snapshot.node_count() {
            return None;
        }
        let bound = min_incoming_weight(snapshot, dest, exclusions)?;
        best_first(snapshot, source, dest, max_hops, exclusions, |node| {
            if node == dest {
                0.0
            } else {
                bound
            }
        })
    }

    fn name(&self) -> &'static str {
        "astar"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Dijkstra;
    use crate::testing::test_snapshot;
    use crate::types::AssetId;

    #[test]
    fn test_astar_agrees_with_dijkstra() {
        let snapshot = test_snapshot(&[
            ("ab", "A", "B", 0.3),
            ("bc", "B", "C", 0.2),
            ("cd", "C", "D", 0.1),
            ("ad", "A", "D", 0.7),
            ("bd", "B", "D", 0.35),
            ("ac", "A", "C", 0.45),
        ]);
        let a = snapshot.node_index(&AssetId::new("A")).unwrap();
        for dest in ["B", "C", "D"] {
            let d = snapshot.node_index(&AssetId::new(dest)).unwrap();
            for max_hops in 1..=3 {
                let exclusions = Exclusions::new();
                let expected = Dijkstra.find_path(&snapshot, a, d, max_hops, &exclusions);
                let actual = AStar.find_path(&snapshot, a, d, max_hops, &exclusions);
                assert_eq!(
                    expected.map(|p| p.edges),
                    actual.map(|p| p.edges),
                    "dest {} max_hops {}",
                    dest,
                    max_hops
                );
            }
        }
    }

    #[test]
    fn test_heuristic_bound() {
        let snapshot = test_snapshot(&[("ab", "A", "B", 0.3), ("cb", "C", "B", 0.2)]);
        let b = snapshot.node_index(&AssetId::new("B")).unwrap();
        let c = snapshot.node_index(&AssetId::new("C")).unwrap();
        assert_eq!(min_incoming_weight(&snapshot, b, &Exclusions::new()), Some(0.2));

        let mut exclusions = Exclusions::new();
        exclusions.nodes.insert(c);
        assert_eq!(min_incoming_weight(&snapshot, b, &exclusions), Some(0.3));
    }
}
