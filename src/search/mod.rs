// src/search/mod.rs
//! Path search over graph snapshots.
//!
//! Two interchangeable strategies (Dijkstra, A*) implement [`PathSearch`];
//! [`PathFinder`] picks one by graph size and resolves asset ids.
//! [`KShortestPaths`] builds ranked alternatives on top of either.

pub mod astar;
pub mod dijkstra;
pub mod ksp;
pub mod path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::{Result, RouteError};
use crate::graph::{GraphSnapshot, NodeIndex};
use crate::types::AssetId;

pub use astar::AStar;
pub use dijkstra::Dijkstra;
pub use ksp::KShortestPaths;
pub use path::{Exclusions, Path, PathKey};

/// Single-path search contract. Implementations are pure functions of the
/// snapshot and the exclusion set.
pub trait PathSearch: Send + Sync {
    fn find_path(
        &self,
        snapshot: &GraphSnapshot,
        source: NodeIndex,
        dest: NodeIndex,
        max_hops: usize,
        exclusions: &Exclusions,
    ) -> Option<Path>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    Dijkstra,
    AStar,
}

impl SearchStrategy {
    pub fn search(self) -> &'static dyn PathSearch {
        match self {
            SearchStrategy::Dijkstra => &Dijkstra,
            SearchStrategy::AStar => &AStar,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathFinder {
    config: SearchConfig,
}

impl PathFinder {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn strategy_for(&self, snapshot: &GraphSnapshot) -> SearchStrategy {
        if snapshot.node_count() < self.config.dijkstra_node_threshold {
            SearchStrategy::Dijkstra
        } else {
            SearchStrategy::AStar
        }
    }

    fn resolve(&self, snapshot: &GraphSnapshot, id: &AssetId) -> Result<NodeIndex> {
        snapshot
            .node_index(id)
            .ok_or_else(|| RouteError::UnknownAsset(id.clone()))
    }

    /// Cheapest loopless path within `max_hops`.
    pub fn find_path(
        &self,
        snapshot: &GraphSnapshot,
        source: &AssetId,
        dest: &AssetId,
        max_hops: usize,
    ) -> Result<Path> {
        let from = self.resolve(snapshot, source)?;
        let to = self.resolve(snapshot, dest)?;
        let strategy = self.strategy_for(snapshot);
        strategy
            .search()
            .find_path(snapshot, from, to, max_hops, &Exclusions::new())
            .ok_or_else(|| RouteError::NoPathFound {
                source_asset: source.clone(),
                dest_asset: dest.clone(),
                max_hops,
            })
    }

    /// Up to `k` ranked loopless paths avoiding `exclusions`.
    pub fn find_k_paths(
        &self,
        snapshot: &GraphSnapshot,
        source: &AssetId,
        dest: &AssetId,
        k: usize,
        max_hops: usize,
        exclusions: &Exclusions,
    ) -> Result<Vec<Path>> {
        let from = self.resolve(snapshot, source)?;
        let to = self.resolve(snapshot, dest)?;
        let strategy = self.strategy_for(snapshot);
        let paths = KShortestPaths::new(strategy.search(), self.config.parallel_spur_search)
            .find(snapshot, from, to, k, max_hops, exclusions);
        debug!(
            "{:?} search {} -> {}: {} paths on graph v{}",
            strategy,
            source,
            dest,
            paths.len(),
            snapshot.version()
        );
        if paths.is_empty() {
            return Err(RouteError::NoPathFound {
                source_asset: source.clone(),
                dest_asset: dest.clone(),
                max_hops,
            });
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_snapshot;

    #[test]
    fn test_strategy_selection_by_size() {
        let snapshot = test_snapshot(&[("xy", "X", "Y", 0.1)]);
        let small = PathFinder::new(SearchConfig::default());
        assert_eq!(small.strategy_for(&snapshot), SearchStrategy::Dijkstra);

        let tiny_threshold = PathFinder::new(SearchConfig {
            dijkstra_node_threshold: 2,
            ..Default::default()
        });
        assert_eq!(tiny_threshold.strategy_for(&snapshot), SearchStrategy::AStar);
        assert_eq!(SearchStrategy::AStar.search().name(), "astar");
    }

    #[test]
    fn test_find_path_errors() {
        let snapshot = test_snapshot(&[("xy", "X", "Y", 0.1), ("zw", "Z", "W", 0.1)]);
        let finder = PathFinder::new(SearchConfig::default());

        let unknown = finder.find_path(&snapshot, &AssetId::new("X"), &AssetId::new("Q"), 3);
        assert!(matches!(unknown, Err(RouteError::UnknownAsset(_))));

        let disconnected = finder.find_path(&snapshot, &AssetId::new("X"), &AssetId::new("W"), 3);
        assert!(matches!(disconnected, Err(RouteError::NoPathFound { .. })));

        let found = finder
            .find_path(&snapshot, &AssetId::new("Y"), &AssetId::new("X"), 3)
            .unwrap();
        assert_eq!(found.hops(), 1);
    }
}
