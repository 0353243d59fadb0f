// src/search/ksp.rs
//! K-shortest loopless paths (Yen's algorithm).
//!
//! Edge removal is expressed as an [`Exclusions`] set handed to a pure
//! search call, so spur searches never touch the shared snapshot and can run
//! in parallel.

use log::debug;
use rayon::prelude::*;
use std::collections::BTreeMap;

use super::path::{Exclusions, Path, PathKey};
use super::PathSearch;
use crate::graph::{GraphSnapshot, NodeIndex};

pub struct KShortestPaths<'a> {
    search: &'a dyn PathSearch,
    parallel: bool,
}

impl<'a> KShortestPaths<'a> {
    pub fn new(search: &'a dyn PathSearch, parallel: bool) -> Self {
        Self { search, parallel }
    }

    /// Up to `k` distinct loopless paths, ascending by [`PathKey`]. Returns
    /// fewer when the graph has fewer.
    pub fn find(
        &self,
        snapshot: &GraphSnapshot,
        source: NodeIndex,
        dest: NodeIndex,
        k: usize,
        max_hops: usize,
        base: &Exclusions,
    ) -> Vec<Path> {
        if k == 0 {
            return Vec::new();
        }
        let Some(first) = self.search.find_path(snapshot, source, dest, max_hops, base) else {
            return Vec::new();
        };

        let mut accepted = vec![first];
        let mut pool: BTreeMap<PathKey, Path> = BTreeMap::new();

        while accepted.len() < k {
            let found = {
                let previous = &accepted[accepted.len() - 1];
                let spur = |j: usize| self.spur_path(snapshot, &accepted, previous, j, dest, max_hops, base);
                if self.parallel {
                    (0..previous.hops()).into_par_iter().filter_map(spur).collect::<Vec<_>>()
                } else {
                    (0..previous.hops()).filter_map(spur).collect::<Vec<_>>()
                }
            };

            for path in found {
                if accepted.iter().any(|a| a.edges == path.edges) {
                    continue;
                }
                pool.entry(path.key()).or_insert(path);
            }

            match pool.pop_first() {
                Some((_, next)) => accepted.push(next),
                None => break,
            }
        }

        debug!(
            "{} found {} of {} requested paths ({} candidates left)",
            self.search.name(),
            accepted.len(),
            k,
            pool.len()
        );
        accepted
    }

    /// Root path `previous[..j]` joined to the best spur from node `j` that
    /// avoids every accepted path's next edge with the same root.
    #[allow(clippy::too_many_arguments)]
    fn spur_path(
        &self,
        snapshot: &GraphSnapshot,
        accepted: &[Path],
        previous: &Path,
        j: usize,
        dest: NodeIndex,
        max_hops: usize,
        base: &Exclusions,
    ) -> Option<Path> {
        let root = &previous.edges[..j];
        let spur_node = previous.nodes[j];

        let mut exclusions = base.clone();
        for path in accepted {
            if path.edges.len() > j && path.edges[..j] == *root {
                exclusions.edges.insert(path.edges[j]);
            }
        }
        exclusions.nodes.extend(previous.nodes[..j].iter().copied());

        let spur = self
            .search
            .find_path(snapshot, spur_node, dest, max_hops - j, &exclusions)?;
        let mut edges = root.to_vec();
        edges.extend(spur.edges);
        let path = Path::from_edges(snapshot, previous.nodes[0], edges);
        path.is_acyclic().then_some(path)
    }
}
