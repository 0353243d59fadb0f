// src/graph/builder.rs
//! Graph Builder
//!
//! Keeps the latest known state of every venue and turns it into immutable
//! [`GraphSnapshot`]s. Writers (`ingest`, `prune`, `publish`) serialize on a
//! small working set. The published snapshot sits behind an `ArcSwap`, so
//! readers load it without locking and never see a half-built graph.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::snapshot::{EdgeSpec, EdgeStatus, GraphSnapshot};
use super::weights::{self, WeightTerms};
use crate::config::{GraphConfig, RouterConfig, WeightConfig};
use crate::curve::PricingCurve;
use crate::error::{Result, RouteError};
use crate::types::{Asset, AssetId, Direction, VenueId, VenueState};

/// A venue with its per-direction weights already computed.
#[derive(Debug, Clone)]
struct PreparedVenue {
    state: Arc<VenueState>,
    weights: [f64; 2],
    curve_ok: bool,
}

pub struct GraphBuilder {
    graph_config: GraphConfig,
    weight_config: WeightConfig,
    assets: DashMap<AssetId, Asset>,
    /// Latest state per venue, including pruned ones, for `rebuild`
    latest: DashMap<VenueId, Arc<VenueState>>,
    unavailable: DashMap<VenueId, DateTime<Utc>>,
    working: Mutex<HashMap<VenueId, PreparedVenue>>,
    published: ArcSwap<GraphSnapshot>,
    last_version: AtomicU64,
    liquidity_floor_bits: AtomicU64,
    gas_price_bits: AtomicU64,
}

impl GraphBuilder {
    pub fn new(graph_config: GraphConfig, weight_config: WeightConfig) -> Self {
        let floor = graph_config.min_liquidity_usd;
        let gas = graph_config.default_gas_price_gwei;
        Self {
            graph_config,
            weight_config,
            assets: DashMap::new(),
            latest: DashMap::new(),
            unavailable: DashMap::new(),
            working: Mutex::new(HashMap::new()),
            published: ArcSwap::from_pointee(GraphSnapshot::empty()),
            last_version: AtomicU64::new(0),
            liquidity_floor_bits: AtomicU64::new(floor.to_bits()),
            gas_price_bits: AtomicU64::new(gas.to_bits()),
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(config.graph.clone(), config.weights.clone())
    }

    /// Pins the latest published snapshot.
    pub fn current(&self) -> Arc<GraphSnapshot> {
        self.published.load_full()
    }

    pub fn graph_config(&self) -> &GraphConfig {
        &self.graph_config
    }

    pub fn gas_price_gwei(&self) -> f64 {
        f64::from_bits(self.gas_price_bits.load(Ordering::Acquire))
    }

    pub fn liquidity_floor(&self) -> f64 {
        f64::from_bits(self.liquidity_floor_bits.load(Ordering::Acquire))
    }

    pub fn venue_count(&self) -> usize {
        self.latest.len()
    }

    fn lock_working(&self) -> MutexGuard<'_, HashMap<VenueId, PreparedVenue>> {
        // The working set holds no invariants a panicking writer could break.
        self.working.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces asset metadata. Venues touching the asset are
    /// repriced since the slippage probe depends on its reference price.
    pub fn register_asset(&self, asset: Asset) {
        let id = asset.id.clone();
        self.assets.insert(id.clone(), asset);
        let mut working = self.lock_working();
        for prepared in working.values_mut() {
            if prepared.state.asset_a == id || prepared.state.asset_b == id {
                *prepared = self.prepare(prepared.state.clone());
            }
        }
    }

    /// Adds or updates one venue in the working set. Takes effect on the
    /// next `publish`.
    pub fn ingest(&self, state: VenueState) -> Result<()> {
        if state.asset_a == state.asset_b {
            return Err(RouteError::InvalidRequest(format!(
                "venue {} trades {} against itself",
                state.id, state.asset_a
            )));
        }
        for id in [&state.asset_a, &state.asset_b] {
            if !self.assets.contains_key(id) {
                self.assets.insert(id.clone(), Asset::unlisted(id));
            }
        }

        let state = Arc::new(state);
        let id = state.id.clone();
        self.latest.insert(id.clone(), state.clone());
        self.unavailable.remove(&id);

        let floor = self.liquidity_floor();
        let mut working = self.lock_working();
        if floor > 0.0 && state.liquidity_usd < floor {
            if working.remove(&id).is_some() {
                debug!("Venue {} dropped below liquidity floor ${:.2}", id, floor);
            }
            return Ok(());
        }
        working.insert(id, self.prepare(state));
        Ok(())
    }

    fn prepare(&self, state: Arc<VenueState>) -> PreparedVenue {
        let curve_ok = state.curve.check().is_ok() && (0.0..1.0).contains(&state.fee);
        let gas_price = self.gas_price_gwei();
        let mut weights = [0.0; 2];
        if curve_ok {
            for (slot, direction) in [Direction::AToB, Direction::BToA].into_iter().enumerate() {
                let (input_id, _) = state.endpoints(direction);
                let input = self
                    .assets
                    .get(input_id)
                    .map(|a| a.value().clone())
                    .unwrap_or_else(|| Asset::unlisted(input_id));
                let probe = weights::probe_amount(
                    &input,
                    self.graph_config.slippage_probe_usd,
                    &state.curve,
                    direction,
                );
                let terms = WeightTerms {
                    fee: state.fee,
                    liquidity_usd: state.liquidity_usd,
                    gas_cost: weights::gas_cost(state.curve.gas_units(), gas_price),
                    expected_slippage: weights::expected_slippage(&state.curve, direction, probe),
                };
                weights[slot] = weights::composite_weight(&self.weight_config, &terms);
            }
        }
        PreparedVenue {
            state,
            weights,
            curve_ok,
        }
    }

    /// Removes venues below `min_liquidity` (USD) from the graph. They stay
    /// known, so lowering the floor and calling `rebuild` restores them.
    pub fn prune(&self, min_liquidity: f64) -> usize {
        let floor = if min_liquidity.is_finite() {
            min_liquidity.max(0.0)
        } else {
            0.0
        };
        self.liquidity_floor_bits.store(floor.to_bits(), Ordering::Release);
        let mut working = self.lock_working();
        let before = working.len();
        working.retain(|_, prepared| prepared.state.liquidity_usd >= floor);
        let removed = before - working.len();
        if removed > 0 {
            info!("Pruned {} venues below ${:.2} liquidity", removed, floor);
        }
        removed
    }

    /// Updates the gas price used in edge weights. Non-positive or
    /// non-finite prices are ignored.
    pub fn set_gas_price(&self, gwei: f64) -> bool {
        if !gwei.is_finite() || gwei <= 0.0 {
            warn!("Ignoring invalid gas price {}", gwei);
            return false;
        }
        let previous = self.gas_price_bits.swap(gwei.to_bits(), Ordering::AcqRel);
        if f64::from_bits(previous) != gwei {
            let mut working = self.lock_working();
            for prepared in working.values_mut() {
                *prepared = self.prepare(prepared.state.clone());
            }
            debug!("Gas price updated to {} gwei, repriced {} venues", gwei, working.len());
        }
        true
    }

    /// Degrades a venue until its next ingest. Returns false for unknown venues.
    pub fn mark_unavailable(&self, id: &VenueId) -> bool {
        if !self.latest.contains_key(id) {
            return false;
        }
        warn!("Marking venue {} unavailable", id);
        self.unavailable.insert(id.clone(), Utc::now());
        true
    }

    /// Freezes the working set into a new snapshot version and publishes it.
    /// Falls back to a full `rebuild` if the integrity check fails.
    pub fn publish(&self) -> Result<Arc<GraphSnapshot>> {
        let snapshot = {
            let working = self.lock_working();
            self.assemble(&working)
        };
        match snapshot.verify_integrity() {
            Ok(()) => Ok(self.store(snapshot)),
            Err(e) => {
                warn!("Integrity check failed for v{}: {}. Rebuilding.", snapshot.version(), e);
                self.rebuild()
            }
        }
    }

    /// Reconstructs the working set from every known venue state and
    /// publishes the result.
    pub fn rebuild(&self) -> Result<Arc<GraphSnapshot>> {
        let floor = self.liquidity_floor();
        let snapshot = {
            let mut working = self.lock_working();
            working.clear();
            for entry in self.latest.iter() {
                let state = entry.value();
                if floor > 0.0 && state.liquidity_usd < floor {
                    continue;
                }
                working.insert(entry.key().clone(), self.prepare(state.clone()));
            }
            self.assemble(&working)
        };
        snapshot.verify_integrity()?;
        info!("Rebuilt graph from {} known venues", self.latest.len());
        Ok(self.store(snapshot))
    }

    fn assemble(&self, working: &HashMap<VenueId, PreparedVenue>) -> GraphSnapshot {
        let now = Utc::now();
        let version = self.last_version.fetch_add(1, Ordering::AcqRel) + 1;
        let freshness = chrono::Duration::seconds(self.graph_config.freshness_threshold_secs as i64);

        let mut edges = Vec::with_capacity(working.len() * 2);
        for (id, prepared) in working.iter() {
            let state = &prepared.state;
            let status = if !prepared.curve_ok {
                EdgeStatus::InvalidCurve
            } else if state.liquidity_usd <= 0.0 || state.liquidity_usd.is_nan() {
                EdgeStatus::NoLiquidity
            } else if now - state.timestamp > freshness {
                EdgeStatus::Stale
            } else if self.unavailable.contains_key(id) {
                EdgeStatus::Unavailable
            } else {
                EdgeStatus::Enabled
            };
            for (slot, direction) in [Direction::AToB, Direction::BToA].into_iter().enumerate() {
                edges.push(EdgeSpec {
                    venue: state.clone(),
                    direction,
                    weight: prepared.weights[slot],
                    status,
                });
            }
        }

        let assets = self.assets.iter().map(|a| a.value().clone()).collect();
        GraphSnapshot::from_parts(version, now, assets, edges)
    }

    fn store(&self, snapshot: GraphSnapshot) -> Arc<GraphSnapshot> {
        let stats = snapshot.stats();
        info!(
            "Published graph v{}: {} assets, {} venues, {}/{} edges enabled, ${:.0} liquidity",
            stats.version,
            stats.assets,
            stats.venues,
            stats.enabled_edges,
            stats.edges,
            stats.total_liquidity_usd
        );
        let snapshot = Arc::new(snapshot);
        self.published.store(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cp_venue;

    fn builder() -> GraphBuilder {
        GraphBuilder::from_config(&RouterConfig::default())
    }

    fn enabled_edges(snapshot: &GraphSnapshot, venue: &str) -> usize {
        snapshot
            .edges()
            .iter()
            .filter(|e| e.venue_id().as_str() == venue && e.is_enabled())
            .count()
    }

    #[test]
    fn test_ingest_is_invisible_until_publish() {
        let builder = builder();
        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        assert_eq!(builder.current().edge_count(), 0);

        let pinned = builder.current();
        let published = builder.publish().unwrap();
        assert_eq!(published.version(), 1);
        assert_eq!(published.edge_count(), 2);
        // A pinned snapshot is never touched by later publishes.
        assert_eq!(pinned.version(), 0);
        assert_eq!(pinned.edge_count(), 0);

        builder
            .ingest(cp_venue("yz", "Y", "Z", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        let next = builder.publish().unwrap();
        assert_eq!(next.version(), 2);
        assert_eq!(next.edge_count(), 4);
        assert_eq!(published.edge_count(), 2);
    }

    #[test]
    fn test_readers_only_see_whole_snapshots() {
        let builder = Arc::new(builder());
        builder.ingest(cp_venue("v0", "A0", "A1", 1_000_000, 1_000_000, 0.003)).unwrap();
        builder.publish().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let builder = builder.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let snapshot = builder.current();
                        assert!(snapshot.version() >= last);
                        // Every publish adds exactly one two-sided venue.
                        assert_eq!(snapshot.edge_count() as u64, 2 * snapshot.version());
                        last = snapshot.version();
                    }
                })
            })
            .collect();

        for i in 1..50u64 {
            let venue = format!("v{}", i);
            let (a, b) = (format!("A{}", i), format!("A{}", i + 1));
            builder.ingest(cp_venue(&venue, &a, &b, 1_000_000, 1_000_000, 0.003)).unwrap();
            builder.publish().unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(builder.current().version(), 50);
    }

    #[test]
    fn test_update_replaces_shared_state() {
        let builder = builder();
        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        builder
            .ingest(cp_venue("xy", "X", "Y", 2_000_000, 1_000_000, 0.003))
            .unwrap();
        let snapshot = builder.publish().unwrap();
        assert_eq!(snapshot.stats().venues, 1);
        let [ab, ba] = snapshot.venue_edges(&VenueId::new("xy")).unwrap();
        assert!(Arc::ptr_eq(&snapshot.edge(ab).venue, &snapshot.edge(ba).venue));
        assert_eq!(snapshot.edge(ab).quote(1_000).unwrap(), 498);
    }

    #[test]
    fn test_health_disables_without_deleting() {
        let builder = builder();
        let mut stale = cp_venue("stale", "X", "Y", 1_000_000, 1_000_000, 0.003);
        stale.timestamp = Utc::now() - chrono::Duration::seconds(3600);
        let mut dry = cp_venue("dry", "X", "Y", 1_000_000, 1_000_000, 0.003);
        dry.liquidity_usd = 0.0;
        let broken = cp_venue("broken", "X", "Y", 0, 1_000_000, 0.003);
        for state in [stale, dry, broken] {
            builder.ingest(state).unwrap();
        }
        builder
            .ingest(cp_venue("ok", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();

        let snapshot = builder.publish().unwrap();
        assert_eq!(snapshot.edge_count(), 8);
        assert_eq!(snapshot.stats().enabled_edges, 2);
        let status_of = |venue: &str| {
            let [ab, _] = snapshot.venue_edges(&VenueId::new(venue)).unwrap();
            snapshot.edge(ab).status
        };
        assert_eq!(status_of("stale"), EdgeStatus::Stale);
        assert_eq!(status_of("dry"), EdgeStatus::NoLiquidity);
        assert_eq!(status_of("broken"), EdgeStatus::InvalidCurve);

        // A fresh update re-enables the stale venue.
        builder
            .ingest(cp_venue("stale", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        let snapshot = builder.publish().unwrap();
        assert_eq!(enabled_edges(&snapshot, "stale"), 2);
    }

    #[test]
    fn test_mark_unavailable_until_next_ingest() {
        let builder = builder();
        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        assert!(builder.mark_unavailable(&VenueId::new("xy")));
        assert!(!builder.mark_unavailable(&VenueId::new("nope")));
        let snapshot = builder.publish().unwrap();
        assert_eq!(enabled_edges(&snapshot, "xy"), 0);

        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        assert_eq!(enabled_edges(&builder.publish().unwrap(), "xy"), 2);
    }

    #[test]
    fn test_prune_and_rebuild() {
        let builder = builder();
        let mut small = cp_venue("small", "X", "Y", 1_000, 1_000, 0.003);
        small.liquidity_usd = 50.0;
        builder.ingest(small).unwrap();
        builder
            .ingest(cp_venue("big", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();

        assert_eq!(builder.prune(100.0), 1);
        assert_eq!(builder.publish().unwrap().stats().venues, 1);

        // Still known; restored once the floor is lowered.
        assert_eq!(builder.venue_count(), 2);
        builder.prune(0.0);
        let rebuilt = builder.rebuild().unwrap();
        assert_eq!(rebuilt.stats().venues, 2);
    }

    #[test]
    fn test_gas_price_reprices_edges() {
        let builder = builder();
        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        let cheap = builder.publish().unwrap();
        assert!(builder.set_gas_price(5_000.0));
        assert!(!builder.set_gas_price(-1.0));
        assert_eq!(builder.gas_price_gwei(), 5_000.0);
        let expensive = builder.publish().unwrap();
        assert!(expensive.edge(0).weight > cheap.edge(0).weight);
    }

    #[test]
    fn test_self_pair_rejected() {
        let builder = builder();
        let result = builder.ingest(cp_venue("xx", "X", "X", 10, 10, 0.003));
        assert!(matches!(result, Err(RouteError::InvalidRequest(_))));
    }

    #[test]
    fn test_reference_price_reprices_slippage_term() {
        let builder = builder();
        builder
            .ingest(cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003))
            .unwrap();
        let weight_of = |snapshot: &GraphSnapshot| {
            let [a_to_b, _] = snapshot.venue_edges(&VenueId::new("xy")).unwrap();
            snapshot.edge(a_to_b).weight
        };
        let before = weight_of(&builder.publish().unwrap());

        // $1000 at $0.01 a unit probes a tenth of the pool.
        builder.register_asset(Asset::new("X", "X", 0).with_reference_price(0.01));
        let after = weight_of(&builder.publish().unwrap());
        assert!(after > before + 0.05, "{} -> {}", before, after);
    }
}
