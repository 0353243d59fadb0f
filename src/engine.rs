// src/engine.rs
//! Routing Engine
//!
//! Entry point for quote requests. Each request pins one graph snapshot and
//! runs search, amount optimization, splitting and validation against it,
//! so concurrent publishes never change a request's view of the graph.
//!
//! Candidate ordering is deterministic: expected output for the requested
//! amount (descending), then the search ranking key (weight, hops, venue
//! ids, asset ids). Plans are validated concurrently and the best-ranked
//! valid plan wins regardless of which validation finishes first.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::RouteCache;
use crate::config::RouterConfig;
use crate::error::{Result, RouteError};
use crate::external::ExecutionSimulator;
use crate::graph::{GraphBuilder, GraphSnapshot};
use crate::optimizer::AmountOptimizer;
use crate::search::{Exclusions, Path, PathFinder};
use crate::splitter::{OrderSplitter, SplitPlan};
use crate::types::{Amount, AssetId, VenueId};
use crate::utils::Timer;
use crate::validator::{PathValidator, Revert, RevertKind, ValidationOutcome};

/// A quote request. Unset limits fall back to the engine's config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRequest {
    pub source: AssetId,
    pub dest: AssetId,
    pub amount: Amount,
    pub max_hops: Option<usize>,
    pub max_splits: Option<usize>,
    pub slippage_tolerance: Option<f64>,
    pub excluded_venues: Vec<VenueId>,
}

impl RouteRequest {
    pub fn new(source: impl Into<AssetId>, dest: impl Into<AssetId>, amount: Amount) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            amount,
            max_hops: None,
            max_splits: None,
            slippage_tolerance: None,
            excluded_venues: Vec::new(),
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    pub fn with_max_splits(mut self, max_splits: usize) -> Self {
        self.max_splits = Some(max_splits);
        self
    }

    pub fn with_slippage_tolerance(mut self, tolerance: f64) -> Self {
        self.slippage_tolerance = Some(tolerance);
        self
    }

    pub fn excluding(mut self, venue: impl Into<VenueId>) -> Self {
        self.excluded_venues.push(venue.into());
        self
    }
}

/// Limits of one request after applying config defaults
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_hops: usize,
    max_splits: usize,
    tolerance: f64,
}

/// A fully validated route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub quote_id: Uuid,
    pub snapshot_version: u64,
    pub plan: SplitPlan,
    pub expected_output: Amount,
    pub simulated_output: Amount,
    pub min_output: Amount,
    pub price_impact: f64,
    pub confidence: f64,
    /// Position of the accepted plan among the validated ones (0 = primary)
    pub rank: usize,
    pub computed_at: DateTime<Utc>,
}

impl RouteResult {
    /// `(path, allocated amount)` per leg
    pub fn allocations(&self) -> Vec<(&Path, Amount)> {
        self.plan
            .legs
            .iter()
            .map(|leg| (&leg.route.path, leg.amount_in()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
}

pub struct RoutingEngine {
    config: RouterConfig,
    builder: Arc<GraphBuilder>,
    cache: Arc<RouteCache>,
    finder: PathFinder,
    optimizer: AmountOptimizer,
    splitter: OrderSplitter,
    validator: PathValidator,
    counters: Counters,
}

impl RoutingEngine {
    pub fn new(
        config: RouterConfig,
        builder: Arc<GraphBuilder>,
        cache: Arc<RouteCache>,
        simulator: Arc<dyn ExecutionSimulator>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Routing engine ready: max {} hops, {} candidates, {} splits, {} fallbacks",
            config.search.max_hops,
            config.search.candidate_paths,
            config.splitter.max_splits,
            config.validator.max_fallbacks
        );
        Ok(Self {
            finder: PathFinder::new(config.search.clone()),
            optimizer: AmountOptimizer::new(),
            splitter: OrderSplitter::new(config.splitter.clone())
                .with_liquidity_margin(config.validator.liquidity_margin),
            validator: PathValidator::new(config.validator.clone(), builder.clone(), simulator),
            counters: Counters::default(),
            config,
            builder,
            cache,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn builder(&self) -> &Arc<GraphBuilder> {
        &self.builder
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Best validated route for `request`, or a typed failure.
    pub async fn find_route(&self, request: &RouteRequest) -> Result<RouteResult> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let result = self.route(request).await;
        match &result {
            Ok(route) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                info!(
                    "✅ Route {} -> {}: {} in, {} expected out over {} path(s), impact {:.3}% (v{})",
                    request.source,
                    request.dest,
                    request.amount,
                    route.expected_output,
                    route.plan.legs.len(),
                    route.price_impact * 100.0,
                    route.snapshot_version
                );
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Route {} -> {} for {} failed: {}", request.source, request.dest, request.amount, e);
            }
        }
        result
    }

    /// Up to `k` validated single-path routes, best output first.
    pub async fn find_alternatives(
        &self,
        source: &AssetId,
        dest: &AssetId,
        amount: Amount,
        k: usize,
    ) -> Result<Vec<RouteResult>> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let result = self.alternatives(source, dest, amount, k).await;
        match &result {
            Ok(routes) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                debug!("{} alternatives {} -> {}", routes.len(), source, dest);
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Alternatives {} -> {} failed: {}", source, dest, e);
            }
        }
        result
    }

    fn limits(&self, request: &RouteRequest) -> Result<Limits> {
        if request.amount == 0 {
            return Err(RouteError::InvalidRequest("amount must be positive".to_string()));
        }
        if request.source == request.dest {
            return Err(RouteError::InvalidRequest(format!(
                "source and destination are both {}",
                request.source
            )));
        }
        let limits = Limits {
            max_hops: request.max_hops.unwrap_or(self.config.search.max_hops),
            max_splits: request
                .max_splits
                .unwrap_or(self.config.splitter.max_splits),
            tolerance: request
                .slippage_tolerance
                .unwrap_or(self.config.splitter.default_slippage_tolerance),
        };
        if limits.max_hops == 0 || limits.max_splits == 0 {
            return Err(RouteError::InvalidRequest(
                "max_hops and max_splits must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&limits.tolerance) {
            return Err(RouteError::InvalidRequest(format!(
                "slippage tolerance {} outside [0, 1)",
                limits.tolerance
            )));
        }
        Ok(limits)
    }

    /// Pins the current snapshot, refusing one older than the allowed age.
    fn pin_snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        let snapshot = self.builder.current();
        let age = snapshot.age(Utc::now());
        let max_age = self.config.graph.max_snapshot_age();
        if age > max_age {
            return Err(RouteError::StaleData {
                age_ms: age.as_millis() as u64,
                max_age_ms: max_age.as_millis() as u64,
            });
        }
        Ok(snapshot)
    }

    async fn route(&self, request: &RouteRequest) -> Result<RouteResult> {
        let limits = self.limits(request)?;
        let mut timer = Timer::start("find_route");

        // A plan that goes stale during validation gets one retry on a
        // fresh snapshot.
        let mut stale_age = None;
        for attempt in 0..2 {
            let snapshot = self.pin_snapshot()?;
            let candidates = self.ranked_candidates(&snapshot, request, limits)?;
            timer.checkpoint("search");

            let plans = self.build_plans(&snapshot, request.amount, &candidates, limits)?;
            timer.checkpoint("split");

            match self.select(&snapshot, plans).await? {
                Some(result) => {
                    timer.checkpoint("validate");
                    timer.finish_with_threshold(self.config.validator.simulation_timeout());
                    return Ok(result);
                }
                None => {
                    debug!(
                        "Plans on v{} went stale (attempt {})",
                        snapshot.version(),
                        attempt + 1
                    );
                    stale_age = Some(snapshot.age(Utc::now()));
                }
            }
        }
        Err(RouteError::StaleData {
            age_ms: stale_age.map_or(0, |age| age.as_millis() as u64),
            max_age_ms: self.config.graph.max_snapshot_age().as_millis() as u64,
        })
    }

    /// Candidate paths (cached per request shape) ordered by expected output
    /// for the requested amount, plus the recombined path when it differs.
    fn ranked_candidates(
        &self,
        snapshot: &GraphSnapshot,
        request: &RouteRequest,
        limits: Limits,
    ) -> Result<Vec<Path>> {
        let key = self.cache.key(
            &request.source,
            &request.dest,
            request.amount,
            limits.max_hops,
            &request.excluded_venues,
        );
        let mut paths = match self.cache.get(&key, snapshot.version()) {
            Some(paths) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                paths
            }
            None => {
                let exclusions = Exclusions::for_venues(snapshot, &request.excluded_venues);
                let paths = self.finder.find_k_paths(
                    snapshot,
                    &request.source,
                    &request.dest,
                    self.config.search.candidate_paths,
                    limits.max_hops,
                    &exclusions,
                )?;
                self.cache.insert(key, snapshot.version(), paths.clone());
                paths
            }
        };

        if let Some((combined, out)) =
            self.optimizer
                .recombine(snapshot, &paths, request.amount, limits.max_hops)
        {
            if !paths.iter().any(|p| p.same_route(&combined)) {
                debug!("Recombined path {:?} returns {}", combined.venues, out);
                paths.push(combined);
            }
        }

        Ok(paths
            .into_iter()
            .map(|path| {
                let out = self
                    .optimizer
                    .quote_output(snapshot, &path, request.amount)
                    .ok();
                (out, path.key(), path)
            })
            .sorted_by(|(out_a, key_a, _), (out_b, key_b, _)| {
                out_b.cmp(out_a).then_with(|| key_a.cmp(key_b))
            })
            .map(|(_, _, path)| path)
            .collect())
    }

    /// The split plan over all candidates, then single-path fallbacks in
    /// candidate order.
    fn build_plans(
        &self,
        snapshot: &GraphSnapshot,
        amount: Amount,
        candidates: &[Path],
        limits: Limits,
    ) -> Result<Vec<SplitPlan>> {
        let primary = self.splitter.split_limited(
            snapshot,
            amount,
            candidates,
            limits.tolerance,
            limits.max_splits,
        )?;
        let mut plans = vec![primary];

        for path in candidates {
            if plans.len() > self.config.validator.max_fallbacks {
                break;
            }
            let duplicate = plans
                .iter()
                .any(|plan| plan.is_single_path() && plan.legs[0].route.path.same_route(path));
            if duplicate {
                continue;
            }
            match self
                .splitter
                .single_path(snapshot, amount, path, limits.tolerance)
            {
                Ok(plan) => plans.push(plan),
                Err(e) => debug!("No fallback through {:?}: {}", path.venues, e),
            }
        }
        Ok(plans)
    }

    /// Validates `plans` concurrently and accepts the best-ranked valid one.
    /// Validations of worse-ranked plans still in flight are dropped once the
    /// winner is known. `Ok(None)` means the plans went stale.
    async fn select(
        &self,
        snapshot: &Arc<GraphSnapshot>,
        plans: Vec<SplitPlan>,
    ) -> Result<Option<RouteResult>> {
        let mut outcomes: Vec<Option<ValidationOutcome>> = vec![None; plans.len()];
        let mut winner = None;
        {
            let mut pending: FuturesUnordered<_> = plans
                .iter()
                .enumerate()
                .map(|(rank, plan)| async move {
                    (rank, self.validator.validate(plan, snapshot).await)
                })
                .collect();

            while let Some((rank, outcome)) = pending.next().await {
                if let ValidationOutcome::Reverted(revert) = &outcome {
                    debug!("Plan {} reverted: {}", rank, revert.reason);
                }
                outcomes[rank] = Some(outcome);
                if let Some(best) = decided(&outcomes) {
                    winner = Some(best);
                    break;
                }
            }
        }

        if let Some(rank) = winner {
            if let Some(ValidationOutcome::Valid {
                simulated_output, ..
            }) = outcomes[rank].clone()
            {
                if rank > 0 {
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    info!("Fell back to plan {} of {}", rank, plans.len());
                }
                let plan = plans.into_iter().nth(rank);
                return Ok(plan.map(|plan| self.result(snapshot, plan, simulated_output, rank)));
            }
        }

        if outcomes
            .iter()
            .any(|o| matches!(o, Some(ValidationOutcome::Stale)))
        {
            return Ok(None);
        }
        Err(self.exhausted(&plans, &outcomes))
    }

    fn exhausted(&self, plans: &[SplitPlan], outcomes: &[Option<ValidationOutcome>]) -> RouteError {
        let reverts: Vec<(usize, &Revert)> = outcomes
            .iter()
            .enumerate()
            .filter_map(|(rank, o)| match o {
                Some(ValidationOutcome::Reverted(revert)) => Some((rank, revert)),
                _ => None,
            })
            .collect();

        if !reverts.is_empty() && reverts.iter().all(|(_, r)| r.kind == RevertKind::Timeout) {
            return RouteError::Timeout {
                dependency: "execution simulator".to_string(),
                deadline_ms: self.config.validator.simulation_timeout_ms,
            };
        }

        // Plans that only failed the depth check never reached the simulator.
        if let Some((_, revert)) = reverts.first() {
            if reverts.iter().all(|(_, r)| r.kind == RevertKind::Liquidity) {
                return RouteError::InsufficientLiquidity {
                    venue: revert.venue.clone().unwrap_or_else(|| VenueId::new("unknown")),
                    hop: revert.hop.unwrap_or(0),
                    last_good_amount: revert.amount_in,
                    message: revert.reason.clone(),
                };
            }
        }

        let (rank, reason, venue) = match reverts.last() {
            Some((rank, revert)) => (*rank, revert.reason.clone(), revert.venue.clone()),
            None => (0, "no plan validated".to_string(), None),
        };
        let venue = venue
            .or_else(|| {
                plans
                    .get(rank)
                    .and_then(|plan| plan.venues().into_iter().next().cloned())
            })
            .unwrap_or_else(|| VenueId::new("unknown"));
        RouteError::SimulationReverted {
            attempts: plans.len(),
            venue,
            last_reason: reason,
        }
    }

    fn result(
        &self,
        snapshot: &GraphSnapshot,
        plan: SplitPlan,
        simulated_output: Amount,
        rank: usize,
    ) -> RouteResult {
        RouteResult {
            quote_id: Uuid::new_v4(),
            snapshot_version: snapshot.version(),
            expected_output: plan.expected_output,
            simulated_output,
            min_output: plan.min_output,
            price_impact: plan.price_impact,
            confidence: plan.confidence,
            plan,
            rank,
            computed_at: Utc::now(),
        }
    }

    async fn alternatives(
        &self,
        source: &AssetId,
        dest: &AssetId,
        amount: Amount,
        k: usize,
    ) -> Result<Vec<RouteResult>> {
        if k == 0 {
            return Err(RouteError::InvalidRequest("k must be at least 1".to_string()));
        }
        let request = RouteRequest::new(source.clone(), dest.clone(), amount);
        let limits = self.limits(&request)?;
        let snapshot = self.pin_snapshot()?;
        let paths = self.finder.find_k_paths(
            &snapshot,
            source,
            dest,
            k,
            limits.max_hops,
            &Exclusions::new(),
        )?;

        let mut last_error = None;
        let mut plans = Vec::with_capacity(paths.len());
        for (rank, path) in paths.iter().enumerate() {
            match self
                .splitter
                .single_path(&snapshot, amount, path, limits.tolerance)
            {
                Ok(plan) => plans.push((rank, plan)),
                Err(e) => last_error = Some(e),
            }
        }
        if plans.is_empty() {
            return Err(last_error.unwrap_or_else(|| RouteError::NoPathFound {
                source_asset: source.clone(),
                dest_asset: dest.clone(),
                max_hops: limits.max_hops,
            }));
        }

        let outcomes = join_all(
            plans
                .iter()
                .map(|(_, plan)| self.validator.validate(plan, &snapshot)),
        )
        .await;

        let all_plans: Vec<SplitPlan> = plans.iter().map(|(_, plan)| plan.clone()).collect();
        let all_outcomes: Vec<Option<ValidationOutcome>> =
            outcomes.iter().cloned().map(Some).collect();

        let routes: Vec<RouteResult> = plans
            .into_iter()
            .zip(outcomes)
            .filter_map(|((rank, plan), outcome)| match outcome {
                ValidationOutcome::Valid {
                    simulated_output, ..
                } => Some(self.result(&snapshot, plan, simulated_output, rank)),
                _ => None,
            })
            .sorted_by(|a, b| {
                b.expected_output
                    .cmp(&a.expected_output)
                    .then(a.rank.cmp(&b.rank))
            })
            .collect();

        if routes.is_empty() {
            return Err(self.exhausted(&all_plans, &all_outcomes));
        }
        Ok(routes)
    }
}

/// Rank of the best valid outcome once every better-ranked one is known to
/// have failed.
fn decided(outcomes: &[Option<ValidationOutcome>]) -> Option<usize> {
    for (rank, outcome) in outcomes.iter().enumerate() {
        match outcome {
            None => return None,
            Some(o) if o.is_valid() => return Some(rank),
            Some(_) => {}
        }
    }
    None
}
