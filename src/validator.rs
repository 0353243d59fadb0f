// src/validator.rs
//! Path Validator / Simulator
//!
//! Re-checks a finished plan against the newest graph snapshot and dry-runs
//! every leg through the [`ExecutionSimulator`]. Checks run in order:
//! freshness, connectivity, acyclicity, liquidity margin, dry-run success and
//! output deviation. The first failing check decides the outcome. A leg
//! whose simulation misses its deadline marks its venues unavailable in the
//! builder, so the next published snapshot routes around them.

use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::{GraphConfig, ValidatorConfig};
use crate::external::ExecutionSimulator;
use crate::graph::{GraphBuilder, GraphSnapshot};
use crate::splitter::{SplitLeg, SplitPlan};
use crate::types::{Amount, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RevertKind {
    Disconnected,
    Cyclic,
    Liquidity,
    Simulation,
    Timeout,
    Deviation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revert {
    pub kind: RevertKind,
    pub reason: String,
    pub venue: Option<VenueId>,
    /// Hop within its leg, for structural reverts
    pub hop: Option<usize>,
    /// Input the failing hop was asked to carry
    pub amount_in: Amount,
}

impl Revert {
    pub(crate) fn new(kind: RevertKind, reason: impl Into<String>, venue: Option<VenueId>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            venue,
            hop: None,
            amount_in: 0,
        }
    }

    pub(crate) fn at_hop(mut self, hop: usize, amount_in: Amount) -> Self {
        self.hop = Some(hop);
        self.amount_in = amount_in;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationOutcome {
    Valid { simulated_output: Amount, gas_used: u64 },
    Reverted(Revert),
    Stale,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }
}

pub struct PathValidator {
    config: ValidatorConfig,
    graph_config: GraphConfig,
    builder: Arc<GraphBuilder>,
    simulator: Arc<dyn ExecutionSimulator>,
    permits: Arc<Semaphore>,
}

impl PathValidator {
    pub fn new(
        config: ValidatorConfig,
        builder: Arc<GraphBuilder>,
        simulator: Arc<dyn ExecutionSimulator>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_simulations.max(1)));
        let graph_config = builder.graph_config().clone();
        Self {
            config,
            graph_config,
            builder,
            simulator,
            permits,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates `plan`, which was computed on `pinned`, against the
    /// builder's current snapshot.
    pub async fn validate(&self, plan: &SplitPlan, pinned: &GraphSnapshot) -> ValidationOutcome {
        let current = self.builder.current();

        if let Some(outcome) = self.check_freshness(plan, pinned, &current) {
            return outcome;
        }
        if let Some(revert) = self.check_structure(plan, &current) {
            debug!("Plan failed static checks: {}", revert.reason);
            return ValidationOutcome::Reverted(revert);
        }
        self.dry_run(plan).await
    }

    fn check_freshness(
        &self,
        plan: &SplitPlan,
        pinned: &GraphSnapshot,
        current: &GraphSnapshot,
    ) -> Option<ValidationOutcome> {
        let age = current.age(chrono::Utc::now());
        if age > self.graph_config.max_snapshot_age() {
            debug!("Current snapshot v{} is {:?} old", current.version(), age);
            return Some(ValidationOutcome::Stale);
        }
        if plan.snapshot_version < current.version() {
            let changed = plan.venues().into_iter().find(|id| {
                match (pinned.venue(id), current.venue(id)) {
                    (Some(before), Some(now)) => {
                        !Arc::ptr_eq(before, now) && before.as_ref() != now.as_ref()
                    }
                    _ => true,
                }
            });
            if let Some(venue) = changed {
                debug!(
                    "Venue {} changed between v{} and v{}",
                    venue,
                    plan.snapshot_version,
                    current.version()
                );
                return Some(ValidationOutcome::Stale);
            }
        }
        None
    }

    fn check_structure(&self, plan: &SplitPlan, current: &GraphSnapshot) -> Option<Revert> {
        let mut depths = Vec::new();
        for (index, hop) in plan.legs.iter().flat_map(|leg| leg.route.hops.iter().enumerate()) {
            let edge = current
                .edge_for(&hop.venue, &hop.from)
                .map(|idx| current.edge(idx))
                .filter(|edge| edge.is_enabled() && current.asset(edge.to).id == hop.to);
            match edge {
                Some(edge) => depths.push((index, hop, edge.output_depth())),
                None => {
                    return Some(
                        Revert::new(
                            RevertKind::Disconnected,
                            format!("{} no longer connects {} -> {}", hop.venue, hop.from, hop.to),
                            Some(hop.venue.clone()),
                        )
                        .at_hop(index, hop.amount_in),
                    )
                }
            }
        }

        if let Some(leg) = plan.legs.iter().find(|leg| !leg.route.path.is_acyclic()) {
            return Some(Revert::new(
                RevertKind::Cyclic,
                format!("path {:?} revisits an asset", leg.route.path.assets),
                None,
            ));
        }

        for (index, hop, depth) in depths {
            let required = self.config.liquidity_margin * hop.amount_out as f64;
            if depth < required {
                return Some(
                    Revert::new(
                        RevertKind::Liquidity,
                        format!(
                            "{} depth {:.0} below {:.1}x margin on {}",
                            hop.venue, depth, self.config.liquidity_margin, hop.amount_out
                        ),
                        Some(hop.venue.clone()),
                    )
                    .at_hop(index, hop.amount_in),
                );
            }
        }
        None
    }

    async fn dry_run(&self, plan: &SplitPlan) -> ValidationOutcome {
        let deadline = self.config.simulation_timeout();
        let runs = plan.legs.iter().map(|leg| async move {
            let _permit = match self.permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Err(Revert::new(RevertKind::Simulation, "simulator closed", None));
                }
            };
            match timeout(deadline, self.simulator.simulate(&leg.route.path, leg.amount_in())).await {
                Err(_) => {
                    // Degraded until the feed delivers fresh state for them.
                    for venue in &leg.route.path.venues {
                        self.builder.mark_unavailable(venue);
                    }
                    Err(Revert::new(RevertKind::Timeout, "timeout", None))
                }
                Ok(Err(e)) => {
                    warn!("Simulation error on {:?}: {}", leg.route.path.venues, e);
                    Err(Revert::new(RevertKind::Simulation, e.to_string(), None))
                }
                Ok(Ok(outcome)) if !outcome.success => Err(Revert::new(
                    RevertKind::Simulation,
                    outcome
                        .revert_reason
                        .unwrap_or_else(|| "reverted".to_string()),
                    outcome.failed_venue,
                )),
                Ok(Ok(outcome)) => self
                    .check_deviation(leg, outcome.output)
                    .map(|()| (outcome.output, outcome.gas_used)),
            }
        });

        let mut simulated_output: Amount = 0;
        let mut gas_used = 0u64;
        for result in join_all(runs).await {
            match result {
                Ok((output, gas)) => {
                    simulated_output += output;
                    gas_used = gas_used.saturating_add(gas);
                }
                Err(revert) => return ValidationOutcome::Reverted(revert),
            }
        }
        ValidationOutcome::Valid {
            simulated_output,
            gas_used,
        }
    }

    fn check_deviation(&self, leg: &SplitLeg, simulated: Amount) -> Result<(), Revert> {
        let expected = leg.expected_output() as f64;
        if expected <= 0.0 {
            return Ok(());
        }
        let deviation = (simulated as f64 - expected).abs() / expected;
        if deviation > self.config.output_deviation_tolerance {
            return Err(Revert::new(
                RevertKind::Deviation,
                format!(
                    "simulated {} deviates {:.2}% from expected {}",
                    simulated,
                    deviation * 100.0,
                    leg.expected_output()
                ),
                None,
            ));
        }
        Ok(())
    }
}
