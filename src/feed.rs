// src/feed.rs
//! Background listener that keeps the graph current.
//!
//! Polls a [`PoolSnapshotFeed`] under a deadline, ingests every venue state
//! of a batch and publishes one snapshot per batch. The gas price is
//! refreshed from the oracle before each poll; a slow or failing oracle
//! keeps the previous price.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::FeedConfig;
use crate::external::{GasPriceOracle, PoolSnapshotFeed};
use crate::graph::GraphBuilder;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedStats {
    pub batches: u64,
    pub venues_ingested: u64,
    pub venues_rejected: u64,
    pub publishes: u64,
    pub poll_timeouts: u64,
    pub poll_errors: u64,
    pub gas_updates: u64,
    pub gas_failures: u64,
}

/// Runs the listener on the tokio runtime. The task ends when the feed
/// reports end of stream; aborting the handle stops it early.
pub fn spawn_feed_listener(
    builder: Arc<GraphBuilder>,
    feed: Arc<dyn PoolSnapshotFeed>,
    oracle: Option<Arc<dyn GasPriceOracle>>,
    config: FeedConfig,
) -> JoinHandle<FeedStats> {
    tokio::spawn(run_feed_listener(builder, feed, oracle, config))
}

pub async fn run_feed_listener(
    builder: Arc<GraphBuilder>,
    feed: Arc<dyn PoolSnapshotFeed>,
    oracle: Option<Arc<dyn GasPriceOracle>>,
    config: FeedConfig,
) -> FeedStats {
    info!(
        "Starting feed listener '{}' on {} (poll timeout {}ms)",
        feed.feed_name(),
        config.chain,
        config.poll_timeout_ms
    );
    let poll_deadline = Duration::from_millis(config.poll_timeout_ms);
    let backoff = Duration::from_millis(config.retry_backoff_ms);
    let mut stats = FeedStats::default();

    loop {
        if let Some(oracle) = &oracle {
            refresh_gas_price(&builder, oracle.as_ref(), &config, &mut stats).await;
        }

        let batch = match timeout(poll_deadline, feed.next_batch()).await {
            Err(_) => {
                stats.poll_timeouts += 1;
                warn!("Feed '{}' missed its {}ms deadline", feed.feed_name(), config.poll_timeout_ms);
                sleep(backoff).await;
                continue;
            }
            Ok(Err(e)) => {
                stats.poll_errors += 1;
                error!("Feed '{}' poll failed: {}", feed.feed_name(), e);
                sleep(backoff).await;
                continue;
            }
            Ok(Ok(None)) => {
                info!("Feed '{}' ended after {} batches", feed.feed_name(), stats.batches);
                break;
            }
            Ok(Ok(Some(batch))) => batch,
        };

        stats.batches += 1;
        for state in batch {
            let id = state.id.clone();
            match builder.ingest(state) {
                Ok(()) => stats.venues_ingested += 1,
                Err(e) => {
                    stats.venues_rejected += 1;
                    warn!("Rejected update for venue {}: {}", id, e);
                }
            }
        }

        match builder.publish() {
            Ok(snapshot) => {
                stats.publishes += 1;
                debug!("Published graph v{} from feed batch {}", snapshot.version(), stats.batches);
            }
            Err(e) => error!("Publishing graph failed: {}", e),
        }
    }

    stats
}

async fn refresh_gas_price(
    builder: &GraphBuilder,
    oracle: &dyn GasPriceOracle,
    config: &FeedConfig,
    stats: &mut FeedStats,
) {
    let deadline = Duration::from_millis(config.gas_timeout_ms);
    match timeout(deadline, oracle.current_price(&config.chain)).await {
        Ok(Ok(gwei)) => {
            if builder.set_gas_price(gwei) {
                stats.gas_updates += 1;
                debug!("Gas price for {} now {:.3} gwei", config.chain, gwei);
            }
        }
        Ok(Err(e)) => {
            stats.gas_failures += 1;
            warn!("Gas oracle failed, keeping {:.3} gwei: {}", builder.gas_price_gwei(), e);
        }
        Err(_) => {
            stats.gas_failures += 1;
            warn!(
                "Gas oracle missed its {}ms deadline, keeping {:.3} gwei",
                config.gas_timeout_ms,
                builder.gas_price_gwei()
            );
        }
    }
}
