// src/config.rs
//! Router configuration.
//!
//! Every section has defaults, can be overridden from `ROUTER_*` environment
//! variables, or parsed from JSON.

use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, RouteError};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Graph builder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Venue states older than this are disabled
    pub freshness_threshold_secs: u64,
    /// Requests against an older snapshot fail with `StaleData`
    pub max_snapshot_age_secs: u64,
    /// Liquidity floor in USD; 0 keeps every venue
    pub min_liquidity_usd: f64,
    /// Trade size used to estimate the slippage term of the edge weight
    pub slippage_probe_usd: f64,
    pub default_gas_price_gwei: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            freshness_threshold_secs: 30,
            max_snapshot_age_secs: 120,
            min_liquidity_usd: 0.0,
            slippage_probe_usd: 1000.0,
            default_gas_price_gwei: 1.0,
        }
    }
}

impl GraphConfig {
    pub fn max_snapshot_age(&self) -> Duration {
        Duration::from_secs(self.max_snapshot_age_secs)
    }
}

/// Coefficients of the composite edge weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub fee: f64,
    pub liquidity: f64,
    pub gas: f64,
    pub slippage: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            fee: 1.0,
            liquidity: 0.05,
            gas: 0.01,
            slippage: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_hops: usize,
    /// Graphs with fewer nodes use Dijkstra, larger ones A*
    pub dijkstra_node_threshold: usize,
    /// How many K-shortest candidates feed the optimizer
    pub candidate_paths: usize,
    pub parallel_spur_search: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_hops: 4,
            dijkstra_node_threshold: 512,
            candidate_paths: 8,
            parallel_spur_search: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Below this price impact the best single path is used as is
    pub single_path_impact_threshold: f64,
    /// Number of chunks the waterfall allocates
    pub increments: u32,
    pub max_splits: usize,
    pub default_slippage_tolerance: f64,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            single_path_impact_threshold: 0.01,
            increments: 200,
            max_splits: 4,
            default_slippage_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Required venue depth as a multiple of the per-hop amount
    pub liquidity_margin: f64,
    pub output_deviation_tolerance: f64,
    pub simulation_timeout_ms: u64,
    pub max_concurrent_simulations: usize,
    pub max_fallbacks: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            liquidity_margin: 2.0,
            output_deviation_tolerance: 0.05,
            simulation_timeout_ms: 2000,
            max_concurrent_simulations: 4,
            max_fallbacks: 4,
        }
    }
}

impl ValidatorConfig {
    pub fn simulation_timeout(&self) -> Duration {
        Duration::from_millis(self.simulation_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    /// Significant bits kept when bucketing request amounts
    pub amount_bucket_bits: u32,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 2000,
            amount_bucket_bits: 4,
            max_entries: 4096,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Settings for the background pool snapshot listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub chain: String,
    pub poll_timeout_ms: u64,
    pub gas_timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            chain: "mainnet".to_string(),
            poll_timeout_ms: 1000,
            gas_timeout_ms: 500,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub graph: GraphConfig,
    pub weights: WeightConfig,
    pub search: SearchConfig,
    pub splitter: SplitterConfig,
    pub validator: ValidatorConfig,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
}

impl RouterConfig {
    /// Builds a config from `ROUTER_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = RouterConfig::default();
        RouterConfig {
            graph: GraphConfig {
                freshness_threshold_secs: env_or(
                    "ROUTER_FRESHNESS_THRESHOLD_SECS",
                    d.graph.freshness_threshold_secs,
                ),
                max_snapshot_age_secs: env_or(
                    "ROUTER_MAX_SNAPSHOT_AGE_SECS",
                    d.graph.max_snapshot_age_secs,
                ),
                min_liquidity_usd: env_or("ROUTER_MIN_LIQUIDITY_USD", d.graph.min_liquidity_usd),
                slippage_probe_usd: env_or("ROUTER_SLIPPAGE_PROBE_USD", d.graph.slippage_probe_usd),
                default_gas_price_gwei: env_or(
                    "ROUTER_DEFAULT_GAS_PRICE_GWEI",
                    d.graph.default_gas_price_gwei,
                ),
            },
            weights: WeightConfig {
                fee: env_or("ROUTER_WEIGHT_FEE", d.weights.fee),
                liquidity: env_or("ROUTER_WEIGHT_LIQUIDITY", d.weights.liquidity),
                gas: env_or("ROUTER_WEIGHT_GAS", d.weights.gas),
                slippage: env_or("ROUTER_WEIGHT_SLIPPAGE", d.weights.slippage),
            },
            search: SearchConfig {
                max_hops: env_or("ROUTER_MAX_HOPS", d.search.max_hops),
                dijkstra_node_threshold: env_or(
                    "ROUTER_DIJKSTRA_NODE_THRESHOLD",
                    d.search.dijkstra_node_threshold,
                ),
                candidate_paths: env_or("ROUTER_CANDIDATE_PATHS", d.search.candidate_paths),
                parallel_spur_search: env_or(
                    "ROUTER_PARALLEL_SPUR_SEARCH",
                    d.search.parallel_spur_search,
                ),
            },
            splitter: SplitterConfig {
                single_path_impact_threshold: env_or(
                    "ROUTER_SINGLE_PATH_IMPACT_THRESHOLD",
                    d.splitter.single_path_impact_threshold,
                ),
                increments: env_or("ROUTER_SPLIT_INCREMENTS", d.splitter.increments),
                max_splits: env_or("ROUTER_MAX_SPLITS", d.splitter.max_splits),
                default_slippage_tolerance: env_or(
                    "ROUTER_DEFAULT_SLIPPAGE_TOLERANCE",
                    d.splitter.default_slippage_tolerance,
                ),
            },
            validator: ValidatorConfig {
                liquidity_margin: env_or("ROUTER_LIQUIDITY_MARGIN", d.validator.liquidity_margin),
                output_deviation_tolerance: env_or(
                    "ROUTER_OUTPUT_DEVIATION_TOLERANCE",
                    d.validator.output_deviation_tolerance,
                ),
                simulation_timeout_ms: env_or(
                    "ROUTER_SIMULATION_TIMEOUT_MS",
                    d.validator.simulation_timeout_ms,
                ),
                max_concurrent_simulations: env_or(
                    "ROUTER_MAX_CONCURRENT_SIMULATIONS",
                    d.validator.max_concurrent_simulations,
                ),
                max_fallbacks: env_or("ROUTER_MAX_FALLBACKS", d.validator.max_fallbacks),
            },
            cache: CacheConfig {
                ttl_ms: env_or("ROUTER_CACHE_TTL_MS", d.cache.ttl_ms),
                amount_bucket_bits: env_or(
                    "ROUTER_CACHE_AMOUNT_BUCKET_BITS",
                    d.cache.amount_bucket_bits,
                ),
                max_entries: env_or("ROUTER_CACHE_MAX_ENTRIES", d.cache.max_entries),
            },
            feed: FeedConfig {
                chain: env::var("ROUTER_CHAIN").unwrap_or(d.feed.chain),
                poll_timeout_ms: env_or("ROUTER_FEED_POLL_TIMEOUT_MS", d.feed.poll_timeout_ms),
                gas_timeout_ms: env_or("ROUTER_GAS_TIMEOUT_MS", d.feed.gas_timeout_ms),
                retry_backoff_ms: env_or("ROUTER_FEED_RETRY_BACKOFF_MS", d.feed.retry_backoff_ms),
            },
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: RouterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (name, value) in [
            ("weights.fee", w.fee),
            ("weights.liquidity", w.liquidity),
            ("weights.gas", w.gas),
            ("weights.slippage", w.slippage),
            ("graph.min_liquidity_usd", self.graph.min_liquidity_usd),
            ("graph.slippage_probe_usd", self.graph.slippage_probe_usd),
            ("graph.default_gas_price_gwei", self.graph.default_gas_price_gwei),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(RouteError::Config(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.search.max_hops == 0 {
            return Err(RouteError::Config("search.max_hops must be at least 1".to_string()));
        }
        if self.search.candidate_paths == 0 {
            return Err(RouteError::Config(
                "search.candidate_paths must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            (
                "splitter.single_path_impact_threshold",
                self.splitter.single_path_impact_threshold,
            ),
            (
                "splitter.default_slippage_tolerance",
                self.splitter.default_slippage_tolerance,
            ),
            (
                "validator.output_deviation_tolerance",
                self.validator.output_deviation_tolerance,
            ),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(RouteError::Config(format!(
                    "{} must be within [0, 1), got {}",
                    name, value
                )));
            }
        }
        if self.splitter.increments == 0 || self.splitter.max_splits == 0 {
            return Err(RouteError::Config(
                "splitter.increments and splitter.max_splits must be positive".to_string(),
            ));
        }
        if !(self.validator.liquidity_margin >= 1.0) {
            return Err(RouteError::Config(format!(
                "validator.liquidity_margin must be >= 1, got {}",
                self.validator.liquidity_margin
            )));
        }
        if self.validator.max_concurrent_simulations == 0 {
            return Err(RouteError::Config(
                "validator.max_concurrent_simulations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_settings(&self) {
        info!("Router configuration:");
        info!(
            "  graph: freshness {}s, max snapshot age {}s, liquidity floor ${:.2}",
            self.graph.freshness_threshold_secs,
            self.graph.max_snapshot_age_secs,
            self.graph.min_liquidity_usd
        );
        info!(
            "  weights: fee {}, liquidity {}, gas {}, slippage {}",
            self.weights.fee, self.weights.liquidity, self.weights.gas, self.weights.slippage
        );
        info!(
            "  search: max hops {}, dijkstra below {} nodes, {} candidates",
            self.search.max_hops, self.search.dijkstra_node_threshold, self.search.candidate_paths
        );
        info!(
            "  splitter: impact threshold {}, {} increments, max {} splits",
            self.splitter.single_path_impact_threshold,
            self.splitter.increments,
            self.splitter.max_splits
        );
        info!(
            "  validator: margin {}x, deviation {}, timeout {}ms, {} fallbacks",
            self.validator.liquidity_margin,
            self.validator.output_deviation_tolerance,
            self.validator.simulation_timeout_ms,
            self.validator.max_fallbacks
        );
    }
}

/// Loads `.env` if present, then reads and validates the config from the
/// environment.
pub fn load_config() -> Result<RouterConfig> {
    dotenv::dotenv().ok(); // Load .env file if present, ignore errors

    let config = RouterConfig::from_env();
    config.validate()?;
    config.log_settings();
    Ok(config)
}
