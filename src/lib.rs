pub mod cache;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod external;
pub mod feed;
pub mod graph;
pub mod optimizer;
pub mod search;
pub mod splitter;
pub mod testing; // Testing infrastructure
pub mod types;
pub mod utils;
pub mod validator;

// Re-export the request path for embedding services
pub use cache::RouteCache;
pub use config::{load_config, RouterConfig};
pub use engine::{EngineStats, RouteRequest, RouteResult, RoutingEngine};
pub use error::{Failure, FailureKind, Result, RouteError};
pub use external::{ExecutionSimulator, GasPriceOracle, PoolSnapshotFeed, SimulationOutcome};
pub use feed::{spawn_feed_listener, FeedStats};
pub use graph::{GraphBuilder, GraphSnapshot};
pub use splitter::SplitPlan;
pub use types::{Amount, Asset, AssetId, Direction, VenueId, VenueState};
pub use utils::setup_logging;
