// src/error.rs
//! Error types for the routing engine.
//!
//! `RouteError` is what callers of the engine see. Curve math has its own
//! smaller `QuoteError` (see `crate::curve`) which gets hop and venue
//! context attached when it crosses into the optimizer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Amount, AssetId, VenueId};

#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// Source and destination are not connected within the hop limit
    #[error("No path found from {source_asset} to {dest_asset} within {max_hops} hops")]
    NoPathFound {
        source_asset: AssetId,
        dest_asset: AssetId,
        max_hops: usize,
    },

    /// No feasible allocation meets depth or the safety margin
    #[error("Insufficient liquidity at hop {hop} (venue {venue}, last good amount {last_good_amount}): {message}")]
    InsufficientLiquidity {
        venue: VenueId,
        hop: usize,
        last_good_amount: Amount,
        message: String,
    },

    /// Best achievable output violates the caller's tolerance
    #[error("Slippage exceeded: expected {expected_output}, minimum acceptable {minimum_output} (tolerance {tolerance})")]
    SlippageExceeded {
        expected_output: Amount,
        minimum_output: Amount,
        tolerance: f64,
    },

    /// Dry run failed for every candidate plan
    #[error("Simulation reverted for all {attempts} candidate plans (venue {venue}): {last_reason}")]
    SimulationReverted {
        attempts: usize,
        venue: VenueId,
        last_reason: String,
    },

    /// Graph snapshot is older than allowed
    #[error("Stale graph data: snapshot age {age_ms}ms exceeds {max_age_ms}ms")]
    StaleData { age_ms: u64, max_age_ms: u64 },

    /// An external dependency missed its deadline
    #[error("Timeout waiting for {dependency} after {deadline_ms}ms")]
    Timeout { dependency: String, deadline_ms: u64 },

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Graph integrity check failed and could not be repaired by a rebuild
    #[error("Graph integrity error: {0}")]
    Integrity(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for RouteError {
    fn from(err: serde_json::Error) -> Self {
        RouteError::Config(format!("JSON deserialization error: {}", err))
    }
}

/// Failure kinds exposed to collaborators alongside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    NoPathFound,
    InsufficientLiquidity,
    SlippageExceeded,
    SimulationReverted,
    StaleData,
    Timeout,
    InvalidRequest,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NoPathFound => "NoPathFound",
            FailureKind::InsufficientLiquidity => "InsufficientLiquidity",
            FailureKind::SlippageExceeded => "SlippageExceeded",
            FailureKind::SimulationReverted => "SimulationReverted",
            FailureKind::StaleData => "StaleData",
            FailureKind::Timeout => "Timeout",
            FailureKind::InvalidRequest => "InvalidRequest",
            FailureKind::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

/// `Failure{kind, message}` as handed to a quote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Error categories for metrics and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Routing,
    Liquidity,
    Pricing,
    Execution,
    Data,
    Network,
    Input,
    Configuration,
}

impl RouteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RouteError::NoPathFound { .. } => FailureKind::NoPathFound,
            RouteError::InsufficientLiquidity { .. } => FailureKind::InsufficientLiquidity,
            RouteError::SlippageExceeded { .. } => FailureKind::SlippageExceeded,
            RouteError::SimulationReverted { .. } => FailureKind::SimulationReverted,
            RouteError::StaleData { .. } => FailureKind::StaleData,
            RouteError::Timeout { .. } => FailureKind::Timeout,
            RouteError::UnknownAsset(_) | RouteError::InvalidRequest(_) => {
                FailureKind::InvalidRequest
            }
            RouteError::Integrity(_) | RouteError::Config(_) => FailureKind::Internal,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Whether retrying the same request later can succeed without the
    /// caller changing anything
    pub fn is_recoverable(&self) -> bool {
        match self {
            RouteError::NoPathFound { .. } => true, // new venues may appear
            RouteError::InsufficientLiquidity { .. } => true, // reduce amount or wait
            RouteError::SlippageExceeded { .. } => true, // relax tolerance or wait
            RouteError::SimulationReverted { .. } => true,
            RouteError::StaleData { .. } => true, // next feed batch refreshes it
            RouteError::Timeout { .. } => true,
            RouteError::UnknownAsset(_) => false,
            RouteError::InvalidRequest(_) => false,
            RouteError::Integrity(_) => false,
            RouteError::Config(_) => false,
        }
    }

    /// Categorizes error for metrics and monitoring
    pub fn categorize(&self) -> ErrorCategory {
        match self {
            RouteError::NoPathFound { .. } => ErrorCategory::Routing,
            RouteError::InsufficientLiquidity { .. } => ErrorCategory::Liquidity,
            RouteError::SlippageExceeded { .. } => ErrorCategory::Pricing,
            RouteError::SimulationReverted { .. } => ErrorCategory::Execution,
            RouteError::StaleData { .. } | RouteError::Integrity(_) => ErrorCategory::Data,
            RouteError::Timeout { .. } => ErrorCategory::Network,
            RouteError::UnknownAsset(_) | RouteError::InvalidRequest(_) => ErrorCategory::Input,
            RouteError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        let err = RouteError::NoPathFound {
            source_asset: AssetId::new("X"),
            dest_asset: AssetId::new("Z"),
            max_hops: 3,
        };
        let failure = err.to_failure();
        assert_eq!(failure.kind, FailureKind::NoPathFound);
        assert!(failure.message.contains("X"));
        assert!(failure.message.contains("3 hops"));

        assert_eq!(
            RouteError::UnknownAsset(AssetId::new("Q")).kind(),
            FailureKind::InvalidRequest
        );
        assert_eq!(
            RouteError::Config("bad".to_string()).kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_error_classification() {
        let liquidity = RouteError::InsufficientLiquidity {
            venue: VenueId::new("pool-1"),
            hop: 1,
            last_good_amount: 500,
            message: "exceeds depth".to_string(),
        };
        assert!(liquidity.is_recoverable());
        assert_eq!(liquidity.categorize(), ErrorCategory::Liquidity);
        assert!(liquidity.to_string().contains("pool-1"));
        assert!(liquidity.to_string().contains("500"));

        let invalid = RouteError::InvalidRequest("amount is zero".to_string());
        assert!(!invalid.is_recoverable());
        assert_eq!(invalid.categorize(), ErrorCategory::Input);
    }
}
