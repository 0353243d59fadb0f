// src/types.rs
//! Core identifiers and venue data shared by every routing stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::curve::Curve;

/// Token amounts in base units.
pub type Amount = u128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VenueId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A tradeable asset (graph node)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    pub decimals: u8,
    /// USD per whole unit, when known
    pub reference_price: Option<f64>,
    /// Aggregate USD liquidity of enabled venues touching this asset,
    /// recomputed on every publish
    pub liquidity_score: f64,
}

impl Asset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            id: AssetId::new(id),
            symbol: symbol.into(),
            decimals,
            reference_price: None,
            liquidity_score: 0.0,
        }
    }

    pub fn with_reference_price(mut self, price: f64) -> Self {
        self.reference_price = Some(price);
        self
    }

    /// Placeholder for assets first seen through a venue update
    pub fn unlisted(id: &AssetId) -> Self {
        Self::new(id.as_str(), id.as_str(), 0)
    }
}

/// Direction of a trade through a two-sided venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    AToB,
    BToA,
}

/// Latest known state of one venue, as delivered by a pool snapshot feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueState {
    pub id: VenueId,
    pub asset_a: AssetId,
    pub asset_b: AssetId,
    pub curve: Curve,
    /// Fee rate as a fraction (0.003 = 30 bps)
    pub fee: f64,
    pub liquidity_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl VenueState {
    /// (input asset, output asset) for a direction
    pub fn endpoints(&self, direction: Direction) -> (&AssetId, &AssetId) {
        match direction {
            Direction::AToB => (&self.asset_a, &self.asset_b),
            Direction::BToA => (&self.asset_b, &self.asset_a),
        }
    }
}
