// src/graph/mod.rs
//! Weighted asset/venue graph: builder, immutable snapshots and edge weights.

pub mod builder;
pub mod snapshot;
pub mod weights;

pub use builder::GraphBuilder;
pub use snapshot::{Edge, EdgeIndex, EdgeStatus, GraphSnapshot, GraphStats, Node, NodeIndex};
