#![warn(missing_docs)]
//! Fusion/tiling co-optimizer for tiled tensor compute graphs.
//!
//! Partitions the op DAG into fused subgraphs, chooses a power-of-two tile
//! granularity per subgraph under the fast-memory capacity bound, orders the
//! subgraphs topologically, assigns zig-zag traversals to matmul-bearing
//! subgraphs, packs cross-subgraph retention, and emits a [`PlanDoc`]
//! with per-subgraph latency predictions.
//!
//! [`PlanDoc`]: tilefuse_graph::PlanDoc

pub mod analyze;
pub mod cost;
pub mod fusion;
pub mod gran;
pub mod retention;
pub mod schedule;

mod error;
mod plan;

pub use error::PlanError;
pub use fusion::{Fuser, Subgraph};
pub use plan::optimize;
