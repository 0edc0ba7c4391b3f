#![warn(missing_docs)]
//! Problem data model for the tilefuse scheduler.
//!
//! Defines tensors, operations, and the immutable [`Problem`] graph with its
//! derived producer/consumer indices, plus the JSON documents exchanged on
//! the command line ([`ProblemDoc`] in, [`PlanDoc`] out).

mod error;
mod graph;
mod io;

pub use error::GraphError;
pub use graph::{Op, OpId, OpKind, Problem, Tensor, TensorId};
pub use io::{PlanDoc, ProblemDoc};
