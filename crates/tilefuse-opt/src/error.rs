//! Error types for the optimizer.

/// Errors produced while planning.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A single op does not fit in fast memory at any tile granularity;
    /// the problem is unschedulable under this model.
    #[error("op {op} does not fit in fast memory at any tile granularity (capacity {capacity})")]
    InfeasibleOp {
        /// The op that cannot be scheduled.
        op: u32,
        /// The fast-memory capacity that was exceeded.
        capacity: i64,
    },
}
