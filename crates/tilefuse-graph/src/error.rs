//! Error types for problem construction.

/// Errors detected while building or validating a [`Problem`](crate::Problem).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Two parallel document columns disagree on length.
    #[error("`{field}` has {found} entries, expected {expected}")]
    LengthMismatch {
        /// Name of the offending document key.
        field: &'static str,
        /// Number of entries the other columns imply.
        expected: usize,
        /// Number of entries actually present.
        found: usize,
    },

    /// An op references a tensor id outside the tensor table.
    #[error("op {op} references tensor {tensor}, but only {count} tensors exist")]
    TensorOutOfBounds {
        /// The referencing op.
        op: u32,
        /// The out-of-bounds tensor id.
        tensor: u32,
        /// Size of the tensor table.
        count: usize,
    },

    /// Two ops produce the same tensor.
    #[error("tensor {tensor} is produced by both op {first} and op {second}")]
    DuplicateProducer {
        /// The doubly-produced tensor.
        tensor: u32,
        /// The op registered first.
        first: u32,
        /// The conflicting op.
        second: u32,
    },

    /// A matmul does not have exactly two inputs.
    #[error("matmul op {op} has {found} inputs, expected exactly 2 (LHS, RHS)")]
    MatMulArity {
        /// The offending op.
        op: u32,
        /// Number of inputs found.
        found: usize,
    },

    /// A pointwise op has no inputs.
    #[error("pointwise op {op} has no inputs")]
    PointwiseArity {
        /// The offending op.
        op: u32,
    },

    /// An op does not have exactly one output.
    #[error("op {op} has {found} outputs, expected exactly 1")]
    OutputArity {
        /// The offending op.
        op: u32,
        /// Number of outputs found.
        found: usize,
    },

    /// A matmul's reduction extents disagree (LHS width vs RHS height).
    #[error("matmul op {op} reduction mismatch: LHS width {lhs_w} != RHS height {rhs_h}")]
    ReductionMismatch {
        /// The offending op.
        op: u32,
        /// Width of the left operand.
        lhs_w: i64,
        /// Height of the right operand.
        rhs_h: i64,
    },

    /// An op's output tensor has the wrong shape.
    #[error("op {op} output shape is {found_w}x{found_h}, expected {want_w}x{want_h}")]
    OutputShape {
        /// The offending op.
        op: u32,
        /// Expected output width.
        want_w: i64,
        /// Expected output height.
        want_h: i64,
        /// Actual output width.
        found_w: i64,
        /// Actual output height.
        found_h: i64,
    },

    /// A pointwise op's inputs are not all the same shape.
    #[error("pointwise op {op} input shapes differ")]
    PointwiseShape {
        /// The offending op.
        op: u32,
    },

    /// The slow-memory bandwidth is zero or negative.
    #[error("slow memory bandwidth must be positive, got {0}")]
    BandwidthNotPositive(i64),

    /// The native tile granularity is zero or negative.
    #[error("native granularity must be positive, got [{0}, {1}]")]
    NativeGranularityNotPositive(i64, i64),

    /// The op graph is not a DAG.
    #[error("op graph contains a cycle ({visited} of {total} ops reachable)")]
    CyclicGraph {
        /// Ops reachable from the graph sources.
        visited: usize,
        /// Total number of ops.
        total: usize,
    },
}
