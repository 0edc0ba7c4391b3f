//! JSON documents exchanged on the command line.
//!
//! [`ProblemDoc`] is the input contract (parallel per-tensor and per-op
//! columns plus the hardware scalars); [`PlanDoc`] is the emitted schedule,
//! one entry per scheduled subgraph in every column.

use serde::{Deserialize, Serialize};

use crate::{GraphError, Op, OpKind, Problem, Tensor, TensorId};

/// The JSON-shaped problem document accepted by the solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemDoc {
    /// Tensor widths, indexed by tensor id.
    pub widths: Vec<i64>,
    /// Tensor heights, indexed by tensor id.
    pub heights: Vec<i64>,
    /// Op kinds, indexed by op id.
    pub op_types: Vec<OpKind>,
    /// Input tensor ids per op.
    pub inputs: Vec<Vec<u32>>,
    /// Output tensor ids per op.
    pub outputs: Vec<Vec<u32>>,
    /// Base compute cost per op (one native-granularity tile).
    pub base_costs: Vec<i64>,
    /// Fast-memory capacity in elements.
    pub fast_memory_capacity: i64,
    /// Slow-memory bandwidth in elements per time unit.
    pub slow_memory_bandwidth: i64,
    /// Native hardware tile `[width, height]`.
    pub native_granularity: [i64; 2],
}

impl ProblemDoc {
    /// Validate the document and build the immutable [`Problem`].
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for column length mismatches or any
    /// structural invariant violation (see [`Problem::new`]).
    pub fn into_problem(self) -> Result<Problem, GraphError> {
        let nt = self.widths.len();
        if self.heights.len() != nt {
            return Err(GraphError::LengthMismatch {
                field: "heights",
                expected: nt,
                found: self.heights.len(),
            });
        }
        let no = self.op_types.len();
        if self.inputs.len() != no {
            return Err(GraphError::LengthMismatch {
                field: "inputs",
                expected: no,
                found: self.inputs.len(),
            });
        }
        if self.outputs.len() != no {
            return Err(GraphError::LengthMismatch {
                field: "outputs",
                expected: no,
                found: self.outputs.len(),
            });
        }
        if self.base_costs.len() != no {
            return Err(GraphError::LengthMismatch {
                field: "base_costs",
                expected: no,
                found: self.base_costs.len(),
            });
        }

        let tensors = self
            .widths
            .iter()
            .zip(&self.heights)
            .map(|(&w, &h)| Tensor { w, h })
            .collect();
        let ops = self
            .op_types
            .iter()
            .zip(self.inputs)
            .zip(self.outputs)
            .zip(&self.base_costs)
            .map(|(((&kind, ins), outs), &base_cost)| Op {
                kind,
                ins: ins.into_iter().map(TensorId).collect(),
                outs: outs.into_iter().map(TensorId).collect(),
                base_cost,
            })
            .collect();

        Problem::new(
            tensors,
            ops,
            self.fast_memory_capacity,
            self.slow_memory_bandwidth,
            (self.native_granularity[0], self.native_granularity[1]),
        )
    }
}

/// The JSON plan document emitted by the solver and replayed by the verifier.
///
/// Every column has one entry per scheduled subgraph, in schedule order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanDoc {
    /// Op ids per subgraph, sorted ascending.
    pub subgraphs: Vec<Vec<u32>>,
    /// Chosen `[w, h, k]` granularity per subgraph.
    pub granularities: Vec<[i64; 3]>,
    /// Tensors each subgraph keeps resident for its successor.
    pub tensors_to_retain: Vec<Vec<u32>>,
    /// Explicit tile orders; `None` means raster.
    pub traversal_orders: Vec<Option<Vec<u64>>>,
    /// Predicted latency per subgraph under its traversal and retention.
    pub subgraph_latencies: Vec<f64>,
}

impl PlanDoc {
    /// Number of scheduled subgraphs.
    pub fn subgraph_count(&self) -> usize {
        self.subgraphs.len()
    }

    /// Sum of the per-subgraph latencies.
    pub fn total_latency(&self) -> f64 {
        self.subgraph_latencies.iter().sum()
    }
}
