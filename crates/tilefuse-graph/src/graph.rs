//! Tensor and operation tables with derived producer/consumer indices.
//!
//! A [`Problem`] is built once from the input document, validated, and then
//! shared immutably by every optimizer stage.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::GraphError;

/// A unique identifier for a tensor.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TensorId(pub u32);

impl TensorId {
    /// Index of this tensor in the problem's tensor table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A unique identifier for an operation.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct OpId(pub u32);

impl OpId {
    /// Index of this op in the problem's op table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// A 2-D logical tensor, measured in elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tensor {
    /// Width in elements.
    pub w: i64,
    /// Height in elements.
    pub h: i64,
}

impl Tensor {
    /// Total number of elements.
    pub fn elems(self) -> i64 {
        self.w * self.h
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// The kind of a graph operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Matrix multiplication: inputs are (LHS, RHS), position-significant.
    MatMul,
    /// Element-wise op over any number of same-shape inputs.
    Pointwise,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MatMul => "MatMul",
            Self::Pointwise => "Pointwise",
        })
    }
}

/// A single operation in the compute graph.
#[derive(Clone, Debug)]
pub struct Op {
    /// Operation kind.
    pub kind: OpKind,
    /// Input tensors. For a matmul, position 0 is the LHS and 1 the RHS.
    pub ins: Vec<TensorId>,
    /// Output tensors (exactly one).
    pub outs: Vec<TensorId>,
    /// Compute time for one native-granularity tile.
    pub base_cost: i64,
}

/// An immutable tiling problem: the op DAG plus the memory-hierarchy scalars.
///
/// Construction derives the producer/consumer indices and validates the
/// structural invariants (single producer per tensor, matmul shape
/// agreement, acyclicity). After that the problem never changes.
#[derive(Clone, Debug)]
pub struct Problem {
    tensors: Vec<Tensor>,
    ops: Vec<Op>,
    producer: Vec<Option<OpId>>,
    consumers: Vec<Vec<OpId>>,
    graph_ins: BTreeSet<TensorId>,
    graph_outs: BTreeSet<TensorId>,
    fast_cap: i64,
    slow_bw: i64,
    nat_w: i64,
    nat_h: i64,
}

impl Problem {
    /// Build a problem from its tables and hardware scalars.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] when any structural invariant is violated;
    /// see the variants for the full list.
    pub fn new(
        tensors: Vec<Tensor>,
        ops: Vec<Op>,
        fast_cap: i64,
        slow_bw: i64,
        native_granularity: (i64, i64),
    ) -> Result<Self, GraphError> {
        let (nat_w, nat_h) = native_granularity;
        if slow_bw <= 0 {
            return Err(GraphError::BandwidthNotPositive(slow_bw));
        }
        if nat_w <= 0 || nat_h <= 0 {
            return Err(GraphError::NativeGranularityNotPositive(nat_w, nat_h));
        }

        let nt = tensors.len();
        let mut producer: Vec<Option<OpId>> = vec![None; nt];
        let mut consumers: Vec<Vec<OpId>> = vec![Vec::new(); nt];

        for (i, op) in ops.iter().enumerate() {
            let oi = OpId(i as u32);
            for &t in op.ins.iter().chain(op.outs.iter()) {
                if t.index() >= nt {
                    return Err(GraphError::TensorOutOfBounds {
                        op: oi.0,
                        tensor: t.0,
                        count: nt,
                    });
                }
            }
            if op.outs.len() != 1 {
                return Err(GraphError::OutputArity {
                    op: oi.0,
                    found: op.outs.len(),
                });
            }
            for &t in &op.outs {
                if let Some(first) = producer[t.index()] {
                    return Err(GraphError::DuplicateProducer {
                        tensor: t.0,
                        first: first.0,
                        second: oi.0,
                    });
                }
                producer[t.index()] = Some(oi);
            }
            for &t in &op.ins {
                consumers[t.index()].push(oi);
            }
        }

        // Shape checks need the full tensor table, so they run after the
        // bounds pass above.
        for (i, op) in ops.iter().enumerate() {
            let oi = i as u32;
            let out = tensors[op.outs[0].index()];
            match op.kind {
                OpKind::MatMul => {
                    if op.ins.len() != 2 {
                        return Err(GraphError::MatMulArity {
                            op: oi,
                            found: op.ins.len(),
                        });
                    }
                    let lhs = tensors[op.ins[0].index()];
                    let rhs = tensors[op.ins[1].index()];
                    if lhs.w != rhs.h {
                        return Err(GraphError::ReductionMismatch {
                            op: oi,
                            lhs_w: lhs.w,
                            rhs_h: rhs.h,
                        });
                    }
                    if out.w != rhs.w || out.h != lhs.h {
                        return Err(GraphError::OutputShape {
                            op: oi,
                            want_w: rhs.w,
                            want_h: lhs.h,
                            found_w: out.w,
                            found_h: out.h,
                        });
                    }
                }
                OpKind::Pointwise => {
                    if op.ins.is_empty() {
                        return Err(GraphError::PointwiseArity { op: oi });
                    }
                    let shape = tensors[op.ins[0].index()];
                    let same = op.ins.iter().all(|&t| tensors[t.index()] == shape);
                    if !same || out != shape {
                        return Err(GraphError::PointwiseShape { op: oi });
                    }
                }
            }
        }

        let mut graph_ins = BTreeSet::new();
        let mut graph_outs = BTreeSet::new();
        for i in 0..nt {
            let t = TensorId(i as u32);
            if producer[i].is_none() {
                graph_ins.insert(t);
            }
            if consumers[i].is_empty() {
                graph_outs.insert(t);
            }
        }

        let problem = Self {
            tensors,
            ops,
            producer,
            consumers,
            graph_ins,
            graph_outs,
            fast_cap,
            slow_bw,
            nat_w,
            nat_h,
        };
        problem.check_acyclic()?;
        Ok(problem)
    }

    /// Kahn's algorithm over op→op edges; errors out when a cycle remains.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let n = self.ops.len();
        let mut succ: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, op) in self.ops.iter().enumerate() {
            for &t in &op.outs {
                for &c in self.consumers(t) {
                    if c.index() != i {
                        succ[i].insert(c.index());
                    }
                }
            }
        }
        let mut indeg = vec![0usize; n];
        for outs in &succ {
            for &j in outs {
                indeg[j] += 1;
            }
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
        let mut visited = 0usize;
        while let Some(u) = queue.pop_front() {
            visited += 1;
            for &v in &succ[u] {
                indeg[v] -= 1;
                if indeg[v] == 0 {
                    queue.push_back(v);
                }
            }
        }
        if visited != n {
            return Err(GraphError::CyclicGraph { visited, total: n });
        }
        Ok(())
    }

    /// Number of tensors.
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Number of ops.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Look up a tensor's shape.
    pub fn tensor(&self, t: TensorId) -> Tensor {
        self.tensors[t.index()]
    }

    /// Look up an op.
    pub fn op(&self, o: OpId) -> &Op {
        &self.ops[o.index()]
    }

    /// All ops in id order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// All op ids in order.
    pub fn op_ids(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.ops.len() as u32).map(OpId)
    }

    /// The op producing a tensor, or `None` for a graph input.
    pub fn producer(&self, t: TensorId) -> Option<OpId> {
        self.producer[t.index()]
    }

    /// The ops consuming a tensor.
    pub fn consumers(&self, t: TensorId) -> &[OpId] {
        &self.consumers[t.index()]
    }

    /// Tensors with no producer (graph inputs).
    pub fn graph_ins(&self) -> &BTreeSet<TensorId> {
        &self.graph_ins
    }

    /// Tensors with no consumer (graph outputs).
    pub fn graph_outs(&self) -> &BTreeSet<TensorId> {
        &self.graph_outs
    }

    /// Whether a tensor is a graph output.
    pub fn is_graph_out(&self, t: TensorId) -> bool {
        self.graph_outs.contains(&t)
    }

    /// Fast-memory capacity in elements.
    pub fn fast_cap(&self) -> i64 {
        self.fast_cap
    }

    /// Slow-memory bandwidth in elements per time unit.
    pub fn slow_bw(&self) -> i64 {
        self.slow_bw
    }

    /// Native tile width.
    pub fn nat_w(&self) -> i64 {
        self.nat_w
    }

    /// Native tile height.
    pub fn nat_h(&self) -> i64 {
        self.nat_h
    }

    /// Reduction extent `K` of a matmul (= LHS width = RHS height).
    ///
    /// Only meaningful for [`OpKind::MatMul`] ops.
    pub fn reduction_extent(&self, o: OpId) -> i64 {
        let op = &self.ops[o.index()];
        debug_assert_eq!(op.kind, OpKind::MatMul);
        self.tensors[op.ins[0].index()].w
    }
}
