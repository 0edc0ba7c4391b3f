//! Subgraph boundary classification.
//!
//! For a candidate op set, determines which tensors cross the subgraph
//! boundary (loaded from or stored to slow memory) and which are ephemeral
//! (wholly produced and consumed inside), plus the spatial extent the tile
//! grid iterates over.

use std::collections::BTreeSet;

use tilefuse_graph::{OpId, OpKind, Problem, TensorId};

/// Boundary classification and spatial extent of a candidate subgraph.
#[derive(Clone, Debug)]
pub struct SubgraphInfo {
    /// Tensors consumed but not produced inside: loaded from slow memory.
    pub in_bd: BTreeSet<TensorId>,
    /// Tensors produced inside and visible outside: stored to slow memory.
    pub out_bd: BTreeSet<TensorId>,
    /// Tensors wholly internal; never materialized in slow memory.
    pub ephem: BTreeSet<TensorId>,
    /// Maximum output-tensor width across the subgraph's ops.
    pub out_w: i64,
    /// Maximum output-tensor height across the subgraph's ops.
    pub out_h: i64,
}

/// Classify the boundary of an op set. Pure function of (problem, op set).
pub fn analyze(p: &Problem, ops: &[OpId]) -> SubgraphInfo {
    let opset: BTreeSet<OpId> = ops.iter().copied().collect();
    let mut produced = BTreeSet::new();
    let mut consumed = BTreeSet::new();
    for &oi in ops {
        produced.extend(p.op(oi).outs.iter().copied());
        consumed.extend(p.op(oi).ins.iter().copied());
    }

    let in_bd: BTreeSet<TensorId> = consumed.difference(&produced).copied().collect();

    let mut out_bd = BTreeSet::new();
    let mut ephem = BTreeSet::new();
    for &t in &produced {
        let external = p.is_graph_out(t)
            || p.consumers(t).iter().any(|c| !opset.contains(c));
        if external {
            out_bd.insert(t);
        } else if consumed.contains(&t) {
            ephem.insert(t);
        } else {
            // Produced but never consumed anywhere: still has to be evicted.
            out_bd.insert(t);
        }
    }

    let mut out_w = 0;
    let mut out_h = 0;
    for &oi in ops {
        for &t in &p.op(oi).outs {
            out_w = out_w.max(p.tensor(t).w);
            out_h = out_h.max(p.tensor(t).h);
        }
    }

    SubgraphInfo {
        in_bd,
        out_bd,
        ephem,
        out_w,
        out_h,
    }
}

/// Whether the op set contains at least one matmul.
pub fn has_matmul(p: &Problem, ops: &[OpId]) -> bool {
    ops.iter().any(|&oi| p.op(oi).kind == OpKind::MatMul)
}

/// Largest reduction extent across the op set's matmuls (0 without matmuls).
pub fn max_reduction_extent(p: &Problem, ops: &[OpId]) -> i64 {
    ops.iter()
        .filter(|&&oi| p.op(oi).kind == OpKind::MatMul)
        .map(|&oi| p.reduction_extent(oi))
        .max()
        .unwrap_or(0)
}
