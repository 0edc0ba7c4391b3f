//! Shared builders for the end-to-end tests.

use tilefuse_graph::{Op, OpKind, Problem, Tensor, TensorId};

/// A `w x h` tensor.
pub fn tensor(w: i64, h: i64) -> Tensor {
    Tensor { w, h }
}

/// A pointwise op.
pub fn pointwise(ins: &[u32], out: u32, base_cost: i64) -> Op {
    Op {
        kind: OpKind::Pointwise,
        ins: ins.iter().map(|&t| TensorId(t)).collect(),
        outs: vec![TensorId(out)],
        base_cost,
    }
}

/// A matmul op with positional (LHS, RHS) inputs.
pub fn matmul(lhs: u32, rhs: u32, out: u32, base_cost: i64) -> Op {
    Op {
        kind: OpKind::MatMul,
        ins: vec![TensorId(lhs), TensorId(rhs)],
        outs: vec![TensorId(out)],
        base_cost,
    }
}

/// Build a validated problem; panics on structural errors.
pub fn problem(
    tensors: Vec<Tensor>,
    ops: Vec<Op>,
    fast_cap: i64,
    slow_bw: i64,
    native: (i64, i64),
) -> Problem {
    Problem::new(tensors, ops, fast_cap, slow_bw, native).expect("problem must be valid")
}
