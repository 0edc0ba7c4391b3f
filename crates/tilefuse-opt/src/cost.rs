//! Tile-level cost model.
//!
//! All memory sizes are in elements, all times in `elements / slow_bw`, and
//! compute in the same abstract units as the per-op base cost. A tile's
//! latency is the roofline `max(compute, mem_in + mem_out)`.

use std::collections::BTreeSet;

use tilefuse_graph::{OpId, OpKind, Problem, TensorId};

use crate::analyze::SubgraphInfo;

/// A tile granularity: spatial output tile `w x h` plus reduction chunk `k`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Granularity {
    /// Tile width in elements.
    pub w: i64,
    /// Tile height in elements.
    pub h: i64,
    /// Reduction-axis chunk for matmul operands.
    pub k: i64,
}

impl Granularity {
    /// Elements in one output tile.
    pub fn tile_elems(self) -> i64 {
        self.w * self.h
    }

    /// Tile grid covering an output extent.
    pub fn tiles(self, out_w: i64, out_h: i64) -> (i64, i64) {
        (ceil_div(out_w, self.w), ceil_div(out_h, self.h))
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.w, self.h, self.k)
    }
}

pub(crate) fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Fast-memory slice a boundary input occupies while one tile executes.
///
/// Matmul operands hold a `g.k`-deep stripe (`g.h * g.k` for the LHS,
/// `g.w * g.k` for the RHS); pointwise inputs hold one output-shaped tile.
/// The maximum across consuming ops models a single shared residency slot.
/// Falls back to one tile when nothing in the subgraph consumes the tensor.
pub fn input_slice(p: &Problem, t: TensorId, ops: &[OpId], g: Granularity) -> i64 {
    operand_footprint(p, t, ops, |op_k| match op_k {
        Some((pos, _)) => {
            if pos == 0 {
                g.h * g.k
            } else {
                g.w * g.k
            }
        }
        None => g.w * g.h,
    })
}

/// Slow-memory traffic a boundary input costs per spatial tile.
///
/// Unlike [`input_slice`], matmul operands transfer the full reduction
/// extent `K` per spatial tile; no k-splitting is modeled for traffic.
pub fn tile_mem_in(p: &Problem, t: TensorId, ops: &[OpId], g: Granularity) -> i64 {
    operand_footprint(p, t, ops, |op_k| match op_k {
        Some((pos, k_full)) => {
            if pos == 0 {
                g.h * k_full
            } else {
                g.w * k_full
            }
        }
        None => g.w * g.h,
    })
}

/// Max over all (op, input position) pairs consuming `t`, with the
/// one-tile fallback when the tensor is not consumed inside the set.
fn operand_footprint(
    p: &Problem,
    t: TensorId,
    ops: &[OpId],
    size: impl Fn(Option<(usize, i64)>) -> i64,
) -> i64 {
    let mut best = 0;
    for &oi in ops {
        let op = p.op(oi);
        for (j, &input) in op.ins.iter().enumerate() {
            if input != t {
                continue;
            }
            let s = match op.kind {
                OpKind::MatMul => size(Some((j, p.reduction_extent(oi)))),
                OpKind::Pointwise => size(None),
            };
            best = best.max(s);
        }
    }
    if best > 0 {
        best
    } else {
        size(None)
    }
}

/// Peak fast-memory residency for one tile. Feasibility requires this to
/// stay within the fast-memory capacity.
pub fn working_set(p: &Problem, ops: &[OpId], info: &SubgraphInfo, g: Granularity) -> i64 {
    let mut ws = 0;
    for &t in &info.in_bd {
        ws += input_slice(p, t, ops, g);
    }
    ws += info.out_bd.len() as i64 * g.tile_elems();
    ws
}

/// Compute cost of one tile: the summed base costs scaled by how many
/// native-granularity launches the tile spans.
fn tile_compute(p: &Problem, ops: &[OpId], g: Granularity) -> f64 {
    let nat_scale = ceil_div(g.w, p.nat_w()) * ceil_div(g.h, p.nat_h());
    let base: i64 = ops.iter().map(|&oi| p.op(oi).base_cost).sum();
    (base * nat_scale) as f64
}

/// Roofline latency over the full raster traversal, without reuse or
/// retention. This is the objective scored during fusion search.
pub fn raster_latency(p: &Problem, ops: &[OpId], info: &SubgraphInfo, g: Granularity) -> f64 {
    if info.out_w <= 0 || info.out_h <= 0 {
        return 0.0;
    }
    let (tiles_x, tiles_y) = g.tiles(info.out_w, info.out_h);
    let compute = tile_compute(p, ops, g);

    let bw = p.slow_bw() as f64;
    let mut mem_in = 0.0;
    for &t in &info.in_bd {
        mem_in += tile_mem_in(p, t, ops, g) as f64 / bw;
    }
    let mem_out = info.out_bd.len() as f64 * g.tile_elems() as f64 / bw;

    (tiles_x * tiles_y) as f64 * compute.max(mem_in + mem_out)
}

/// Operand position of a tensor across a subgraph's matmuls.
///
/// Decides tile-to-tile reuse under a zig-zag traversal: an LHS stripe is
/// shared along a tile row, an RHS stripe down a tile column. A tensor
/// feeding both positions, or no matmul at all, is reloaded every tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandRole {
    /// Consumed only at matmul position 0.
    LhsOnly,
    /// Consumed only at matmul position 1.
    RhsOnly,
    /// Pointwise-consumed, both matmul positions, or neither.
    Mixed,
}

/// Derive the [`OperandRole`] of `t` across the matmuls in the op set.
pub fn operand_role(p: &Problem, t: TensorId, ops: &[OpId]) -> OperandRole {
    let mut lhs = false;
    let mut rhs = false;
    for &oi in ops {
        let op = p.op(oi);
        if op.kind != OpKind::MatMul {
            continue;
        }
        if op.ins.first() == Some(&t) {
            lhs = true;
        }
        if op.ins.get(1) == Some(&t) {
            rhs = true;
        }
    }
    match (lhs, rhs) {
        (true, false) => OperandRole::LhsOnly,
        (false, true) => OperandRole::RhsOnly,
        _ => OperandRole::Mixed,
    }
}

/// Latency under the final traversal and retention assignment.
///
/// Retained inputs transfer nothing; retained outputs skip their eviction.
/// With a zig-zag traversal, an LHS-only input is free when the row index
/// is unchanged from the previous tile and an RHS-only input when the
/// column index is unchanged (the zig-zag turn keeps the column).
pub fn final_latency(
    p: &Problem,
    ops: &[OpId],
    info: &SubgraphInfo,
    g: Granularity,
    zigzag: bool,
    retained_in: &BTreeSet<TensorId>,
    retained_out: &BTreeSet<TensorId>,
) -> f64 {
    if info.out_w <= 0 || info.out_h <= 0 {
        return 0.0;
    }
    let (tiles_x, tiles_y) = g.tiles(info.out_w, info.out_h);
    let compute = tile_compute(p, ops, g);
    let bw = p.slow_bw() as f64;

    let mut mem_out = 0.0;
    for &t in &info.out_bd {
        if !retained_out.contains(&t) {
            mem_out += g.tile_elems() as f64 / bw;
        }
    }

    let inputs: Vec<(f64, OperandRole)> = info
        .in_bd
        .iter()
        .filter(|&&t| !retained_in.contains(&t))
        .map(|&t| {
            (
                tile_mem_in(p, t, ops, g) as f64 / bw,
                operand_role(p, t, ops),
            )
        })
        .collect();

    if !zigzag || (tiles_x <= 1 && tiles_y <= 1) {
        let mem_in: f64 = inputs.iter().map(|(m, _)| m).sum();
        return (tiles_x * tiles_y) as f64 * compute.max(mem_in + mem_out);
    }

    let mut total = 0.0;
    let mut prev: Option<(i64, i64)> = None;
    for ty in 0..tiles_y {
        let ltr = ty % 2 == 0;
        for i in 0..tiles_x {
            let tx = if ltr { i } else { tiles_x - 1 - i };
            let mut mem_in = 0.0;
            for &(mem, role) in &inputs {
                let reuse = match (prev, role) {
                    (Some((_, py)), OperandRole::LhsOnly) => ty == py,
                    (Some((px, _)), OperandRole::RhsOnly) => tx == px,
                    _ => false,
                };
                if !reuse {
                    mem_in += mem;
                }
            }
            total += compute.max(mem_in + mem_out);
            prev = Some((tx, ty));
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use approx::assert_relative_eq;
    use tilefuse_graph::{Op, Tensor};

    // MatMul(t0, t1) -> t2, all 8x8, K = 8.
    fn matmul_problem(fast_cap: i64) -> Problem {
        let sq = Tensor { w: 8, h: 8 };
        Problem::new(
            vec![sq, sq, sq],
            vec![Op {
                kind: OpKind::MatMul,
                ins: vec![TensorId(0), TensorId(1)],
                outs: vec![TensorId(2)],
                base_cost: 1,
            }],
            fast_cap,
            1,
            (1, 1),
        )
        .unwrap()
    }

    #[test]
    fn slices_split_on_reduction_chunk() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        let g = Granularity { w: 4, h: 4, k: 2 };
        // LHS stripe: h*k, RHS stripe: w*k.
        assert_eq!(input_slice(&p, TensorId(0), &ops, g), 8);
        assert_eq!(input_slice(&p, TensorId(1), &ops, g), 8);
        // Traffic uses the full K.
        assert_eq!(tile_mem_in(&p, TensorId(0), &ops, g), 32);
        assert_eq!(tile_mem_in(&p, TensorId(1), &ops, g), 32);
    }

    #[test]
    fn unconsumed_tensor_falls_back_to_tile() {
        let p = matmul_problem(80);
        let g = Granularity { w: 4, h: 2, k: 2 };
        // t2 is not consumed by the matmul.
        assert_eq!(input_slice(&p, TensorId(2), &[OpId(0)], g), 8);
        assert_eq!(tile_mem_in(&p, TensorId(2), &[OpId(0)], g), 8);
    }

    #[test]
    fn working_set_counts_inputs_and_outputs() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        let g = Granularity { w: 4, h: 4, k: 8 };
        // 4*8 (LHS) + 4*8 (RHS) + 4*4 (out) = 80.
        assert_eq!(working_set(&p, &ops, &info, g), 80);
    }

    #[test]
    fn raster_latency_memory_bound() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        let g = Granularity { w: 4, h: 4, k: 8 };
        // 4 tiles, each max(compute 16, mem 32+32+16 = 80) = 80.
        assert_relative_eq!(raster_latency(&p, &ops, &info, g), 320.0);
    }

    #[test]
    fn roles_for_matmul_operands() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        assert_eq!(operand_role(&p, TensorId(0), &ops), OperandRole::LhsOnly);
        assert_eq!(operand_role(&p, TensorId(1), &ops), OperandRole::RhsOnly);
        assert_eq!(operand_role(&p, TensorId(2), &ops), OperandRole::Mixed);
    }

    #[test]
    fn zigzag_reuses_rhs_across_row_turn() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        // 1x2 tile grid: the second tile sits directly below the first,
        // so the RHS column stripe is reused, the LHS row stripe is not.
        let g = Granularity { w: 8, h: 4, k: 2 };
        let none = BTreeSet::new();
        let raster = final_latency(&p, &ops, &info, g, false, &none, &none);
        let zigzag = final_latency(&p, &ops, &info, g, true, &none, &none);
        // Raster: 2 * (32 + 64 + 32) = 256.
        assert_relative_eq!(raster, 256.0);
        // Zig-zag: 128 + (128 - 64) = 192.
        assert_relative_eq!(zigzag, 192.0);
    }

    #[test]
    fn retained_inputs_and_outputs_transfer_nothing() {
        let p = matmul_problem(80);
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        let g = Granularity { w: 8, h: 8, k: 1 };
        let none = BTreeSet::new();
        let mut r_in = BTreeSet::new();
        r_in.insert(TensorId(0));
        let mut r_out = BTreeSet::new();
        r_out.insert(TensorId(2));

        // Single tile: max(compute 64, 64 + 64 + 64) = 192 unretained.
        assert_relative_eq!(final_latency(&p, &ops, &info, g, false, &none, &none), 192.0);
        // Retaining the LHS drops 64 of traffic, retaining the output 64 more;
        // the roofline then clips at the compute cost.
        assert_relative_eq!(final_latency(&p, &ops, &info, g, false, &r_in, &none), 128.0);
        assert_relative_eq!(final_latency(&p, &ops, &info, g, false, &r_in, &r_out), 64.0);
    }

    #[test]
    fn zero_extent_subgraph_costs_nothing() {
        let z = Tensor { w: 0, h: 0 };
        let p = Problem::new(
            vec![z, z],
            vec![Op {
                kind: OpKind::Pointwise,
                ins: vec![TensorId(0)],
                outs: vec![TensorId(1)],
                base_cost: 5,
            }],
            100,
            1,
            (1, 1),
        )
        .unwrap();
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        let g = Granularity { w: 1, h: 1, k: 1 };
        assert_eq!(raster_latency(&p, &ops, &info, g), 0.0);
    }

    #[test]
    fn native_granularity_scales_compute() {
        let sq = Tensor { w: 8, h: 8 };
        let p = Problem::new(
            vec![sq, sq],
            vec![Op {
                kind: OpKind::Pointwise,
                ins: vec![TensorId(0)],
                outs: vec![TensorId(1)],
                base_cost: 10,
            }],
            1000,
            1,
            (4, 4),
        )
        .unwrap();
        let ops = [OpId(0)];
        let info = analyze(&p, &ops);
        // An 8x8 tile spans 2x2 native tiles: compute = 10 * 4 = 40,
        // mem = 64 + 64 = 128; one tile.
        let g = Granularity { w: 8, h: 8, k: 1 };
        assert_relative_eq!(raster_latency(&p, &ops, &info, g), 128.0);
        // A 2x2 tile still pays one full native launch.
        let g = Granularity { w: 2, h: 2, k: 1 };
        // 16 tiles * max(10, 8) = 160.
        assert_relative_eq!(raster_latency(&p, &ops, &info, g), 160.0);
    }
}
