#![warn(missing_docs)]
//! Standalone verification of emitted plans.
//!
//! Replays the scheduler's invariants over a (problem, plan) pair without
//! reusing the optimizer's code: boundary sets, working sets, and the
//! latency model are all recomputed here from scratch. Latency replay
//! follows the plan's own traversal sequences and retained sets, so the
//! reported numbers are checked against the model that produced them; the
//! raster recomputation is additionally reported for reference.

use std::collections::BTreeSet;

use tilefuse_graph::{OpId, OpKind, PlanDoc, Problem, TensorId};

/// Tolerance for latency comparisons.
const LATENCY_TOL: f64 = 0.1;

/// Errors for plans too malformed to verify.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The plan's parallel columns disagree on length.
    #[error("plan column `{field}` has {found} entries, expected {expected}")]
    ColumnMismatch {
        /// The offending plan key.
        field: &'static str,
        /// Entries implied by `subgraphs`.
        expected: usize,
        /// Entries actually present.
        found: usize,
    },
    /// A subgraph names an op outside the problem.
    #[error("subgraph {subgraph} references op {op}, but only {count} ops exist")]
    OpOutOfBounds {
        /// Index of the subgraph in schedule order.
        subgraph: usize,
        /// The out-of-bounds op id.
        op: u32,
        /// Size of the op table.
        count: usize,
    },
    /// A granularity axis is zero or negative.
    #[error("subgraph {subgraph} has non-positive granularity {w}x{h}x{k}")]
    BadGranularity {
        /// Index of the subgraph in schedule order.
        subgraph: usize,
        /// Tile width.
        w: i64,
        /// Tile height.
        h: i64,
        /// Reduction chunk.
        k: i64,
    },
}

/// Outcome of a single verification check.
#[derive(Clone, Debug)]
pub struct Check {
    /// Short check name.
    pub name: &'static str,
    /// Whether the check passed.
    pub passed: bool,
    /// Failure details, one line each.
    pub details: Vec<String>,
}

impl Check {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            details: Vec::new(),
        }
    }

    fn fail(&mut self, detail: String) {
        self.passed = false;
        self.details.push(detail);
    }
}

/// Full verification report for a (problem, plan) pair.
#[derive(Clone, Debug)]
pub struct Report {
    /// The individual checks, in order.
    pub checks: Vec<Check>,
    /// Informational lines (pass-through tensors, raster deltas).
    pub notes: Vec<String>,
    /// Sum of the latencies the plan reports.
    pub total_reported: f64,
    /// Sum of the raster recomputation.
    pub total_recomputed: f64,
    /// Sum of best singleton raster latencies (no fusion at all).
    pub unfused_baseline: f64,
}

impl Report {
    /// Whether every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Predicted speedup of the plan over the unfused baseline.
    pub fn speedup(&self) -> f64 {
        if self.total_recomputed > 0.0 {
            self.unfused_baseline / self.total_recomputed
        } else {
            1.0
        }
    }
}

struct SgView {
    ops: Vec<OpId>,
    w: i64,
    h: i64,
    k: i64,
    retain: Vec<TensorId>,
}

/// Verify a plan against its problem.
///
/// # Errors
///
/// Returns a [`VerifyError`] when the plan document itself is malformed
/// (mismatched columns, unknown op ids, non-positive granularities); the
/// semantic checks then never run.
pub fn verify(p: &Problem, plan: &PlanDoc) -> Result<Report, VerifyError> {
    let sgs = view_plan(p, plan)?;

    let mut checks = Vec::new();
    let mut notes = Vec::new();

    checks.push(check_coverage(p, &sgs));
    checks.push(check_topology(p, &sgs));
    checks.push(check_working_sets(p, &sgs));

    let (latency_check, total_reported, total_recomputed) =
        check_latencies(p, plan, &sgs, &mut notes);
    checks.push(latency_check);
    checks.push(check_outputs(p, &sgs, &mut notes));

    let unfused_baseline = (0..p.op_count() as u32)
        .map(|oi| best_singleton_latency(p, OpId(oi)))
        .sum();

    Ok(Report {
        checks,
        notes,
        total_reported,
        total_recomputed,
        unfused_baseline,
    })
}

fn view_plan(p: &Problem, plan: &PlanDoc) -> Result<Vec<SgView>, VerifyError> {
    let n = plan.subgraphs.len();
    let columns: [(&'static str, usize); 4] = [
        ("granularities", plan.granularities.len()),
        ("tensors_to_retain", plan.tensors_to_retain.len()),
        ("traversal_orders", plan.traversal_orders.len()),
        ("subgraph_latencies", plan.subgraph_latencies.len()),
    ];
    for (field, found) in columns {
        if found != n {
            return Err(VerifyError::ColumnMismatch {
                field,
                expected: n,
                found,
            });
        }
    }

    let mut sgs = Vec::with_capacity(n);
    for i in 0..n {
        for &op in &plan.subgraphs[i] {
            if op as usize >= p.op_count() {
                return Err(VerifyError::OpOutOfBounds {
                    subgraph: i,
                    op,
                    count: p.op_count(),
                });
            }
        }
        let [w, h, k] = plan.granularities[i];
        if w <= 0 || h <= 0 || k <= 0 {
            return Err(VerifyError::BadGranularity {
                subgraph: i,
                w,
                h,
                k,
            });
        }
        sgs.push(SgView {
            ops: plan.subgraphs[i].iter().map(|&o| OpId(o)).collect(),
            w,
            h,
            k,
            retain: plan.tensors_to_retain[i].iter().map(|&t| TensorId(t)).collect(),
        });
    }
    Ok(sgs)
}

/// Check 1: every op appears in at least one subgraph. Ops may appear in
/// several (recomputation is permitted).
fn check_coverage(p: &Problem, sgs: &[SgView]) -> Check {
    let mut check = Check::new("op coverage");
    let mut count = vec![0usize; p.op_count()];
    for sg in sgs {
        for &oi in &sg.ops {
            count[oi.index()] += 1;
        }
    }
    for (i, &c) in count.iter().enumerate() {
        if c == 0 {
            check.fail(format!("op {i} is in no subgraph"));
        }
    }
    check
}

/// Check 2: no subgraph consumes a tensor produced by a later subgraph.
/// An op hosted by several subgraphs counts at its last position.
fn check_topology(p: &Problem, sgs: &[SgView]) -> Check {
    let mut check = Check::new("topological order");
    let mut op_to_sg = vec![None; p.op_count()];
    for (si, sg) in sgs.iter().enumerate() {
        for &oi in &sg.ops {
            op_to_sg[oi.index()] = Some(si);
        }
    }
    for (si, sg) in sgs.iter().enumerate() {
        let opset: BTreeSet<OpId> = sg.ops.iter().copied().collect();
        for &oi in &sg.ops {
            for &t in &p.op(oi).ins {
                let Some(prod) = p.producer(t) else { continue };
                if opset.contains(&prod) {
                    continue;
                }
                if let Some(pj) = op_to_sg[prod.index()] {
                    if pj > si {
                        check.fail(format!(
                            "SG[{si}] consumes {t} produced by the later SG[{pj}]"
                        ));
                    }
                }
            }
        }
    }
    check
}

/// Check 3: the working set at the emitted granularity fits fast memory.
fn check_working_sets(p: &Problem, sgs: &[SgView]) -> Check {
    let mut check = Check::new("working set");
    for (si, sg) in sgs.iter().enumerate() {
        let (in_bd, out_bd) = boundaries(p, &sg.ops);
        let mut ws = 0;
        for &t in &in_bd {
            ws += slice_of(p, t, sg, false);
        }
        ws += out_bd.len() as i64 * sg.w * sg.h;
        if ws > p.fast_cap() {
            check.fail(format!(
                "SG[{si}] working set {ws} exceeds capacity {}",
                p.fast_cap()
            ));
        }
    }
    check
}

/// Check 4: replay the latency model. The pass/fail criterion replays the
/// plan's own traversal and retained sets; raster deltas are informational
/// (zig-zag and retention legitimately undercut raster).
fn check_latencies(
    p: &Problem,
    plan: &PlanDoc,
    sgs: &[SgView],
    notes: &mut Vec<String>,
) -> (Check, f64, f64) {
    let mut check = Check::new("latency model");
    let mut total_reported = 0.0;
    let mut total_recomputed = 0.0;

    for (si, sg) in sgs.iter().enumerate() {
        let reported = plan.subgraph_latencies[si];
        total_reported += reported;

        let raster = replay_latency(p, sg, None, &BTreeSet::new(), &BTreeSet::new());
        total_recomputed += raster;
        if (raster - reported).abs() > LATENCY_TOL {
            notes.push(format!(
                "SG[{si}]: reported {reported:.1}, raster {raster:.1} \
                 (traversal/retention adjusted)"
            ));
        }

        let retained_in: BTreeSet<TensorId> = if si > 0 {
            sgs[si - 1].retain.iter().copied().collect()
        } else {
            BTreeSet::new()
        };
        let retained_out: BTreeSet<TensorId> = sg.retain.iter().copied().collect();
        let replayed = replay_latency(
            p,
            sg,
            plan.traversal_orders[si].as_deref(),
            &retained_in,
            &retained_out,
        );
        if (replayed - reported).abs() > LATENCY_TOL {
            check.fail(format!(
                "SG[{si}]: reported {reported:.1} but the model replays to {replayed:.1}"
            ));
        }
    }
    (check, total_reported, total_recomputed)
}

/// Check 5: every graph output is produced somewhere, or is a pass-through
/// graph input already sitting in slow memory.
fn check_outputs(p: &Problem, sgs: &[SgView], notes: &mut Vec<String>) -> Check {
    let mut check = Check::new("graph outputs");
    let mut produced = BTreeSet::new();
    for sg in sgs {
        for &oi in &sg.ops {
            produced.extend(p.op(oi).outs.iter().copied());
        }
    }
    for &t in p.graph_outs() {
        if !produced.contains(&t) {
            if p.graph_ins().contains(&t) {
                notes.push(format!("{t} is a pass-through (graph input and output)"));
            } else {
                check.fail(format!("graph output {t} is never produced"));
            }
        }
    }
    check
}

// ---------------------------------------------------------------------------
// Local cost model (deliberately independent of tilefuse-opt)
// ---------------------------------------------------------------------------

fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

fn boundaries(p: &Problem, ops: &[OpId]) -> (BTreeSet<TensorId>, BTreeSet<TensorId>) {
    let opset: BTreeSet<OpId> = ops.iter().copied().collect();
    let mut produced = BTreeSet::new();
    let mut consumed = BTreeSet::new();
    for &oi in ops {
        produced.extend(p.op(oi).outs.iter().copied());
        consumed.extend(p.op(oi).ins.iter().copied());
    }
    let in_bd = consumed.difference(&produced).copied().collect();
    let mut out_bd = BTreeSet::new();
    for &t in &produced {
        let external = p.is_graph_out(t)
            || p.consumers(t).iter().any(|c| !opset.contains(c))
            || !consumed.contains(&t);
        if external {
            out_bd.insert(t);
        }
    }
    (in_bd, out_bd)
}

fn out_extent(p: &Problem, ops: &[OpId]) -> (i64, i64) {
    let mut w = 0;
    let mut h = 0;
    for &oi in ops {
        for &t in &p.op(oi).outs {
            w = w.max(p.tensor(t).w);
            h = h.max(p.tensor(t).h);
        }
    }
    (w, h)
}

/// Footprint of a boundary input: resident slice (`full_k = false`) or
/// per-tile traffic (`full_k = true`), max across consuming positions.
fn slice_of(p: &Problem, t: TensorId, sg: &SgView, full_k: bool) -> i64 {
    let mut best = 0;
    for &oi in &sg.ops {
        let op = p.op(oi);
        for (j, &input) in op.ins.iter().enumerate() {
            if input != t {
                continue;
            }
            let s = match op.kind {
                OpKind::MatMul => {
                    let depth = if full_k {
                        p.reduction_extent(oi)
                    } else {
                        sg.k
                    };
                    if j == 0 {
                        sg.h * depth
                    } else {
                        sg.w * depth
                    }
                }
                OpKind::Pointwise => sg.w * sg.h,
            };
            best = best.max(s);
        }
    }
    if best > 0 {
        best
    } else {
        sg.w * sg.h
    }
}

/// Operand role bits across the subgraph's matmuls: 1 = LHS, 2 = RHS.
fn role_bits(p: &Problem, t: TensorId, ops: &[OpId]) -> u8 {
    let mut role = 0;
    for &oi in ops {
        let op = p.op(oi);
        if op.kind != OpKind::MatMul {
            continue;
        }
        if op.ins.first() == Some(&t) {
            role |= 1;
        }
        if op.ins.get(1) == Some(&t) {
            role |= 2;
        }
    }
    role
}

/// Replay a subgraph's latency. With `traversal = None` this is the plain
/// raster roofline; otherwise the emitted tile sequence is walked and
/// operand stripes are reused whenever the row (LHS) or column (RHS) index
/// repeats from the previous tile.
fn replay_latency(
    p: &Problem,
    sg: &SgView,
    traversal: Option<&[u64]>,
    retained_in: &BTreeSet<TensorId>,
    retained_out: &BTreeSet<TensorId>,
) -> f64 {
    let (out_w, out_h) = out_extent(p, &sg.ops);
    if out_w <= 0 || out_h <= 0 {
        return 0.0;
    }
    let tiles_x = ceil_div(out_w, sg.w);
    let tiles_y = ceil_div(out_h, sg.h);

    let nat_scale = ceil_div(sg.w, p.nat_w()) * ceil_div(sg.h, p.nat_h());
    let base: i64 = sg.ops.iter().map(|&oi| p.op(oi).base_cost).sum();
    let compute = (base * nat_scale) as f64;
    let bw = p.slow_bw() as f64;

    let (in_bd, out_bd) = boundaries(p, &sg.ops);
    let mut mem_out = 0.0;
    for &t in &out_bd {
        if !retained_out.contains(&t) {
            mem_out += (sg.w * sg.h) as f64 / bw;
        }
    }
    let inputs: Vec<(f64, u8)> = in_bd
        .iter()
        .filter(|&&t| !retained_in.contains(&t))
        .map(|&t| {
            (
                slice_of(p, t, sg, true) as f64 / bw,
                role_bits(p, t, &sg.ops),
            )
        })
        .collect();

    let Some(seq) = traversal else {
        let mem_in: f64 = inputs.iter().map(|(m, _)| m).sum();
        return (tiles_x * tiles_y) as f64 * compute.max(mem_in + mem_out);
    };

    let mut total = 0.0;
    let mut prev: Option<(i64, i64)> = None;
    for &idx in seq {
        let tx = idx as i64 % tiles_x;
        let ty = idx as i64 / tiles_x;
        let mut mem_in = 0.0;
        for &(mem, role) in &inputs {
            let reuse = match prev {
                Some((px, py)) => {
                    (role == 1 && ty == py) || (role == 2 && tx == px)
                }
                None => false,
            };
            if !reuse {
                mem_in += mem;
            }
        }
        total += compute.max(mem_in + mem_out);
        prev = Some((tx, ty));
    }
    total
}

/// Best raster latency of a single op over the brute-force power-of-two
/// grid; the per-op sum is the unfused baseline the plan competes with.
fn best_singleton_latency(p: &Problem, oi: OpId) -> f64 {
    let op = p.op(oi);
    let (out_w, out_h) = out_extent(p, &[oi]);
    let max_k = match op.kind {
        OpKind::MatMul => p.reduction_extent(oi),
        OpKind::Pointwise => 0,
    };

    let in_bd: BTreeSet<TensorId> = op.ins.iter().copied().collect();
    let n_out = op.outs.len() as i64;

    let mut best = f64::INFINITY;
    let mut w = 1;
    while w <= out_w.max(1) {
        let mut h = 1;
        while h <= out_h.max(1) {
            let mut k = 1;
            while k <= max_k.max(1) {
                let sg = SgView {
                    ops: vec![oi],
                    w,
                    h,
                    k,
                    retain: Vec::new(),
                };
                let mut ws = 0;
                for &t in &in_bd {
                    ws += slice_of(p, t, &sg, false);
                }
                ws += n_out * w * h;
                if ws <= p.fast_cap() {
                    let lat =
                        replay_latency(p, &sg, None, &BTreeSet::new(), &BTreeSet::new());
                    best = best.min(lat);
                }
                k *= 2;
            }
            h *= 2;
        }
        w *= 2;
    }
    best
}
