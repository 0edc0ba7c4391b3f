//! Cross-subgraph retention.
//!
//! Walks the schedule pairwise and keeps producer outputs resident in fast
//! memory for the immediately following subgraph when both sides have the
//! spare capacity, skipping one eviction and one reload per tensor.

use tilefuse_graph::{Problem, TensorId};

use crate::analyze;
use crate::cost;
use crate::fusion::Subgraph;

/// Greedily pack retained tensors for each consecutive schedule pair.
///
/// A candidate is any boundary output of `cur` consumed as a boundary
/// input of `next`. Holding a tensor costs `T_full` minus what the side
/// already keeps for a single tile; both sides' costs must fit in their
/// spare capacity. Candidates are taken by descending benefit
/// (`2 * T_full / slow_bw`), ascending tensor id on ties.
pub fn assign_retention(p: &Problem, sgs: &mut [Subgraph], order: &[usize]) {
    for win in order.windows(2) {
        let (ci, ni) = (win[0], win[1]);
        let info_cur = analyze::analyze(p, &sgs[ci].ops);
        let info_next = analyze::analyze(p, &sgs[ni].ops);
        let ws_cur = cost::working_set(p, &sgs[ci].ops, &info_cur, sgs[ci].gran);
        let ws_next = cost::working_set(p, &sgs[ni].ops, &info_next, sgs[ni].gran);

        let mut cands: Vec<(TensorId, f64)> = Vec::new();
        for &t in &info_cur.out_bd {
            if !info_next.in_bd.contains(&t) {
                continue;
            }
            let t_full = p.tensor(t).elems();
            let extra_prod = t_full - sgs[ci].gran.tile_elems();
            let extra_cons = t_full - cost::input_slice(p, t, &sgs[ni].ops, sgs[ni].gran);
            if ws_cur + extra_prod > p.fast_cap() || ws_next + extra_cons > p.fast_cap() {
                continue;
            }
            let benefit = 2.0 * t_full as f64 / p.slow_bw() as f64;
            cands.push((t, benefit));
        }
        // Stable sort: equal benefits stay in ascending tensor-id order.
        cands.sort_by(|a, b| b.1.total_cmp(&a.1));

        let avail_prod = p.fast_cap() - ws_cur;
        let avail_cons = p.fast_cap() - ws_next;
        let mut used_prod = 0;
        let mut used_cons = 0;
        for (t, _) in cands {
            let t_full = p.tensor(t).elems();
            let extra_prod = t_full - sgs[ci].gran.tile_elems();
            let extra_cons = t_full - cost::input_slice(p, t, &sgs[ni].ops, sgs[ni].gran);
            if used_prod + extra_prod <= avail_prod && used_cons + extra_cons <= avail_cons {
                sgs[ci].retain.push(t);
                used_prod += extra_prod;
                used_cons += extra_cons;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion;
    use crate::schedule;
    use tilefuse_graph::{Op, OpKind, Tensor, TensorId};

    fn matmul(lhs: u32, rhs: u32, out: u32) -> Op {
        Op {
            kind: OpKind::MatMul,
            ins: vec![TensorId(lhs), TensorId(rhs)],
            outs: vec![TensorId(out)],
            base_cost: 1,
        }
    }

    // Two chained matmuls that stay separate subgraphs: fusing them would
    // widen the first matmul's operand stripes and lose overall.
    //
    //   m0: (t0 4x2, t1 2x4) -> t2 2x2
    //   m1: (t2 2x2, t3 8x2) -> t4 8x2
    fn chained_matmuls(fast_cap: i64) -> Problem {
        Problem::new(
            vec![
                Tensor { w: 4, h: 2 },
                Tensor { w: 2, h: 4 },
                Tensor { w: 2, h: 2 },
                Tensor { w: 8, h: 2 },
                Tensor { w: 8, h: 2 },
            ],
            vec![matmul(0, 1, 2), matmul(2, 3, 4)],
            fast_cap,
            1,
            (1, 1),
        )
        .unwrap()
    }

    #[test]
    fn bridging_tensor_is_retained() {
        let p = chained_matmuls(40);
        let mut sgs = fusion::fuse(&p).unwrap();
        assert_eq!(sgs.len(), 2, "the merge must not pay off here");
        let order = schedule::schedule(&p, &sgs);
        assign_retention(&p, &mut sgs, &order);
        assert_eq!(sgs[order[0]].retain, vec![TensorId(2)]);
        assert!(sgs[order[1]].retain.is_empty());
    }

    #[test]
    fn no_spare_capacity_means_no_retention() {
        // At capacity 27 the consumer settles on an 8x2 tile with k = 1
        // (working set 26), leaving one spare element; holding all of t2
        // needs two more than its resident stripe.
        let p = chained_matmuls(27);
        let mut sgs = fusion::fuse(&p).unwrap();
        assert_eq!(sgs.len(), 2);
        let order = schedule::schedule(&p, &sgs);
        assign_retention(&p, &mut sgs, &order);
        for sg in &sgs {
            assert!(sg.retain.is_empty());
        }
    }

    #[test]
    fn unrelated_consecutive_subgraphs_retain_nothing() {
        let sq = Tensor { w: 4, h: 4 };
        let pw = |src: u32, dst: u32| Op {
            kind: OpKind::Pointwise,
            ins: vec![TensorId(src)],
            outs: vec![TensorId(dst)],
            base_cost: 100,
        };
        let p = Problem::new(vec![sq; 4], vec![pw(0, 1), pw(2, 3)], 1000, 1, (1, 1)).unwrap();
        let mut sgs = fusion::fuse(&p).unwrap();
        let order = schedule::schedule(&p, &sgs);
        assign_retention(&p, &mut sgs, &order);
        for sg in &sgs {
            assert!(sg.retain.is_empty());
        }
    }
}
