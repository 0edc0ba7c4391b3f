//! Subgraph schedule and tile traversal assignment.
//!
//! Orders the frozen subgraphs topologically (Kahn's algorithm, FIFO
//! tie-break over subgraph ids) and assigns an explicit zig-zag tile order
//! to matmul-bearing subgraphs that span more than one tile.

use std::collections::{BTreeSet, VecDeque};

use tilefuse_graph::Problem;

use crate::analyze;
use crate::fusion::Subgraph;

/// Topological order over the fused subgraphs.
///
/// Edges run producer→consumer: `A → B` when some op in `A` produces a
/// tensor consumed by an op in `B`.
///
/// # Panics
///
/// Panics if the subgraph graph contains a cycle; fusion's cycle guard
/// makes that unreachable for partitions it produced.
pub fn schedule(p: &Problem, sgs: &[Subgraph]) -> Vec<usize> {
    let ns = sgs.len();
    let mut op_to_sg = vec![usize::MAX; p.op_count()];
    for (si, sg) in sgs.iter().enumerate() {
        for &oi in &sg.ops {
            op_to_sg[oi.index()] = si;
        }
    }

    let mut adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ns];
    for (si, sg) in sgs.iter().enumerate() {
        for &oi in &sg.ops {
            for &t in &p.op(oi).outs {
                for &c in p.consumers(t) {
                    let sj = op_to_sg[c.index()];
                    if sj != si && sj != usize::MAX {
                        adj[si].insert(sj);
                    }
                }
            }
        }
    }
    let mut indeg = vec![0usize; ns];
    for succ in &adj {
        for &sj in succ {
            indeg[sj] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..ns).filter(|&i| indeg[i] == 0).collect();
    let mut order = Vec::with_capacity(ns);
    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in &adj[u] {
            indeg[v] -= 1;
            if indeg[v] == 0 {
                queue.push_back(v);
            }
        }
    }
    assert_eq!(
        order.len(),
        ns,
        "subgraph graph contains a cycle ({} of {} scheduled)",
        order.len(),
        ns,
    );
    order
}

/// Row-major tile order alternating direction each row.
pub fn zigzag_order(tiles_x: i64, tiles_y: i64) -> Vec<u64> {
    let mut order = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        if ty % 2 == 0 {
            for tx in 0..tiles_x {
                order.push((ty * tiles_x + tx) as u64);
            }
        } else {
            for tx in (0..tiles_x).rev() {
                order.push((ty * tiles_x + tx) as u64);
            }
        }
    }
    order
}

/// Assign zig-zag traversals where they pay off: subgraphs with at least
/// one matmul and more than one tile. Everything else stays raster.
pub fn assign_traversals(p: &Problem, sgs: &mut [Subgraph]) {
    for sg in sgs.iter_mut() {
        if !analyze::has_matmul(p, &sg.ops) {
            continue;
        }
        let info = analyze::analyze(p, &sg.ops);
        let (tiles_x, tiles_y) = sg.gran.tiles(info.out_w, info.out_h);
        if tiles_x * tiles_y > 1 {
            sg.traversal = Some(zigzag_order(tiles_x, tiles_y));
        }
    }
}
