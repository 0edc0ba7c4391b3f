//! Granularity search.
//!
//! Enumerates power-of-two `(w, h, k)` candidates for a subgraph, keeps the
//! ones whose working set fits fast memory, and scores them with the raster
//! roofline. Candidates are walked largest-first on every axis so a latency
//! tie keeps the bigger tile.

use tilefuse_graph::{OpId, Problem};

use crate::analyze::{self, SubgraphInfo};
use crate::cost::{self, Granularity};

/// A granularity together with its predicted raster latency.
#[derive(Clone, Copy, Debug)]
pub struct ScoredGran {
    /// The chosen tile granularity.
    pub gran: Granularity,
    /// Raster roofline latency of the whole subgraph at that granularity.
    pub latency: f64,
}

/// Power-of-two values in `[1, max_val]`, ascending.
fn pow2_up_to(max_val: i64) -> Vec<i64> {
    let mut v = Vec::new();
    let mut x = 1;
    while x <= max_val {
        v.push(x);
        x *= 2;
    }
    v
}

/// Find the cheapest feasible granularity for an op set.
///
/// Returns `None` when no candidate fits the fast-memory capacity — the
/// subgraph is infeasible under this model. An op set with no spatial
/// extent costs nothing and gets the unit granularity.
pub fn best_granularity(p: &Problem, ops: &[OpId]) -> Option<ScoredGran> {
    let info = analyze::analyze(p, ops);
    best_granularity_with(p, ops, &info)
}

/// As [`best_granularity`], reusing an already-computed analysis.
pub fn best_granularity_with(
    p: &Problem,
    ops: &[OpId],
    info: &SubgraphInfo,
) -> Option<ScoredGran> {
    if info.out_w <= 0 {
        return Some(ScoredGran {
            gran: Granularity { w: 1, h: 1, k: 1 },
            latency: 0.0,
        });
    }

    let max_k = analyze::max_reduction_extent(p, ops);
    let spatial = pow2_up_to(info.out_w.max(info.out_h));
    let chunks = pow2_up_to(max_k.max(1));

    let mut best: Option<ScoredGran> = None;
    for &k in chunks.iter().rev() {
        for &w in spatial.iter().rev() {
            if w > info.out_w * 2 {
                continue;
            }
            for &h in spatial.iter().rev() {
                if h > info.out_h * 2 {
                    continue;
                }
                let g = Granularity {
                    w,
                    h,
                    k: if max_k > 0 { k } else { 1 },
                };
                if cost::working_set(p, ops, info, g) > p.fast_cap() {
                    continue;
                }
                let latency = cost::raster_latency(p, ops, info, g);
                if best.map_or(true, |b| latency < b.latency) {
                    best = Some(ScoredGran { gran: g, latency });
                }
            }
        }
    }
    best
}
