//! End-to-end optimization driver.
//!
//! Runs fusion, subgraph scheduling, traversal assignment, and retention
//! packing in sequence, then recomputes each subgraph's latency under its
//! final traversal and retained sets and assembles the [`PlanDoc`].

use std::collections::BTreeSet;

use tilefuse_graph::{PlanDoc, Problem, TensorId};

use crate::analyze;
use crate::cost;
use crate::fusion;
use crate::retention;
use crate::schedule;
use crate::PlanError;

/// Optimize a problem into a plan.
///
/// # Errors
///
/// Returns [`PlanError::InfeasibleOp`] when some op fits no tile
/// granularity on its own; nothing is emitted in that case.
pub fn optimize(p: &Problem) -> Result<PlanDoc, PlanError> {
    let mut sgs = fusion::fuse(p)?;
    log::debug!("fusion settled on {} subgraphs", sgs.len());

    let order = schedule::schedule(p, &sgs);
    schedule::assign_traversals(p, &mut sgs);
    retention::assign_retention(p, &mut sgs, &order);

    // What each scheduled subgraph inherits from its predecessor.
    let mut retained_in: Vec<BTreeSet<TensorId>> = vec![BTreeSet::new(); order.len()];
    for (i, win) in order.windows(2).enumerate() {
        retained_in[i + 1] = sgs[win[0]].retain.iter().copied().collect();
    }

    let mut plan = PlanDoc {
        subgraphs: Vec::with_capacity(order.len()),
        granularities: Vec::with_capacity(order.len()),
        tensors_to_retain: Vec::with_capacity(order.len()),
        traversal_orders: Vec::with_capacity(order.len()),
        subgraph_latencies: Vec::with_capacity(order.len()),
    };

    for (i, &si) in order.iter().enumerate() {
        let sg = &sgs[si];
        let info = analyze::analyze(p, &sg.ops);
        let retained_out: BTreeSet<TensorId> = sg.retain.iter().copied().collect();
        let latency = cost::final_latency(
            p,
            &sg.ops,
            &info,
            sg.gran,
            sg.traversal.is_some(),
            &retained_in[i],
            &retained_out,
        );

        let mut ops: Vec<u32> = sg.ops.iter().map(|o| o.0).collect();
        ops.sort_unstable();
        plan.subgraphs.push(ops);
        plan.granularities.push([sg.gran.w, sg.gran.h, sg.gran.k]);
        plan.tensors_to_retain
            .push(sg.retain.iter().map(|t| t.0).collect());
        plan.traversal_orders.push(sg.traversal.clone());
        plan.subgraph_latencies.push(latency);
    }

    Ok(plan)
}
