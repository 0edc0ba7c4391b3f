//! End-to-end scenarios over the full optimization pipeline.

use approx::assert_relative_eq;
use tilefuse_e2e_tests::{matmul, pointwise, problem, tensor};
use tilefuse_graph::{OpId, TensorId};
use tilefuse_opt::analyze::analyze;
use tilefuse_opt::{optimize, PlanError};

#[test]
fn pointwise_chain_fuses_into_one_subgraph() {
    // Two 8x8 pointwise ops back to back; fusing internalizes the middle
    // tensor at no latency cost.
    let p = problem(
        vec![tensor(8, 8); 3],
        vec![pointwise(&[0], 1, 64), pointwise(&[1], 2, 64)],
        24,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.subgraphs, vec![vec![0, 1]]);
    assert_eq!(plan.granularities, vec![[8, 1, 1]]);
    assert_eq!(plan.tensors_to_retain, vec![Vec::<u32>::new()]);
    assert_eq!(plan.traversal_orders, vec![None]);

    let info = analyze(&p, &[OpId(0), OpId(1)]);
    assert!(info.ephem.contains(&TensorId(1)));
}

#[test]
fn single_matmul_prefers_one_full_tile() {
    // At capacity 80 the whole 8x8 output fits as one tile with a unit
    // reduction chunk; the memory roofline (192) dominates the compute (64).
    let p = problem(
        vec![tensor(8, 8); 3],
        vec![matmul(0, 1, 2, 1)],
        80,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.subgraphs, vec![vec![0]]);
    assert_eq!(plan.granularities, vec![[8, 8, 1]]);
    assert_eq!(plan.traversal_orders, vec![None]);
    assert_eq!(plan.tensors_to_retain, vec![Vec::<u32>::new()]);
    assert_relative_eq!(plan.subgraph_latencies[0], 192.0);
}

#[test]
fn capacity_squeeze_brings_zigzag_traversal() {
    // At capacity 64 the matmul splits into an 8x4 tile pair; the zig-zag
    // traversal reuses the RHS stripe across the row turn.
    let p = problem(
        vec![tensor(8, 8); 3],
        vec![matmul(0, 1, 2, 1)],
        64,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.granularities, vec![[8, 4, 2]]);
    assert_eq!(plan.traversal_orders, vec![Some(vec![0, 1])]);
    // Raster would pay 2 * 128; the reused stripe saves 64.
    assert_relative_eq!(plan.subgraph_latencies[0], 192.0);
}

#[test]
fn matmul_bias_fuses_and_hides_the_intermediate() {
    // MatMul(t0, t1) -> t2; t2 + t3 -> t4. All 4x4, K = 4.
    let p = problem(
        vec![tensor(4, 4); 5],
        vec![matmul(0, 1, 2, 16), pointwise(&[2, 3], 4, 1)],
        256,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.subgraphs, vec![vec![0, 1]]);
    assert_eq!(plan.granularities, vec![[4, 4, 4]]);
    // One tile, compute-dominated: (16 + 1) * 16 = 272 versus 64 of traffic.
    assert_relative_eq!(plan.subgraph_latencies[0], 272.0);

    let info = analyze(&p, &[OpId(0), OpId(1)]);
    assert!(info.ephem.contains(&TensorId(2)));
}

#[test]
fn diamond_reconverges_into_one_subgraph() {
    // a -> {b, c} -> d: the cycle guard steers the merge order, and the
    // zero-cost phase eventually internalizes every edge.
    let p = problem(
        vec![tensor(4, 4); 5],
        vec![
            pointwise(&[0], 1, 16),
            pointwise(&[1], 2, 16),
            pointwise(&[1], 3, 16),
            pointwise(&[2, 3], 4, 16),
        ],
        1000,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.subgraphs, vec![vec![0, 1, 2, 3]]);
    assert_eq!(plan.granularities, vec![[4, 4, 1]]);
    assert_eq!(plan.traversal_orders, vec![None]);
}

#[test]
fn cross_subgraph_retention_keeps_the_bridge_resident() {
    // Two chained matmuls that lose by fusing (the merged tiling widens
    // the first matmul's operand stripes) but whose bridge tensor t2 fits
    // in both sides' spare capacity.
    let p = problem(
        vec![
            tensor(4, 2), // t0: LHS of m0, K = 4
            tensor(2, 4), // t1: RHS of m0
            tensor(2, 2), // t2: bridge
            tensor(8, 2), // t3: RHS of m1, K = 2
            tensor(8, 2), // t4: output
        ],
        vec![matmul(0, 1, 2, 1), matmul(2, 3, 4, 1)],
        40,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();

    assert_eq!(plan.subgraphs, vec![vec![0], vec![1]]);
    assert_eq!(plan.granularities, vec![[2, 2, 4], [8, 2, 2]]);
    assert_eq!(plan.tensors_to_retain, vec![vec![2], vec![]]);
    assert_eq!(plan.traversal_orders, vec![None, None]);

    // Producer skips t2's eviction: max(compute 4, 8 + 8) = 16.
    assert_relative_eq!(plan.subgraph_latencies[0], 16.0);
    // Consumer skips t2's reload: 36 drops by exactly |t2| / slow_bw = 4.
    assert_relative_eq!(plan.subgraph_latencies[1], 32.0);
}

#[test]
fn infeasible_singleton_aborts_planning() {
    // Even a 1x1x1 tile needs 3 resident elements; capacity 2 fits none.
    let p = problem(
        vec![tensor(8, 8); 3],
        vec![matmul(0, 1, 2, 1)],
        2,
        1,
        (1, 1),
    );
    let err = optimize(&p).unwrap_err();
    assert!(matches!(err, PlanError::InfeasibleOp { op: 0, capacity: 2 }));
}

#[test]
fn independent_chains_schedule_in_id_order() {
    let p = problem(
        vec![tensor(4, 4); 4],
        vec![pointwise(&[0], 1, 100), pointwise(&[2], 3, 100)],
        1000,
        1,
        (1, 1),
    );
    let plan = optimize(&p).unwrap();
    assert_eq!(plan.subgraphs, vec![vec![0], vec![1]]);
    assert_eq!(plan.tensors_to_retain, vec![Vec::<u32>::new(); 2]);
}
