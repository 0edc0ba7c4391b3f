//! Greedy cycle-safe fusion of ops into subgraphs.
//!
//! Every op starts as its own subgraph with its best granularity. Phase 1
//! repeatedly applies the adjacent merge with the largest strictly positive
//! latency benefit; phase 2 then applies zero-cost merges that internalize
//! the most tensors. A BFS over the subgraph DAG rejects any merge that
//! would create a cycle.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tilefuse_graph::{OpId, Problem, TensorId};

use crate::analyze;
use crate::cost::Granularity;
use crate::gran::{self, ScoredGran};
use crate::PlanError;

/// Tolerance below which a merge no longer counts as a latency regression.
const EPS: f64 = 1e-6;

/// A fused group of ops with its chosen granularity and cached latency.
///
/// `retain` and `traversal` stay empty until the scheduling stages fill
/// them in after fusion has frozen the partition.
#[derive(Clone, Debug)]
pub struct Subgraph {
    /// Member ops, in absorption order.
    pub ops: Vec<OpId>,
    /// Chosen tile granularity.
    pub gran: Granularity,
    /// Cached latency estimate for the current granularity.
    pub latency: f64,
    /// Boundary outputs kept resident for the next scheduled subgraph.
    pub retain: Vec<TensorId>,
    /// Explicit tile order; `None` means raster.
    pub traversal: Option<Vec<u64>>,
}

/// One slot in the fusion table. Merging absorbs a slot into another and
/// marks the source inactive; slots are never removed so ids stay stable.
#[derive(Clone, Debug)]
struct Slot {
    ops: Vec<OpId>,
    gran: Granularity,
    latency: f64,
    active: bool,
}

/// The fusion driver: owns the subgraph table during the merge loops.
pub struct Fuser<'a> {
    problem: &'a Problem,
    slots: Vec<Slot>,
    op_to_slot: Vec<usize>,
}

impl<'a> Fuser<'a> {
    /// Initialize one subgraph per op, each with its best granularity.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InfeasibleOp`] when some op fits no granularity
    /// on its own — the problem is unschedulable before fusion starts.
    pub fn new(problem: &'a Problem) -> Result<Self, PlanError> {
        let mut slots = Vec::with_capacity(problem.op_count());
        for oi in problem.op_ids() {
            let ops = vec![oi];
            let scored =
                gran::best_granularity(problem, &ops).ok_or(PlanError::InfeasibleOp {
                    op: oi.0,
                    capacity: problem.fast_cap(),
                })?;
            slots.push(Slot {
                ops,
                gran: scored.gran,
                latency: scored.latency,
                active: true,
            });
        }
        let op_to_slot = (0..problem.op_count()).collect();
        Ok(Self {
            problem,
            slots,
            op_to_slot,
        })
    }

    /// Number of active subgraphs.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Summed latency estimate over the active subgraphs.
    pub fn total_latency(&self) -> f64 {
        self.slots
            .iter()
            .filter(|s| s.active)
            .map(|s| s.latency)
            .sum()
    }

    /// Directed producer→consumer adjacency between active subgraphs,
    /// deduplicated in ascending order.
    fn adjacent_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        for (si, slot) in self.slots.iter().enumerate() {
            if !slot.active {
                continue;
            }
            for &oi in &slot.ops {
                for &t in &self.problem.op(oi).outs {
                    for &c in self.problem.consumers(t) {
                        let sj = self.op_to_slot[c.index()];
                        if sj != si && self.slots[sj].active {
                            pairs.insert((si, sj));
                        }
                    }
                }
            }
        }
        pairs.into_iter().collect()
    }

    /// Whether merging `a` and `b` would close a cycle: BFS from `a`'s
    /// successors (excluding `b` itself) looking for a path back to `b`.
    fn would_cycle(&self, a: usize, b: usize) -> bool {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        let push_successors = |of: usize,
                                   visited: &mut HashSet<usize>,
                                   queue: &mut VecDeque<usize>|
         -> bool {
            for &oi in &self.slots[of].ops {
                for &t in &self.problem.op(oi).outs {
                    for &c in self.problem.consumers(t) {
                        let s = self.op_to_slot[c.index()];
                        if s == b && of != a {
                            return true;
                        }
                        if s != of && s != b && self.slots[s].active && visited.insert(s) {
                            queue.push_back(s);
                        }
                    }
                }
            }
            false
        };

        // Seed with a's successors; the direct a→b edge is not a cycle.
        push_successors(a, &mut visited, &mut queue);
        while let Some(cur) = queue.pop_front() {
            if push_successors(cur, &mut visited, &mut queue) {
                return true;
            }
        }
        false
    }

    fn merged_ops(&self, a: usize, b: usize) -> Vec<OpId> {
        let mut ops = self.slots[a].ops.clone();
        ops.extend_from_slice(&self.slots[b].ops);
        ops
    }

    /// Absorb `b` into `a`, keeping `a`'s id.
    fn merge(&mut self, a: usize, b: usize, scored: ScoredGran) {
        let moved = std::mem::take(&mut self.slots[b].ops);
        for &oi in &moved {
            self.op_to_slot[oi.index()] = a;
        }
        self.slots[a].ops.extend(moved);
        self.slots[a].gran = scored.gran;
        self.slots[a].latency = scored.latency;
        self.slots[b].active = false;
    }

    /// One phase-1 step: apply the merge with the largest strictly
    /// positive latency benefit. Returns `false` when none exists.
    pub fn phase1_step(&mut self) -> bool {
        let mut best: Option<(usize, usize, ScoredGran, f64)> = None;
        for (a, b) in self.adjacent_pairs() {
            if self.would_cycle(a, b) {
                continue;
            }
            let merged = self.merged_ops(a, b);
            let Some(scored) = gran::best_granularity(self.problem, &merged) else {
                continue;
            };
            let benefit = self.slots[a].latency + self.slots[b].latency - scored.latency;
            if benefit > best.map_or(0.0, |(.., bb)| bb) {
                best = Some((a, b, scored, benefit));
            }
        }
        match best {
            Some((a, b, scored, benefit)) => {
                log::debug!(
                    "phase 1: merge subgraph {b} into {a} (benefit {benefit:.3}, gran {})",
                    scored.gran
                );
                self.merge(a, b, scored);
                true
            }
            None => false,
        }
    }

    /// One phase-2 step: among merges that cost nothing (benefit above
    /// `-EPS`), apply the one internalizing the most tensors. Returns
    /// `false` when no merge internalizes anything.
    pub fn phase2_step(&mut self) -> bool {
        let mut best: Option<(usize, usize, ScoredGran, usize)> = None;
        for (a, b) in self.adjacent_pairs() {
            if self.would_cycle(a, b) {
                continue;
            }
            let merged = self.merged_ops(a, b);
            let Some(scored) = gran::best_granularity(self.problem, &merged) else {
                continue;
            };
            let benefit = self.slots[a].latency + self.slots[b].latency - scored.latency;
            if benefit < -EPS {
                continue;
            }
            let n_ephem = analyze::analyze(self.problem, &merged).ephem.len();
            if n_ephem > best.map_or(0, |(.., be)| be) {
                best = Some((a, b, scored, n_ephem));
            }
        }
        match best {
            Some((a, b, scored, n_ephem)) => {
                log::debug!(
                    "phase 2: merge subgraph {b} into {a} ({n_ephem} tensors internalized)"
                );
                self.merge(a, b, scored);
                true
            }
            None => false,
        }
    }

    /// Run both phases to exhaustion and freeze the partition.
    pub fn run(mut self) -> Vec<Subgraph> {
        while self.phase1_step() {}
        while self.phase2_step() {}
        self.into_subgraphs()
    }

    /// Collect the active subgraphs in slot order.
    pub fn into_subgraphs(self) -> Vec<Subgraph> {
        self.slots
            .into_iter()
            .filter(|s| s.active && !s.ops.is_empty())
            .map(|s| Subgraph {
                ops: s.ops,
                gran: s.gran,
                latency: s.latency,
                retain: Vec::new(),
                traversal: None,
            })
            .collect()
    }
}

/// Fuse a problem's ops into subgraphs.
///
/// # Errors
///
/// Returns [`PlanError::InfeasibleOp`] when a single op fits no granularity.
pub fn fuse(p: &Problem) -> Result<Vec<Subgraph>, PlanError> {
    Ok(Fuser::new(p)?.run())
}
