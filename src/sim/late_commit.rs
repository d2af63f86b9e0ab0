//! Late commit behind a reorder window.
//!
//! Correct-path branches wait in a window until `commit_window` younger
//! branches have been fetched, then commit and retire in order. A
//! conditional misprediction fetches exactly `max_wrong_path` random
//! branches, flushes them, and drains the whole window before the next
//! fetch, the way a pipeline refills after a redirect.

use std::collections::VecDeque;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, trace};

use super::{Branch, Mode, SimOptions, inject_wrong_path};
use crate::error::Result;
use crate::predictor::BranchPredictorUnit;
use crate::stats::SimStats;

struct RobEntry {
    id: u32,
    seq: u64,
    branch: Branch,
}

fn retire<P: BranchPredictorUnit>(bp: &mut P, entry: &RobEntry) {
    let b = &entry.branch;
    let br_type = b.branch_type();
    if b.is_conditional() {
        bp.commit_state(entry.id, b.pc, br_type, b.taken);
    }
    bp.commit_state_at_retire(entry.id, b.pc, br_type, b.taken, b.target);
}

pub fn simulate<P, I>(bp: &mut P, branches: I, opts: &SimOptions) -> Result<SimStats>
where
    P: BranchPredictorUnit,
    I: IntoIterator<Item = Result<Branch>>,
{
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut stats = SimStats::new(Mode::LateCommit.name(), opts.warmup);
    let mut rob: VecDeque<RobEntry> = VecDeque::with_capacity(opts.commit_window + 1);
    let mut mispredicted = false;
    let window = opts.commit_window as u64 + 1;

    for (seq, branch) in (0u64..).zip(branches) {
        let branch = branch?;
        while let Some(front) = rob.front() {
            if !mispredicted && seq - front.seq < window {
                break;
            }
            if let Some(entry) = rob.pop_front() {
                retire(bp, &entry);
            }
        }

        let measured = stats.fetch(&branch);
        let br_type = branch.branch_type();
        let id = bp.get_new_branch_id();
        rob.push_back(RobEntry { id, seq, branch });
        let pred = bp.get_prediction(id, branch.pc);

        if branch.is_conditional() {
            mispredicted = pred != branch.taken;
            bp.update_speculative_state(id, branch.pc, br_type, pred, branch.target);
            if mispredicted {
                inject_wrong_path(bp, &mut rng, branch.pc, opts.max_wrong_path);
                bp.flush_branch_and_repair_state(id, branch.pc, br_type, branch.taken, branch.target);
                stats.record_flush(opts.max_wrong_path);
                trace!(id, pc = branch.pc, in_window = rob.len(), "mispredicted, draining window");
            }
            stats.record_conditional(measured, mispredicted);
        } else {
            mispredicted = false;
            bp.update_speculative_state(id, branch.pc, br_type, branch.taken, branch.target);
        }
    }

    for entry in rob.drain(..) {
        retire(bp, &entry);
    }
    stats.finish();
    debug!(
        branches = stats.branches,
        flushes = stats.flushes,
        "late-commit simulation done"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictorConfig;
    use crate::predictor::{BranchType, SpeculativePredictor};
    use crate::sim::BranchKind;
    use crate::sim::testing::{loop_trace, ok};

    fn predictor(opts: &SimOptions) -> SpeculativePredictor {
        SpeculativePredictor::new(&PredictorConfig {
            max_in_flight_branches: opts.required_capacity(Mode::LateCommit),
            ..Default::default()
        })
    }

    #[test]
    fn window_fits_required_capacity() {
        // exact sizing would panic on overflow if the window leaked ids
        let opts = SimOptions {
            max_wrong_path: 3,
            commit_window: 5,
            ..Default::default()
        };
        let trace = loop_trace(0x9000, 5, 80);
        let mut bp = predictor(&opts);
        assert_eq!(bp.capacity(), 16);
        let stats = simulate(&mut bp, ok(&trace), &opts).unwrap();
        assert_eq!(bp.in_flight(), 0);
        assert_eq!(stats.wrong_path_branches, 3 * stats.flushes);
        assert_eq!(stats.flushes, stats.mispredictions);
    }

    #[test]
    fn always_taken_branch_stops_flushing() {
        let trace: Vec<Branch> = (0..500)
            .map(|i| Branch::conditional(0x100 + 4 * (i % 3), 0x80, true))
            .collect();
        let opts = SimOptions {
            warmup: 100,
            ..Default::default()
        };
        let mut bp = predictor(&opts);
        let stats = simulate(&mut bp, ok(&trace), &opts).unwrap();
        assert_eq!(stats.conditional_branches, 400);
        assert_eq!(stats.mispredictions, 0);
        assert_eq!(bp.in_flight(), 0);
    }

    /// Always predicts taken and logs allocations and retirements.
    #[derive(Default)]
    struct Recording {
        next_id: u32,
        log: Vec<String>,
    }

    impl BranchPredictorUnit for Recording {
        fn get_new_branch_id(&mut self) -> u32 {
            let id = self.next_id;
            self.next_id += 1;
            self.log.push(format!("alloc {id}"));
            id
        }

        fn get_prediction(&mut self, _id: u32, _pc: u64) -> bool {
            true
        }

        fn update_speculative_state(&mut self, _: u32, _: u64, _: BranchType, _: bool, _: u64) {}

        fn commit_state(&mut self, _: u32, _: u64, _: BranchType, _: bool) {}

        fn commit_state_at_retire(&mut self, id: u32, _: u64, _: BranchType, _: bool, _: u64) {
            self.log.push(format!("retire {id}"));
        }

        fn retire_non_branch_ip(&mut self, id: u32) {
            self.log.push(format!("retire {id}"));
        }

        fn flush_branch_and_repair_state(&mut self, _: u32, _: u64, _: BranchType, _: bool, _: u64) {}
    }

    #[test]
    fn unconditional_branch_ends_the_drain() {
        let trace = [
            Branch::conditional(0x100, 0x80, false),
            Branch {
                pc: 0x104,
                target: 0x200,
                taken: true,
                kind: BranchKind::Unconditional,
            },
            Branch::conditional(0x200, 0x80, true),
            Branch::conditional(0x204, 0x80, true),
        ];
        let opts = SimOptions {
            max_wrong_path: 0,
            commit_window: 4,
            ..Default::default()
        };
        let mut bp = Recording::default();
        let stats = simulate(&mut bp, ok(&trace), &opts).unwrap();
        assert_eq!(stats.mispredictions, 1);
        // only the mispredicted branch is drained; the jump clears the flag
        assert_eq!(
            bp.log,
            [
                "alloc 0", "retire 0", "alloc 1", "alloc 2", "alloc 3", "retire 1", "retire 2",
                "retire 3",
            ]
        );
    }

    #[test]
    fn empty_trace_is_fine() {
        let opts = SimOptions::default();
        let mut bp = predictor(&opts);
        let stats = simulate(&mut bp, ok(&[]), &opts).unwrap();
        assert_eq!(stats.branches, 0);
        assert!(stats.errors.is_empty());
    }
}
