//! A branch that was guessed wrong, flushed and replayed must leave the
//! predictor exactly where a correct guess would have.

use proptest::prelude::*;

use specbp::{BranchPredictorUnit, BranchType, PredictorConfig, SpeculativePredictor};

const COND: BranchType = BranchType::CONDITIONAL;

#[derive(Clone, Debug)]
struct Step {
    pc: u64,
    taken: bool,
    /// Speculate the wrong way first and flush `depth` younger branches.
    misguess: Option<u8>,
}

fn step() -> impl Strategy<Value = Step> {
    (0u64..12, any::<bool>(), proptest::option::of(0u8..6)).prop_map(|(slot, taken, misguess)| {
        Step {
            pc: 0x8000 + 4 * slot,
            taken,
            misguess,
        }
    })
}

fn engine() -> SpeculativePredictor {
    SpeculativePredictor::new(&PredictorConfig {
        max_in_flight_branches: 8,
        ..Default::default()
    })
}

fn run(bp: &mut SpeculativePredictor, s: &Step, with_flush: bool) -> bool {
    let id = bp.get_new_branch_id();
    let pred = bp.get_prediction(id, s.pc);
    match s.misguess.filter(|_| with_flush) {
        Some(depth) => {
            bp.update_speculative_state(id, s.pc, COND, !s.taken, s.pc + 0x40);
            for i in 0..depth as u64 {
                let young = bp.get_new_branch_id();
                let pc = s.pc + 0x1000 + 4 * i;
                let p = bp.get_prediction(young, pc);
                let br_type = if i % 3 == 2 { BranchType::INDIRECT_JUMP } else { COND };
                bp.update_speculative_state(young, pc, br_type, p, pc + 0x84);
            }
            bp.flush_branch_and_repair_state(id, s.pc, COND, s.taken, s.pc + 0x40);
        }
        None => bp.update_speculative_state(id, s.pc, COND, s.taken, s.pc + 0x40),
    }
    bp.commit_state(id, s.pc, COND, s.taken);
    bp.commit_state_at_retire(id, s.pc, COND, s.taken, s.pc + 0x40);
    pred
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_flush_and_replay_is_invisible(steps in proptest::collection::vec(step(), 1..150)) {
        let mut flushed = engine();
        let mut clean = engine();
        for s in &steps {
            prop_assert_eq!(run(&mut flushed, s, true), run(&mut clean, s, false));
        }
        prop_assert_eq!(flushed.history(), clean.history());
        prop_assert_eq!(flushed.rng_seed(), clean.rng_seed());
        prop_assert_eq!(flushed.loop_beneficial(), clean.loop_beneficial());
        prop_assert_eq!(flushed.in_flight(), 0);
    }

    #[test]
    fn prop_squash_restores_pre_branch_state(
        warm in proptest::collection::vec(step(), 0..60),
        squashed in 1usize..8,
    ) {
        let mut bp = engine();
        for s in &warm {
            run(&mut bp, s, false);
        }
        let before = (bp.history(), bp.rng_seed());
        let first = bp.get_new_branch_id();
        for i in 0..squashed as u64 {
            let id = if i == 0 { first } else { bp.get_new_branch_id() };
            let pc = 0x2000 + 4 * i;
            let p = bp.get_prediction(id, pc);
            bp.update_speculative_state(id, pc, COND, p, pc + 8);
        }
        bp.flush_branch(first);
        prop_assert_eq!((bp.history(), bp.rng_seed()), before);
        prop_assert_eq!(bp.in_flight(), 0);
    }
}
