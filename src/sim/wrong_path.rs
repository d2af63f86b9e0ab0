//! Immediate resolution with a random wrong path.
//!
//! Every branch is predicted and speculatively updated with the predicted
//! direction. When a conditional branch turns out mispredicted, between zero
//! and `max_wrong_path` random branches are fetched down the wrong path and
//! then flushed, after which the branch commits and retires.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::{Branch, Mode, SimOptions, inject_wrong_path};
use crate::error::Result;
use crate::predictor::BranchPredictorUnit;
use crate::stats::SimStats;

pub fn simulate<P, I>(bp: &mut P, branches: I, opts: &SimOptions) -> Result<SimStats>
where
    P: BranchPredictorUnit,
    I: IntoIterator<Item = Result<Branch>>,
{
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut stats = SimStats::new(Mode::WrongPath.name(), opts.warmup);

    for branch in branches {
        let branch = branch?;
        let measured = stats.fetch(&branch);
        let br_type = branch.branch_type();

        let id = bp.get_new_branch_id();
        let pred = bp.get_prediction(id, branch.pc);
        let followed = if branch.is_conditional() { pred } else { branch.taken };
        bp.update_speculative_state(id, branch.pc, br_type, followed, branch.target);

        if branch.is_conditional() {
            let mispredicted = followed != branch.taken;
            if mispredicted {
                let depth = rng.gen_range(0..=opts.max_wrong_path);
                inject_wrong_path(bp, &mut rng, branch.pc, depth);
                bp.flush_branch_and_repair_state(id, branch.pc, br_type, branch.taken, branch.target);
                stats.record_flush(depth);
                trace!(id, pc = branch.pc, depth, "wrong path squashed");
            }
            bp.commit_state(id, branch.pc, br_type, branch.taken);
            stats.record_conditional(measured, mispredicted);
        }
        bp.commit_state_at_retire(id, branch.pc, br_type, branch.taken, branch.target);
    }

    stats.finish();
    debug!(
        branches = stats.branches,
        flushes = stats.flushes,
        wrong_path = stats.wrong_path_branches,
        "wrong-path simulation done"
    );
    Ok(stats)
}
