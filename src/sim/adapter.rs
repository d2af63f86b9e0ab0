//! Non-pipelined use of the engine: each branch is predicted and then
//! trained or tracked before the next one is fetched, so at most one id is
//! ever in flight.

use tracing::debug;

use super::{Branch, SimOptions};
use crate::error::Result;
use crate::predictor::{BranchPredictorUnit, SpeculativePredictor};
use crate::stats::SimStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Predicted { id: u32, pc: u64 },
    Trained,
}

pub struct ImmediateAdapter<P = SpeculativePredictor> {
    bp: P,
    state: State,
}

impl<P: BranchPredictorUnit> ImmediateAdapter<P> {
    pub fn new(bp: P) -> Self {
        Self {
            bp,
            state: State::Idle,
        }
    }

    pub fn predictor(&self) -> &P {
        &self.bp
    }

    pub fn into_inner(self) -> P {
        self.bp
    }

    /// Allocates an id for the branch at `pc` and predicts it.
    pub fn predict(&mut self, pc: u64) -> bool {
        assert!(
            !matches!(self.state, State::Predicted { .. }),
            "predict called twice without train or track"
        );
        let id = self.bp.get_new_branch_id();
        self.state = State::Predicted { id, pc };
        self.bp.get_prediction(id, pc)
    }

    /// Resolves the predicted branch and runs its full commit.
    pub fn train(&mut self, branch: &Branch) {
        let State::Predicted { id, pc } = self.state else {
            panic!("train called without a prediction in flight");
        };
        assert_eq!(pc, branch.pc, "train for a branch other than the predicted one");
        let br_type = branch.branch_type();
        self.bp
            .update_speculative_state(id, branch.pc, br_type, branch.taken, branch.target);
        self.bp.commit_state(id, branch.pc, br_type, branch.taken);
        self.bp
            .commit_state_at_retire(id, branch.pc, br_type, branch.taken, branch.target);
        self.state = State::Trained;
    }

    /// Feeds a branch whose direction is not being predicted (or that was
    /// already trained) into history.
    pub fn track(&mut self, branch: &Branch) {
        if self.state == State::Idle {
            self.predict(branch.pc);
        }
        if let State::Predicted { id, .. } = self.state {
            let br_type = branch.branch_type();
            self.bp
                .update_speculative_state(id, branch.pc, br_type, branch.taken, branch.target);
            self.bp
                .commit_state_at_retire(id, branch.pc, br_type, branch.taken, branch.target);
        }
        self.state = State::Idle;
    }
}

/// Conditional branches are predicted and trained; everything else is
/// tracked.
pub fn simulate<P, I>(adapter: &mut ImmediateAdapter<P>, branches: I, opts: &SimOptions) -> Result<SimStats>
where
    P: BranchPredictorUnit,
    I: IntoIterator<Item = Result<Branch>>,
{
    let mut stats = SimStats::new(super::Mode::Immediate.name(), opts.warmup);
    for branch in branches {
        let branch = branch?;
        let measured = stats.fetch(&branch);
        if branch.is_conditional() {
            let pred = adapter.predict(branch.pc);
            adapter.train(&branch);
            stats.record_conditional(measured, pred != branch.taken);
        }
        adapter.track(&branch);
    }
    stats.finish();
    debug!(
        branches = stats.branches,
        mispredictions = stats.mispredictions,
        "immediate simulation done"
    );
    Ok(stats)
}
