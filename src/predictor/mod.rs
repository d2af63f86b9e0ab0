//! Speculative branch prediction engine.
//!
//! [`SpeculativePredictor`] tracks every in-flight branch in a ring of
//! [`PredictionInfo`] slots and drives a base predictor, an optional loop
//! predictor and an optional statistical corrector through the branch
//! lifecycle:
//!
//! ```text
//! get_new_branch_id -> get_prediction -> update_speculative_state
//!     -> commit_state -> commit_state_at_retire
//!     -> flush_branch_and_repair_state (misprediction; id stays live)
//! ```
//!
//! Ids retire strictly in allocation order. A flush discards a suffix of
//! in-flight ids and rewinds shared history and the RNG seed to the state
//! right before the flushed branch's own speculative update, in time
//! proportional to the number of discarded branches.

pub mod arena;
pub mod component;
pub mod counter;
pub mod loop_pred;
pub mod rng;
pub mod sc;
pub mod tage;

use tracing::{debug, trace};

use self::arena::BranchArena;
use self::component::{BaseComponent, Component, OverrideComponent, Query, Resolution, SpecUpdate};
use self::counter::SaturatingCounter;
use self::loop_pred::LoopPredictor;
use self::rng::{Entropy, HistoryRng};
use self::sc::StatisticalCorrector;
use self::tage::TagePredictor;
use crate::config::PredictorConfig;
use crate::error::{Error, Result};

pub use self::component::BranchType;

/// Where a live branch is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Allocated,
    Predicted,
    Speculated,
    Committed,
}

/// Per-branch record held in the ring while the id is live.
#[derive(Clone, Debug, Default)]
pub struct PredictionInfo<B, L, S> {
    pub base: B,
    pub loop_ctx: L,
    pub sc: S,
    pub pc: u64,
    /// RNG seed when the speculative update was applied.
    pub rng_seed: Option<u32>,
    pub base_or_loop: bool,
    pub final_prediction: bool,
    pub stage: Stage,
}

/// The operations a pipeline model calls on a branch predictor.
pub trait BranchPredictorUnit {
    /// Allocates metadata for a new in-flight branch. The id stays valid
    /// until the branch retires or is flushed.
    fn get_new_branch_id(&mut self) -> u32;

    /// Predicts from speculative state. Once per id, before
    /// `update_speculative_state`.
    fn get_prediction(&mut self, id: u32, pc: u64) -> bool;

    /// Pushes the branch into speculative history. Called for every branch;
    /// for unconditional ones it may be the only front-end call.
    fn update_speculative_state(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        taken: bool,
        target: u64,
    );

    /// Trains the tables with the resolved direction. Cannot be undone.
    fn commit_state(&mut self, id: u32, pc: u64, br_type: BranchType, resolve_dir: bool);

    /// Final retirement of the oldest in-flight branch. Invalidates `id`.
    fn commit_state_at_retire(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        resolve_dir: bool,
        target: u64,
    );

    /// Releases an id that never turned out to be a branch.
    fn retire_non_branch_ip(&mut self, id: u32);

    /// Discards everything younger than `id`, restores speculative state to
    /// just before `id`'s update and replays `id` with the resolved outcome.
    fn flush_branch_and_repair_state(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        resolve_dir: bool,
        target: u64,
    );
}

type Slot<B, L, S> = PredictionInfo<
    <B as Component>::Context,
    <L as Component>::Context,
    <S as Component>::Context,
>;

pub struct SpeculativePredictor<
    B: BaseComponent = TagePredictor,
    L: OverrideComponent = LoopPredictor,
    S: Component = StatisticalCorrector,
> {
    rng: HistoryRng,
    base: B,
    loop_pred: Option<L>,
    sc: Option<S>,
    /// Whether overriding the base prediction with the loop predictor has
    /// been paying off.
    loop_beneficial: SaturatingCounter,
    slots: BranchArena<Slot<B, L, S>>,
}

impl SpeculativePredictor {
    /// Builds the stock predictor. Panics on an invalid configuration.
    pub fn new(config: &PredictorConfig) -> Self {
        Self::try_new(config).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_new(config: &PredictorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_components(
            config.max_in_flight_branches,
            config.confidence_counter_width,
            TagePredictor::new(&config.tage),
            config.use_loop_predictor.then(|| LoopPredictor::new(&config.loop_pred)),
            config.use_sc.then(|| StatisticalCorrector::new(&config.sc)),
        ))
    }
}

fn expect_stage(id: u32, stage: Stage, operation: &'static str, allowed: &[Stage]) {
    if !allowed.contains(&stage) {
        panic!(
            "{}",
            Error::Lifecycle {
                id,
                operation,
                stage
            }
        );
    }
}

impl<B: BaseComponent, L: OverrideComponent, S: Component> SpeculativePredictor<B, L, S> {
    pub fn with_components(
        max_in_flight_branches: usize,
        confidence_counter_width: u32,
        base: B,
        loop_pred: Option<L>,
        sc: Option<S>,
    ) -> Self {
        Self {
            rng: HistoryRng::new(),
            base,
            loop_pred,
            sc,
            loop_beneficial: SaturatingCounter::new(confidence_counter_width, true, -1),
            slots: BranchArena::new(max_in_flight_branches),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of live ids.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn oldest_id(&self) -> Option<u32> {
        (!self.slots.is_empty()).then(|| self.slots.front_id())
    }

    pub fn rng_seed(&self) -> u32 {
        self.rng.seed()
    }

    /// `(path, global)` history registers of the base predictor.
    pub fn history(&self) -> (u64, u64) {
        self.base.history()
    }

    pub fn loop_beneficial(&self) -> i32 {
        self.loop_beneficial.get()
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn loop_predictor(&self) -> Option<&L> {
        self.loop_pred.as_ref()
    }

    pub fn corrector(&self) -> Option<&S> {
        self.sc.as_ref()
    }

    pub fn prediction_info(&self, id: u32) -> Option<&Slot<B, L, S>> {
        self.slots.get(id).ok()
    }

    fn apply_speculative(&mut self, id: u32, update: &SpecUpdate) {
        let info = &mut self.slots[id];
        info.rng_seed = Some(self.rng.seed());
        self.base.update_speculative(update, &mut info.base);
        if let Some(lp) = &mut self.loop_pred {
            lp.update_speculative(update, &mut info.loop_ctx);
        }
        if let Some(sc) = &mut self.sc {
            sc.update_speculative(update, &mut info.sc);
        }
        info.pc = update.pc;
        info.stage = Stage::Speculated;
    }

    /// Undoes per-branch effects of `[id, back]`, youngest first, and returns
    /// the oldest of those ids that had applied a speculative update.
    fn local_recover_from(&mut self, id: u32) -> Option<u32> {
        if let Err(e) = self.slots.get(id) {
            panic!("{e}");
        }
        let mut anchor = None;
        for young in self.slots.ids_back_to(id) {
            let info = &self.slots[young];
            self.base.local_recover(info.pc, &info.base);
            if let Some(lp) = &mut self.loop_pred {
                lp.local_recover(info.pc, &info.loop_ctx);
            }
            if let Some(sc) = &mut self.sc {
                sc.local_recover(info.pc, &info.sc);
            }
            if info.rng_seed.is_some() {
                anchor = Some(young);
            }
        }
        anchor
    }

    /// Rebuilds shared history and the RNG seed from `anchor`'s checkpoint.
    fn global_recover(&mut self, anchor: Option<u32>) {
        let Some(anchor) = anchor else {
            return;
        };
        let info = &self.slots[anchor];
        self.base.global_recover(&info.base);
        if let Some(lp) = &mut self.loop_pred {
            lp.global_recover(&info.loop_ctx);
        }
        if let Some(sc) = &mut self.sc {
            sc.global_recover(&info.sc);
        }
        if let Some(seed) = info.rng_seed {
            self.rng.rewind(seed);
        }
    }

    /// Squashes `id` and everything younger without replaying `id`.
    pub fn flush_branch(&mut self, id: u32) {
        let flushed = self.slots.back_id().wrapping_sub(id) as usize + 1;
        let anchor = self.local_recover_from(id);
        self.global_recover(anchor);
        self.slots.deallocate_and_after(id);
        debug!(id, flushed, "branch squashed");
    }
}

impl<B: BaseComponent, L: OverrideComponent, S: Component> BranchPredictorUnit
    for SpeculativePredictor<B, L, S>
{
    fn get_new_branch_id(&mut self) -> u32 {
        let id = self.slots.allocate_back();
        let info = &mut self.slots[id];
        self.base.reset_context(&mut info.base);
        match &self.loop_pred {
            Some(lp) => lp.reset_context(&mut info.loop_ctx),
            None => info.loop_ctx = Default::default(),
        }
        match &self.sc {
            Some(sc) => sc.reset_context(&mut info.sc),
            None => info.sc = Default::default(),
        }
        info.pc = 0;
        info.rng_seed = None;
        info.base_or_loop = false;
        info.final_prediction = false;
        info.stage = Stage::Allocated;
        trace!(id, in_flight = self.slots.len(), "branch id allocated");
        id
    }

    fn get_prediction(&mut self, id: u32, pc: u64) -> bool {
        let info = &mut self.slots[id];
        expect_stage(id, info.stage, "get_prediction", &[Stage::Allocated]);
        info.pc = pc;

        let query = Query {
            pc,
            base: None,
            upstream: false,
        };
        let base_pred = self.base.predict(&query, &mut info.base);
        let verdict = B::verdict(&info.base);
        info.base_or_loop = base_pred;

        if let Some(lp) = &mut self.loop_pred {
            let query = Query {
                pc,
                base: Some(verdict),
                upstream: base_pred,
            };
            let loop_pred = lp.predict(&query, &mut info.loop_ctx);
            if self.loop_beneficial.get() >= 0 && L::is_valid(&info.loop_ctx) {
                info.base_or_loop = loop_pred;
            }
        }

        info.final_prediction = match &mut self.sc {
            Some(sc) => {
                let query = Query {
                    pc,
                    base: Some(verdict),
                    upstream: info.base_or_loop,
                };
                sc.predict(&query, &mut info.sc)
            }
            None => info.base_or_loop,
        };
        info.stage = Stage::Predicted;
        trace!(
            id,
            pc,
            base = base_pred,
            prediction = info.final_prediction,
            "predicted"
        );
        info.final_prediction
    }

    fn update_speculative_state(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        taken: bool,
        target: u64,
    ) {
        expect_stage(
            id,
            self.slots[id].stage,
            "update_speculative_state",
            &[Stage::Allocated, Stage::Predicted],
        );
        let update = SpecUpdate {
            pc,
            target,
            br_type,
            taken,
        };
        self.apply_speculative(id, &update);
        trace!(id, pc, taken, "speculative state updated");
    }

    fn commit_state(&mut self, id: u32, pc: u64, br_type: BranchType, resolve_dir: bool) {
        if !br_type.is_conditional {
            return;
        }
        let info = &self.slots[id];
        expect_stage(id, info.stage, "commit_state", &[Stage::Speculated]);

        let res = Resolution {
            pc,
            target: 0,
            br_type,
            taken: resolve_dir,
            final_prediction: info.final_prediction,
            base_prediction: B::verdict(&info.base).prediction,
            upstream: info.base_or_loop,
        };
        let hist = self.base.history();
        let mut entropy = Entropy::new(&mut self.rng, hist);

        if let Some(sc) = &mut self.sc {
            sc.commit(&res, &info.sc, &mut entropy);
        }

        if let Some(lp) = &mut self.loop_pred {
            if L::is_valid(&info.loop_ctx) {
                let loop_pred = L::prediction(&info.loop_ctx);
                if info.final_prediction != loop_pred {
                    self.loop_beneficial.update(resolve_dir == loop_pred);
                }
            }
            // loop state has to be visible before final retirement
            lp.commit(&res, &info.loop_ctx, &mut entropy);
            lp.commit_at_retire(&res, &info.loop_ctx, &mut entropy);
        }

        self.base.commit(&res, &info.base, &mut entropy);
        self.slots[id].stage = Stage::Committed;
        trace!(id, pc, resolve_dir, "committed");
    }

    fn commit_state_at_retire(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        resolve_dir: bool,
        target: u64,
    ) {
        // fail before any table is trained
        if let Err(e) = self.slots.check_front(id) {
            panic!("{e}");
        }
        let info = &self.slots[id];
        let res = Resolution {
            pc,
            target,
            br_type,
            taken: resolve_dir,
            final_prediction: info.final_prediction,
            base_prediction: B::verdict(&info.base).prediction,
            upstream: info.base_or_loop,
        };
        let hist = self.base.history();
        let mut entropy = Entropy::new(&mut self.rng, hist);
        self.base.commit_at_retire(&res, &info.base, &mut entropy);
        if let Some(sc) = &mut self.sc {
            sc.commit_at_retire(&res, &info.sc, &mut entropy);
        }
        self.slots.deallocate_front(id);
        trace!(id, pc, "retired");
    }

    fn retire_non_branch_ip(&mut self, id: u32) {
        self.slots.deallocate_front(id);
        trace!(id, "non-branch retired");
    }

    fn flush_branch_and_repair_state(
        &mut self,
        id: u32,
        pc: u64,
        br_type: BranchType,
        resolve_dir: bool,
        target: u64,
    ) {
        let flushed = self.slots.back_id().wrapping_sub(id) as usize;
        let anchor = self.local_recover_from(id);
        self.global_recover(anchor);
        self.slots.deallocate_after(id);

        let update = SpecUpdate {
            pc,
            target,
            br_type,
            taken: resolve_dir,
        };
        self.apply_speculative(id, &update);
        debug!(id, pc, resolve_dir, flushed, "flushed and repaired");
    }
}
