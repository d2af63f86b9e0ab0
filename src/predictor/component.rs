//! Capability interface shared by the three prediction strategies.

use std::fmt::Debug;

use super::rng::Entropy;

/// Static classification of a branch, supplied by the caller on every call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BranchType {
    pub is_conditional: bool,
    pub is_indirect: bool,
}

impl BranchType {
    pub const CONDITIONAL: Self = Self {
        is_conditional: true,
        is_indirect: false,
    };
    pub const DIRECT_JUMP: Self = Self {
        is_conditional: false,
        is_indirect: false,
    };
    pub const INDIRECT_JUMP: Self = Self {
        is_conditional: false,
        is_indirect: true,
    };
}

/// How sure the base predictor is about its answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

/// What the base predictor said, as seen by downstream stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub prediction: bool,
    pub confidence: Confidence,
}

/// Input to [`Component::predict`].
#[derive(Clone, Copy, Debug)]
pub struct Query {
    pub pc: u64,
    /// Base predictor's answer; absent when querying the base itself.
    pub base: Option<Verdict>,
    /// Decision of the stages before this one.
    pub upstream: bool,
}

/// Input to [`Component::update_speculative`].
#[derive(Clone, Copy, Debug)]
pub struct SpecUpdate {
    pub pc: u64,
    pub target: u64,
    pub br_type: BranchType,
    pub taken: bool,
}

/// Input to the commit hooks.
#[derive(Clone, Copy, Debug)]
pub struct Resolution {
    pub pc: u64,
    pub target: u64,
    pub br_type: BranchType,
    pub taken: bool,
    /// Final prediction handed to the pipeline.
    pub final_prediction: bool,
    /// Base predictor's own prediction.
    pub base_prediction: bool,
    /// Base-or-loop decision fed into the corrector.
    pub upstream: bool,
}

impl Resolution {
    pub fn mispredicted(&self) -> bool {
        self.final_prediction != self.taken
    }
}

/// One prediction strategy.
///
/// Per-branch state lives in `Context`, which the engine stores in the
/// branch's slot. A strategy must be able to undo its per-branch speculative
/// effects from the context alone (`local_recover`) and rebuild its shared
/// speculative state from the context of the oldest flushed branch
/// (`global_recover`).
pub trait Component {
    type Context: Clone + Default + Debug;

    /// Returns `ctx` to the shape of a branch nothing has been done to.
    fn reset_context(&self, ctx: &mut Self::Context) {
        *ctx = Self::Context::default();
    }

    fn predict(&mut self, query: &Query, ctx: &mut Self::Context) -> bool;

    fn update_speculative(&mut self, update: &SpecUpdate, ctx: &mut Self::Context);

    /// Training that may run before retirement. Cannot be undone.
    fn commit(&mut self, res: &Resolution, ctx: &Self::Context, entropy: &mut Entropy<'_>);

    fn commit_at_retire(&mut self, res: &Resolution, ctx: &Self::Context, entropy: &mut Entropy<'_>);

    fn local_recover(&mut self, pc: u64, ctx: &Self::Context);

    fn global_recover(&mut self, ctx: &Self::Context);
}

/// The base predictor also owns the history registers the RNG mixes in.
pub trait BaseComponent: Component {
    fn verdict(ctx: &Self::Context) -> Verdict;

    /// Current `(path, global)` history registers.
    fn history(&self) -> (u64, u64);
}

/// A stage whose answer may replace the base prediction outright.
pub trait OverrideComponent: Component {
    /// Whether the stage found an entry confident enough to override.
    fn is_valid(ctx: &Self::Context) -> bool;

    fn prediction(ctx: &Self::Context) -> bool;
}
