//! Drivers that push a branch stream through a [`BranchPredictorUnit`].
//!
//! Three pipeline models are provided:
//! - [`adapter`]: one branch at a time, predicted and trained immediately.
//! - [`wrong_path`]: on each conditional misprediction a random number of
//!   random wrong-path branches is fetched, then flushed.
//! - [`late_commit`]: branches sit in a reorder window before they commit,
//!   and every misprediction fetches a fixed number of wrong-path branches.

pub mod adapter;
pub mod late_commit;
pub mod trace;
pub mod wrong_path;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::info;

use crate::config::PredictorConfig;
use crate::error::Result;
use crate::predictor::{BranchPredictorUnit, BranchType, SpeculativePredictor};
use crate::stats::SimStats;

pub use adapter::ImmediateAdapter;
pub use trace::TraceReader;

/// Seed of the wrong-path generators unless told otherwise.
pub const DEFAULT_SEED: u64 = 1000;

/// Upper bound of the random offsets used for wrong-path PCs and targets.
const WRONG_PATH_SPAN: u64 = i32::MAX as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Conditional,
    Unconditional,
    Indirect,
    Call,
    Return,
}

impl BranchKind {
    pub fn branch_type(self) -> BranchType {
        BranchType {
            is_conditional: self == Self::Conditional,
            is_indirect: matches!(self, Self::Indirect | Self::Return),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Conditional => "cond",
            Self::Unconditional => "uncond",
            Self::Indirect => "indirect",
            Self::Call => "call",
            Self::Return => "ret",
        }
    }
}

impl FromStr for BranchKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cond" => Ok(Self::Conditional),
            "uncond" => Ok(Self::Unconditional),
            "indirect" => Ok(Self::Indirect),
            "call" => Ok(Self::Call),
            "ret" => Ok(Self::Return),
            other => Err(format!("unknown branch kind '{other}'")),
        }
    }
}

/// One dynamic branch of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    pub pc: u64,
    pub target: u64,
    pub taken: bool,
    pub kind: BranchKind,
}

impl Branch {
    pub fn conditional(pc: u64, target: u64, taken: bool) -> Self {
        Self {
            pc,
            target,
            taken,
            kind: BranchKind::Conditional,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.kind == BranchKind::Conditional
    }

    pub fn branch_type(&self) -> BranchType {
        self.kind.branch_type()
    }
}

/// Formats as a trace line.
impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} {:#x} {} {}",
            self.pc,
            self.target,
            if self.taken { 'T' } else { 'N' },
            self.kind.mnemonic()
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    #[default]
    Immediate,
    WrongPath,
    LateCommit,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::WrongPath => "wrong-path",
            Self::LateCommit => "late-commit",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimOptions {
    /// Leading branches that train the predictor but are not measured.
    pub warmup: u64,
    /// Wrong-path depth: the maximum in wrong-path mode, the exact count in
    /// late-commit mode.
    pub max_wrong_path: u32,
    /// Correct-path branches held back before commit in late-commit mode.
    pub commit_window: usize,
    pub seed: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            warmup: 0,
            max_wrong_path: 8,
            commit_window: 32,
            seed: DEFAULT_SEED,
        }
    }
}

impl SimOptions {
    /// Branch ids a mode can have in flight at once.
    pub fn required_capacity(&self, mode: Mode) -> usize {
        let wrong_path = self.max_wrong_path as usize;
        match mode {
            Mode::Immediate => 1,
            Mode::WrongPath => 1 + wrong_path,
            Mode::LateCommit => self.commit_window + 1 + wrong_path,
        }
    }
}

/// Fetches `count` random branches down a wrong path starting near `pc`.
/// They are left in flight for the caller to flush.
fn inject_wrong_path<P: BranchPredictorUnit>(bp: &mut P, rng: &mut StdRng, pc: u64, count: u32) {
    for _ in 0..count {
        let br_type = BranchType {
            is_conditional: rng.gen_bool(0.5),
            is_indirect: rng.gen_range(0..20) == 0,
        };
        let wrong_pc = pc.wrapping_add(rng.gen_range(0..=WRONG_PATH_SPAN));
        let target = wrong_pc.wrapping_add(rng.gen_range(0..=WRONG_PATH_SPAN));
        let id = bp.get_new_branch_id();
        let pred = bp.get_prediction(id, wrong_pc);
        bp.update_speculative_state(id, wrong_pc, br_type, pred, target);
    }
}

/// Builds a predictor sized for `mode` and runs `branches` through it.
pub fn run<I>(
    mode: Mode,
    config: &PredictorConfig,
    branches: I,
    opts: &SimOptions,
) -> Result<SimStats>
where
    I: IntoIterator<Item = Result<Branch>>,
{
    let mut config = config.clone();
    let required = opts.required_capacity(mode);
    if config.max_in_flight_branches < required {
        info!(
            configured = config.max_in_flight_branches,
            required, "raising in-flight branch capacity"
        );
        config.max_in_flight_branches = required;
    }
    let mut bp = SpeculativePredictor::try_new(&config)?;
    info!(
        mode = mode.name(),
        capacity = bp.capacity(),
        loop_predictor = config.use_loop_predictor,
        corrector = config.use_sc,
        "starting simulation"
    );
    match mode {
        Mode::Immediate => adapter::simulate(&mut ImmediateAdapter::new(bp), branches, opts),
        Mode::WrongPath => wrong_path::simulate(&mut bp, branches, opts),
        Mode::LateCommit => late_commit::simulate(&mut bp, branches, opts),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{loop_trace, ok};
    use super::*;

    #[test]
    fn kinds_map_to_branch_types() {
        assert_eq!(BranchKind::Conditional.branch_type(), BranchType::CONDITIONAL);
        assert_eq!(BranchKind::Call.branch_type(), BranchType::DIRECT_JUMP);
        assert_eq!(BranchKind::Return.branch_type(), BranchType::INDIRECT_JUMP);
        assert_eq!("ret".parse::<BranchKind>(), Ok(BranchKind::Return));
        assert!("jmp".parse::<BranchKind>().is_err());
    }

    #[test]
    fn display_is_a_trace_line() {
        let b = Branch::conditional(0x1000, 0x0fc0, false);
        assert_eq!(b.to_string(), "0x1000 0xfc0 N cond");
    }

    #[test]
    fn capacity_covers_each_mode() {
        let opts = SimOptions {
            max_wrong_path: 4,
            commit_window: 10,
            ..Default::default()
        };
        assert_eq!(opts.required_capacity(Mode::Immediate), 1);
        assert_eq!(opts.required_capacity(Mode::WrongPath), 5);
        assert_eq!(opts.required_capacity(Mode::LateCommit), 15);
    }

    #[test]
    fn run_grows_small_arena() {
        let config = PredictorConfig {
            max_in_flight_branches: 2,
            ..Default::default()
        };
        let trace = loop_trace(0x4000, 6, 30);
        for mode in [Mode::Immediate, Mode::WrongPath, Mode::LateCommit] {
            let stats = run(mode, &config, ok(&trace), &SimOptions::default()).unwrap();
            assert_eq!(stats.branches, trace.len() as u64);
            assert_eq!(stats.mode, mode.name());
        }
    }
}
