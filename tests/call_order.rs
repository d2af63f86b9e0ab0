//! Pins the order in which the engine drives its components, using
//! recording stand-ins for the three strategies.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use specbp::predictor::component::{
    BaseComponent, Component, Confidence, OverrideComponent, Query, Resolution, SpecUpdate, Verdict,
};
use specbp::predictor::rng::Entropy;
use specbp::{BranchPredictorUnit, BranchType, SpeculativePredictor};

type Log = Rc<RefCell<Vec<String>>>;

#[derive(Clone, Debug, Default)]
struct Ctx {
    prediction: bool,
    valid: bool,
    checkpoint: Option<u64>,
}

struct Recorder {
    name: &'static str,
    log: Log,
    answer: bool,
    /// Whether predictions mark the context valid; shared so a test can
    /// flip it while the engine owns the component.
    valid: Rc<Cell<bool>>,
    hist: u64,
}

impl Recorder {
    fn new(name: &'static str, log: &Log, answer: bool) -> Self {
        Self {
            name,
            log: Rc::clone(log),
            answer,
            valid: Rc::new(Cell::new(true)),
            hist: 0,
        }
    }

    fn note(&self, what: &str) {
        self.log.borrow_mut().push(format!("{}.{what}", self.name));
    }
}

impl Component for Recorder {
    type Context = Ctx;

    fn predict(&mut self, query: &Query, ctx: &mut Ctx) -> bool {
        self.note("predict");
        ctx.valid = self.valid.get();
        // the corrector stand-in passes the upstream decision through
        ctx.prediction = if self.name == "sc" { query.upstream } else { self.answer };
        ctx.prediction
    }

    fn update_speculative(&mut self, update: &SpecUpdate, ctx: &mut Ctx) {
        self.note("update_speculative");
        ctx.checkpoint = Some(self.hist);
        self.hist = (self.hist << 1) | update.taken as u64;
    }

    fn commit(&mut self, _res: &Resolution, _ctx: &Ctx, _entropy: &mut Entropy<'_>) {
        self.note("commit");
    }

    fn commit_at_retire(&mut self, _res: &Resolution, _ctx: &Ctx, _entropy: &mut Entropy<'_>) {
        self.note("commit_at_retire");
    }

    fn local_recover(&mut self, pc: u64, _ctx: &Ctx) {
        self.note(&format!("local_recover {pc:#x}"));
    }

    fn global_recover(&mut self, ctx: &Ctx) {
        self.note("global_recover");
        if let Some(h) = ctx.checkpoint {
            self.hist = h;
        }
    }
}

impl BaseComponent for Recorder {
    fn verdict(ctx: &Ctx) -> Verdict {
        Verdict {
            prediction: ctx.prediction,
            confidence: Confidence::Medium,
        }
    }

    fn history(&self) -> (u64, u64) {
        (0, self.hist)
    }
}

impl OverrideComponent for Recorder {
    fn is_valid(ctx: &Ctx) -> bool {
        ctx.valid
    }

    fn prediction(ctx: &Ctx) -> bool {
        ctx.prediction
    }
}

type Engine = SpeculativePredictor<Recorder, Recorder, Recorder>;

fn engine(base_says: bool, loop_says: bool) -> (Engine, Log) {
    let (bp, log, _) = engine_with_loop_validity(base_says, loop_says);
    (bp, log)
}

fn engine_with_loop_validity(base_says: bool, loop_says: bool) -> (Engine, Log, Rc<Cell<bool>>) {
    let log = Log::default();
    let lp = Recorder::new("loop", &log, loop_says);
    let loop_valid = Rc::clone(&lp.valid);
    let bp = SpeculativePredictor::with_components(
        8,
        7,
        Recorder::new("base", &log, base_says),
        Some(lp),
        Some(Recorder::new("sc", &log, false)),
    );
    (bp, log, loop_valid)
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

const COND: BranchType = BranchType::CONDITIONAL;

#[test]
fn predict_and_speculate_run_base_loop_sc() {
    let (mut bp, log) = engine(true, true);
    let id = bp.get_new_branch_id();
    bp.get_prediction(id, 0x40);
    assert_eq!(take(&log), ["base.predict", "loop.predict", "sc.predict"]);
    bp.update_speculative_state(id, 0x40, COND, true, 0x80);
    assert_eq!(
        take(&log),
        ["base.update_speculative", "loop.update_speculative", "sc.update_speculative"]
    );
}

#[test]
fn commit_trains_loop_twice_before_base() {
    let (mut bp, log) = engine(true, true);
    let id = bp.get_new_branch_id();
    bp.get_prediction(id, 0x40);
    bp.update_speculative_state(id, 0x40, COND, true, 0x80);
    take(&log);

    bp.commit_state(id, 0x40, COND, true);
    assert_eq!(
        take(&log),
        ["sc.commit", "loop.commit", "loop.commit_at_retire", "base.commit"]
    );
    bp.commit_state_at_retire(id, 0x40, COND, true, 0x80);
    assert_eq!(take(&log), ["base.commit_at_retire", "sc.commit_at_retire"]);
}

#[test]
fn unconditional_commit_touches_nothing() {
    let (mut bp, log) = engine(true, true);
    let id = bp.get_new_branch_id();
    bp.update_speculative_state(id, 0x40, BranchType::DIRECT_JUMP, true, 0x80);
    take(&log);
    bp.commit_state(id, 0x40, BranchType::DIRECT_JUMP, true);
    assert!(take(&log).is_empty());
}

#[test]
fn non_branch_retire_touches_nothing() {
    let (mut bp, log) = engine(true, true);
    let id = bp.get_new_branch_id();
    bp.retire_non_branch_ip(id);
    assert!(take(&log).is_empty());
    assert_eq!(bp.in_flight(), 0);
}

#[test]
fn flush_recovers_youngest_first_then_replays() {
    let (mut bp, log) = engine(true, true);
    let ids: Vec<u32> = [0x10u64, 0x20, 0x30]
        .iter()
        .map(|&pc| {
            let id = bp.get_new_branch_id();
            bp.get_prediction(id, pc);
            bp.update_speculative_state(id, pc, COND, true, 0);
            id
        })
        .collect();
    assert_eq!(bp.history().1, 0b111);
    take(&log);

    bp.flush_branch_and_repair_state(ids[0], 0x10, COND, false, 0);
    let expected: Vec<String> = [0x30, 0x20, 0x10]
        .iter()
        .flat_map(|pc| {
            ["base", "loop", "sc"]
                .iter()
                .map(move |c| format!("{c}.local_recover {pc:#x}"))
        })
        .chain(
            [
                "base.global_recover",
                "loop.global_recover",
                "sc.global_recover",
                "base.update_speculative",
                "loop.update_speculative",
                "sc.update_speculative",
            ]
            .map(String::from),
        )
        .collect();
    assert_eq!(take(&log), expected);
    assert_eq!(bp.history().1, 0b0);
    assert_eq!(bp.in_flight(), 1);
}

#[test]
fn loop_override_waits_for_benefit() {
    // base says taken, loop says not taken; loop_beneficial starts at -1
    let (mut bp, _log) = engine(true, false);
    let id = bp.get_new_branch_id();
    assert!(bp.get_prediction(id, 0x40));
    bp.update_speculative_state(id, 0x40, COND, true, 0);
    bp.commit_state(id, 0x40, COND, false);
    bp.commit_state_at_retire(id, 0x40, COND, false, 0);
    assert_eq!(bp.loop_beneficial(), 0);

    let id = bp.get_new_branch_id();
    assert!(!bp.get_prediction(id, 0x40));
    bp.update_speculative_state(id, 0x40, COND, false, 0);
    // loop agreed with the final prediction: no update
    bp.commit_state(id, 0x40, COND, true);
    assert_eq!(bp.loop_beneficial(), 0);
}

#[test]
fn loop_disagreement_that_loses_lowers_benefit() {
    let (mut bp, _log) = engine(true, false);
    let id = bp.get_new_branch_id();
    bp.get_prediction(id, 0x40);
    bp.update_speculative_state(id, 0x40, COND, true, 0);
    bp.commit_state(id, 0x40, COND, true);
    assert_eq!(bp.loop_beneficial(), -2);
}

#[test]
fn invalid_loop_disagreement_leaves_benefit_alone() {
    let (mut bp, _log, loop_valid) = engine_with_loop_validity(true, false);
    loop_valid.set(false);
    let id = bp.get_new_branch_id();
    assert!(bp.get_prediction(id, 0x40));
    bp.update_speculative_state(id, 0x40, COND, true, 0);
    bp.commit_state(id, 0x40, COND, false);
    assert_eq!(bp.loop_beneficial(), -1);
    bp.commit_state_at_retire(id, 0x40, COND, false, 0);

    // same disagreement with a valid context does move the counter
    loop_valid.set(true);
    let id = bp.get_new_branch_id();
    bp.get_prediction(id, 0x40);
    bp.update_speculative_state(id, 0x40, COND, true, 0);
    bp.commit_state(id, 0x40, COND, false);
    assert_eq!(bp.loop_beneficial(), 0);
}

#[test]
fn invalid_loop_never_overrides_even_when_beneficial() {
    let (mut bp, _log, loop_valid) = engine_with_loop_validity(true, false);
    let id = bp.get_new_branch_id();
    bp.get_prediction(id, 0x40);
    bp.update_speculative_state(id, 0x40, COND, true, 0);
    bp.commit_state(id, 0x40, COND, false);
    bp.commit_state_at_retire(id, 0x40, COND, false, 0);
    assert_eq!(bp.loop_beneficial(), 0);

    loop_valid.set(false);
    let id = bp.get_new_branch_id();
    assert!(bp.get_prediction(id, 0x40));
    let info = bp.prediction_info(id).unwrap();
    assert!(info.base_or_loop);
    assert!(info.final_prediction);

    loop_valid.set(true);
    bp.retire_non_branch_ip(id);
    let id = bp.get_new_branch_id();
    assert!(!bp.get_prediction(id, 0x40));
}
