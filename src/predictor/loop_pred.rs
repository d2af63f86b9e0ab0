//! Loop predictor.
//!
//! Tracks branches that go the same way a fixed number of times and then
//! flip once. Each entry keeps a committed iteration count, trained at
//! commit, and a speculative one advanced by speculative updates; a branch's
//! context remembers the speculative count it overwrote so a flush can put
//! it back.

use tracing::trace;

use super::component::{Component, OverrideComponent, Query, Resolution, SpecUpdate};
use super::rng::Entropy;
use crate::config::LoopConfig;

const MAX_AGE: u8 = 7;
const MAX_CONFIDENCE: u8 = 7;

#[derive(Clone, Copy, Debug, Default)]
struct LoopEntry {
    occupied: bool,
    tag: u16,
    /// Body direction, repeated `trip_count` times before one flip.
    dir: bool,
    trip_count: u16,
    current_iter: u16,
    spec_iter: u16,
    confidence: u8,
    age: u8,
}

#[derive(Clone, Debug, Default)]
pub struct LoopContext {
    predicted: bool,
    index: u32,
    tag: u16,
    hit: bool,
    valid: bool,
    prediction: bool,
    /// Speculative count this branch replaced, if it advanced one.
    prev_spec_iter: Option<u16>,
}

pub struct LoopPredictor {
    entries: Vec<LoopEntry>,
    index_mask: u32,
    index_bits: u32,
    tag_mask: u16,
    max_iter: u16,
    confidence_threshold: u8,
}

impl LoopPredictor {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            entries: vec![LoopEntry::default(); 1 << config.index_bits],
            index_mask: (1 << config.index_bits) - 1,
            index_bits: config.index_bits,
            tag_mask: ((1u32 << config.tag_bits) - 1) as u16,
            max_iter: ((1u32 << config.iter_bits) - 1) as u16,
            confidence_threshold: config.confidence_threshold.min(MAX_CONFIDENCE),
        }
    }

    fn locate(&self, pc: u64) -> (u32, u16) {
        let index = ((pc >> 2) as u32) & self.index_mask;
        let tag = ((pc >> (2 + self.index_bits)) as u16) & self.tag_mask;
        (index, tag)
    }

    fn entry_for(&mut self, ctx: &LoopContext) -> Option<&mut LoopEntry> {
        let e = &mut self.entries[ctx.index as usize];
        (e.occupied && e.tag == ctx.tag).then_some(e)
    }

    /// Speculative iteration count of the entry for `pc`, if tracked.
    pub fn speculative_iteration(&self, pc: u64) -> Option<u16> {
        let (index, tag) = self.locate(pc);
        let e = &self.entries[index as usize];
        (e.occupied && e.tag == tag).then_some(e.spec_iter)
    }
}

impl Component for LoopPredictor {
    type Context = LoopContext;

    fn predict(&mut self, query: &Query, ctx: &mut LoopContext) -> bool {
        let (index, tag) = self.locate(query.pc);
        ctx.predicted = true;
        ctx.index = index;
        ctx.tag = tag;
        let e = &self.entries[index as usize];
        ctx.hit = e.occupied && e.tag == tag;
        if ctx.hit {
            ctx.prediction = if e.spec_iter >= e.trip_count { !e.dir } else { e.dir };
            ctx.valid = e.confidence >= self.confidence_threshold;
        } else {
            ctx.valid = false;
        }
        ctx.prediction
    }

    fn update_speculative(&mut self, update: &SpecUpdate, ctx: &mut LoopContext) {
        if !update.br_type.is_conditional || !ctx.predicted {
            return;
        }
        let max_iter = self.max_iter;
        if let Some(e) = self.entry_for(ctx) {
            ctx.prev_spec_iter = Some(e.spec_iter);
            e.spec_iter = if update.taken == e.dir {
                e.spec_iter.saturating_add(1).min(max_iter)
            } else {
                0
            };
        }
    }

    /// Trains trip counts and confidence on the resolved outcome.
    fn commit(&mut self, res: &Resolution, ctx: &LoopContext, _entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional || !ctx.predicted {
            return;
        }
        let max_iter = self.max_iter;
        let valid = ctx.valid;
        let Some(e) = self.entry_for(ctx) else {
            return;
        };

        if valid {
            if ctx.prediction != res.taken {
                // a confident entry that got it wrong is dropped
                *e = LoopEntry::default();
                return;
            }
            if res.final_prediction != res.taken || res.base_prediction != res.taken {
                e.age = (e.age + 1).min(MAX_AGE);
            }
        }

        if res.taken == e.dir {
            e.current_iter = e.current_iter.saturating_add(1);
            if e.current_iter > max_iter {
                *e = LoopEntry::default();
            } else if e.confidence > 0 && e.current_iter > e.trip_count {
                e.confidence = 0;
            }
        } else {
            if e.current_iter == e.trip_count {
                e.confidence = (e.confidence + 1).min(MAX_CONFIDENCE);
            } else {
                e.trip_count = e.current_iter;
                e.confidence = 0;
            }
            e.current_iter = 0;
        }
    }

    /// Allocates an entry for a branch the base predictor missed.
    fn commit_at_retire(&mut self, res: &Resolution, ctx: &LoopContext, entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional || !ctx.predicted || ctx.hit {
            return;
        }
        if res.base_prediction == res.taken || entropy.draw() & 3 != 0 {
            return;
        }
        let e = &mut self.entries[ctx.index as usize];
        if e.occupied && e.age > 0 {
            e.age -= 1;
            return;
        }
        *e = LoopEntry {
            occupied: true,
            tag: ctx.tag,
            dir: !res.taken,
            age: MAX_AGE,
            ..LoopEntry::default()
        };
        trace!(pc = res.pc, index = ctx.index, "loop entry allocated");
    }

    fn local_recover(&mut self, _pc: u64, ctx: &LoopContext) {
        let Some(prev) = ctx.prev_spec_iter else {
            return;
        };
        if let Some(e) = self.entry_for(ctx) {
            e.spec_iter = prev;
        }
    }

    /// No shared history to restore.
    fn global_recover(&mut self, _ctx: &LoopContext) {}
}

impl OverrideComponent for LoopPredictor {
    fn is_valid(ctx: &LoopContext) -> bool {
        ctx.valid
    }

    fn prediction(ctx: &LoopContext) -> bool {
        ctx.prediction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::component::BranchType;
    use crate::predictor::rng::HistoryRng;

    const PC: u64 = 0x2040;

    fn run_branch(lp: &mut LoopPredictor, rng: &mut HistoryRng, taken: bool, base: bool) -> LoopContext {
        let mut ctx = LoopContext::default();
        let q = Query {
            pc: PC,
            base: None,
            upstream: base,
        };
        lp.predict(&q, &mut ctx);
        let upd = SpecUpdate {
            pc: PC,
            target: 0x2000,
            br_type: BranchType::CONDITIONAL,
            taken,
        };
        lp.update_speculative(&upd, &mut ctx);
        let res = Resolution {
            pc: PC,
            target: 0x2000,
            br_type: BranchType::CONDITIONAL,
            taken,
            final_prediction: base,
            base_prediction: base,
            upstream: base,
        };
        lp.commit(&res, &ctx, &mut Entropy::new(rng, (0, 0)));
        lp.commit_at_retire(&res, &ctx, &mut Entropy::new(rng, (0, 0)));
        ctx
    }

    /// Runs a loop of `trips` taken iterations plus one not-taken exit,
    /// with a base predictor that always says taken.
    fn run_loop(lp: &mut LoopPredictor, rng: &mut HistoryRng, trips: usize) -> Vec<LoopContext> {
        let mut out = Vec::new();
        for _ in 0..trips {
            out.push(run_branch(lp, rng, true, true));
        }
        out.push(run_branch(lp, rng, false, true));
        out
    }

    #[test]
    fn learns_fixed_trip_count() {
        let mut lp = LoopPredictor::new(&LoopConfig::default());
        let mut rng = HistoryRng::new();
        // allocation is entropy-gated; enough exits guarantee one
        for _ in 0..40 {
            run_loop(&mut lp, &mut rng, 5);
        }
        let ctxs = run_loop(&mut lp, &mut rng, 5);
        let exit = ctxs.last().unwrap();
        assert!(LoopPredictor::is_valid(exit));
        assert!(!LoopPredictor::prediction(exit));
        assert!(ctxs[..5].iter().all(|c| LoopPredictor::is_valid(c) && LoopPredictor::prediction(c)));
    }

    #[test]
    fn local_recover_restores_speculative_count() {
        let mut lp = LoopPredictor::new(&LoopConfig::default());
        let mut rng = HistoryRng::new();
        for _ in 0..40 {
            run_loop(&mut lp, &mut rng, 3);
        }
        assert_eq!(lp.speculative_iteration(PC), Some(0));

        let q = Query {
            pc: PC,
            base: None,
            upstream: true,
        };
        let upd = SpecUpdate {
            pc: PC,
            target: 0,
            br_type: BranchType::CONDITIONAL,
            taken: true,
        };
        let mut a = LoopContext::default();
        lp.predict(&q, &mut a);
        lp.update_speculative(&upd, &mut a);
        let mut b = LoopContext::default();
        lp.predict(&q, &mut b);
        lp.update_speculative(&upd, &mut b);
        assert_eq!(lp.speculative_iteration(PC), Some(2));

        lp.local_recover(PC, &b);
        lp.local_recover(PC, &a);
        assert_eq!(lp.speculative_iteration(PC), Some(0));
    }

    #[test]
    fn untouched_context_recovers_nothing() {
        let mut lp = LoopPredictor::new(&LoopConfig::default());
        lp.local_recover(PC, &LoopContext::default());
        assert_eq!(lp.speculative_iteration(PC), None);
    }
}
