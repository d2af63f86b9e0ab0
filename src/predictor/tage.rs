//! TAGE-style base predictor.
//!
//! A bimodal table backed by tagged tables indexed with geometrically longer
//! slices of global history. The global and path history registers are the
//! speculative state every in-flight branch shares; each branch's context
//! keeps a copy of both registers as they were right before its own update,
//! which is all a flush needs to rebuild them.

use tracing::trace;

use super::component::{
    BaseComponent, Component, Confidence, Query, Resolution, SpecUpdate, Verdict,
};
use super::counter::SaturatingCounter;
use super::rng::Entropy;
use crate::config::{MAX_TABLES, TageConfig};

const BIMODAL_WIDTH: u32 = 2;
const USEFUL_WIDTH: u32 = 2;
const USE_ALT_WIDTH: u32 = 4;

#[derive(Clone, Copy, Debug)]
struct TageEntry {
    valid: bool,
    tag: u16,
    ctr: SaturatingCounter,
    useful: SaturatingCounter,
}

struct TaggedTable {
    entries: Vec<TageEntry>,
    hist_len: u32,
}

/// History registers as they were before a branch's speculative update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryCheckpoint {
    pub global: u64,
    pub path: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TageContext {
    predicted: bool,
    bimodal_index: u32,
    indices: [u32; MAX_TABLES],
    tags: [u16; MAX_TABLES],
    /// Longest matching table, if any.
    provider: Option<u8>,
    /// Next matching table below the provider, if any.
    alt: Option<u8>,
    provider_pred: bool,
    alt_pred: bool,
    weak_provider: bool,
    prediction: bool,
    confidence: Confidence,
    checkpoint: Option<HistoryCheckpoint>,
}

impl TageContext {
    pub fn prediction(&self) -> bool {
        self.prediction
    }

    pub fn checkpoint(&self) -> Option<HistoryCheckpoint> {
        self.checkpoint
    }
}

pub struct TagePredictor {
    bimodal: Vec<SaturatingCounter>,
    tables: Vec<TaggedTable>,
    global_hist: u64,
    path_hist: u64,
    use_alt_on_weak: SaturatingCounter,
    bimodal_mask: u32,
    table_bits: u32,
    tag_mask: u16,
    tag_bits: u32,
    retired_since_reset: u32,
    useful_reset_period: u32,
}

#[inline]
fn hist_mask(len: u32) -> u64 {
    if len >= 64 { u64::MAX } else { (1u64 << len) - 1 }
}

/// XOR-folds the low `len` bits of `hist` down to `bits` bits.
fn fold(hist: u64, len: u32, bits: u32) -> u32 {
    let mut h = hist & hist_mask(len);
    let mut out = 0u64;
    while h != 0 {
        out ^= h & ((1u64 << bits) - 1);
        h >>= bits;
    }
    out as u32
}

impl TagePredictor {
    pub fn new(config: &TageConfig) -> Self {
        let ctr_width = config.counter_bits;
        let entry = TageEntry {
            valid: false,
            tag: 0,
            ctr: SaturatingCounter::signed(ctr_width),
            useful: SaturatingCounter::unsigned(USEFUL_WIDTH),
        };
        let tables = config
            .history_lengths
            .iter()
            .map(|&hist_len| TaggedTable {
                entries: vec![entry; 1 << config.table_bits],
                hist_len,
            })
            .collect();
        Self {
            bimodal: vec![SaturatingCounter::signed(BIMODAL_WIDTH); 1 << config.bimodal_bits],
            tables,
            global_hist: 0,
            path_hist: 0,
            use_alt_on_weak: SaturatingCounter::signed(USE_ALT_WIDTH),
            bimodal_mask: (1 << config.bimodal_bits) - 1,
            table_bits: config.table_bits,
            tag_mask: ((1u32 << config.tag_bits) - 1) as u16,
            tag_bits: config.tag_bits,
            retired_since_reset: 0,
            useful_reset_period: config.useful_reset_period,
        }
    }

    pub fn global_history(&self) -> u64 {
        self.global_hist
    }

    pub fn path_history(&self) -> u64 {
        self.path_hist
    }

    fn index(&self, pc: u64, table: usize) -> u32 {
        let len = self.tables[table].hist_len;
        let bits = self.table_bits;
        let pc_bits = (pc >> 2) as u32 ^ ((pc >> (2 + bits)) as u32);
        let h = fold(self.global_hist, len, bits);
        let p = fold(self.path_hist, len.min(16), bits);
        (pc_bits ^ h ^ p.rotate_left(table as u32 + 1)) & ((1 << bits) - 1)
    }

    fn tag(&self, pc: u64, table: usize) -> u16 {
        let len = self.tables[table].hist_len;
        let h0 = fold(self.global_hist, len, self.tag_bits);
        let h1 = fold(self.global_hist, len, self.tag_bits - 1) << 1;
        ((pc >> 2) as u32 ^ h0 ^ h1) as u16 & self.tag_mask
    }

    fn entry(&self, indices: &[u32; MAX_TABLES], table: usize) -> &TageEntry {
        &self.tables[table].entries[indices[table] as usize]
    }

    fn allocate(&mut self, ctx: &TageContext, taken: bool, entropy: &mut Entropy<'_>) {
        let first = ctx.provider.map_or(0, |p| p as usize + 1);
        let n = self.tables.len();
        if first >= n {
            return;
        }
        // occasionally skip the shortest candidate to spread allocations
        let start = if first + 1 < n && entropy.draw() & 1 == 1 {
            first + 1
        } else {
            first
        };
        let victim = (start..n).find(|&t| self.entry(&ctx.indices, t).useful.get() == 0);
        match victim {
            Some(t) => {
                let e = &mut self.tables[t].entries[ctx.indices[t] as usize];
                e.valid = true;
                e.tag = ctx.tags[t];
                e.ctr.set(if taken { 0 } else { -1 });
                e.useful.set(0);
                trace!(table = t, index = ctx.indices[t], "tage entry allocated");
            }
            None => {
                for t in first..n {
                    self.tables[t].entries[ctx.indices[t] as usize].useful.decrement();
                }
            }
        }
    }

    fn decay_useful(&mut self) {
        for table in &mut self.tables {
            for e in &mut table.entries {
                let halved = e.useful.get() >> 1;
                e.useful.set(halved);
            }
        }
    }
}

impl Component for TagePredictor {
    type Context = TageContext;

    fn predict(&mut self, query: &Query, ctx: &mut TageContext) -> bool {
        let pc = query.pc;
        ctx.predicted = true;
        ctx.bimodal_index = ((pc >> 2) as u32) & self.bimodal_mask;
        for t in 0..self.tables.len() {
            ctx.indices[t] = self.index(pc, t);
            ctx.tags[t] = self.tag(pc, t);
        }

        let (indices, tags) = (ctx.indices, ctx.tags);
        let mut matches = (0..self.tables.len()).rev().filter(|&t| {
            let e = self.entry(&indices, t);
            e.valid && e.tag == tags[t]
        });
        let provider = matches.next().map(|t| t as u8);
        let alt = matches.next().map(|t| t as u8);
        ctx.provider = provider;
        ctx.alt = alt;

        let bimodal = self.bimodal[ctx.bimodal_index as usize];
        ctx.alt_pred = match ctx.alt {
            Some(t) => self.entry(&indices, t as usize).ctr.get() >= 0,
            None => bimodal.get() >= 0,
        };

        match ctx.provider {
            Some(t) => {
                let ctr = self.entry(&indices, t as usize).ctr;
                ctx.provider_pred = ctr.get() >= 0;
                ctx.weak_provider = ctr.get() == 0 || ctr.get() == -1;
                ctx.prediction = if ctx.weak_provider && self.use_alt_on_weak.get() >= 0 {
                    ctx.alt_pred
                } else {
                    ctx.provider_pred
                };
                ctx.confidence = if ctr.is_saturated() {
                    Confidence::High
                } else if ctx.weak_provider {
                    Confidence::Low
                } else {
                    Confidence::Medium
                };
            }
            None => {
                ctx.provider_pred = ctx.alt_pred;
                ctx.weak_provider = false;
                ctx.prediction = ctx.alt_pred;
                ctx.confidence = if bimodal.is_saturated() {
                    Confidence::Medium
                } else {
                    Confidence::Low
                };
            }
        }
        ctx.prediction
    }

    fn update_speculative(&mut self, update: &SpecUpdate, ctx: &mut TageContext) {
        ctx.checkpoint = Some(HistoryCheckpoint {
            global: self.global_hist,
            path: self.path_hist,
        });
        let mut bit = update.taken as u64;
        if update.br_type.is_indirect {
            bit ^= (update.target >> 2) & 1;
        }
        self.global_hist = (self.global_hist << 1) | bit;
        self.path_hist = (self.path_hist << 1) | ((update.pc >> 2) & 1);
    }

    fn commit(&mut self, res: &Resolution, ctx: &TageContext, _entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional || !ctx.predicted {
            return;
        }
        let taken = res.taken;
        match ctx.provider {
            Some(p) => {
                let p = p as usize;
                if ctx.weak_provider && ctx.provider_pred != ctx.alt_pred {
                    self.use_alt_on_weak.update(ctx.alt_pred == taken);
                }
                let e = &mut self.tables[p].entries[ctx.indices[p] as usize];
                e.ctr.update(taken);
                if ctx.provider_pred != ctx.alt_pred {
                    e.useful.update(ctx.provider_pred == taken);
                }
                if ctx.alt.is_none() && ctx.weak_provider {
                    self.bimodal[ctx.bimodal_index as usize].update(taken);
                }
            }
            None => self.bimodal[ctx.bimodal_index as usize].update(taken),
        }
    }

    fn commit_at_retire(&mut self, res: &Resolution, ctx: &TageContext, entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional || !ctx.predicted {
            return;
        }
        if ctx.prediction != res.taken {
            self.allocate(ctx, res.taken, entropy);
        }
        if self.useful_reset_period > 0 {
            self.retired_since_reset += 1;
            if self.retired_since_reset >= self.useful_reset_period {
                self.retired_since_reset = 0;
                self.decay_useful();
            }
        }
    }

    /// Nothing per-branch to undo; all speculative state is global history.
    fn local_recover(&mut self, _pc: u64, _ctx: &TageContext) {}

    fn global_recover(&mut self, ctx: &TageContext) {
        if let Some(cp) = ctx.checkpoint {
            self.global_hist = cp.global;
            self.path_hist = cp.path;
        }
    }
}

impl BaseComponent for TagePredictor {
    fn verdict(ctx: &TageContext) -> Verdict {
        Verdict {
            prediction: ctx.prediction,
            confidence: ctx.confidence,
        }
    }

    fn history(&self) -> (u64, u64) {
        (self.path_hist, self.global_hist)
    }
}
