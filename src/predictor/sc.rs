//! Statistical corrector.
//!
//! Sums small signed counters from a bias table, GEHL tables over the
//! corrector's own global history, and a table indexed by per-PC local
//! history, plus a term for the upstream decision weighted by the base
//! predictor's confidence. The sign of the sum is the final prediction.

use super::component::{Component, Confidence, Query, Resolution, SpecUpdate};
use super::counter::SaturatingCounter;
use super::rng::Entropy;
use crate::config::{MAX_TABLES, ScConfig};

const UPSTREAM_WEIGHT: i32 = 8;
const THRESHOLD_CTR_WIDTH: u32 = 6;
/// Retirements between decays of the threshold-adaptation counter.
const THRESHOLD_DECAY_PERIOD: u64 = 1 << 12;

#[derive(Clone, Debug, Default)]
pub struct ScContext {
    predicted: bool,
    bias_index: u32,
    gehl_indices: [u32; MAX_TABLES],
    local_index: u32,
    sum: i32,
    prediction: bool,
    /// Corrector global history before this branch's update.
    ghist_checkpoint: Option<u64>,
    /// Local-history slot and the value this branch overwrote.
    prev_local: Option<(u32, u32)>,
}

impl ScContext {
    pub fn sum(&self) -> i32 {
        self.sum
    }
}

pub struct StatisticalCorrector {
    bias: Vec<SaturatingCounter>,
    gehl: Vec<Vec<SaturatingCounter>>,
    gehl_lengths: Vec<u32>,
    local_table: Vec<SaturatingCounter>,
    local_hist: Vec<u32>,
    ghist: u64,
    threshold: i32,
    threshold_ctr: SaturatingCounter,
    retired: u64,
    bias_mask: u32,
    table_bits: u32,
    local_hist_mask: u32,
}

fn centered(ctr: &SaturatingCounter) -> i32 {
    2 * ctr.get() + 1
}

fn fold(hist: u64, len: u32, bits: u32) -> u32 {
    let mut h = if len >= 64 { hist } else { hist & ((1u64 << len) - 1) };
    let mut out = 0u64;
    while h != 0 {
        out ^= h & ((1u64 << bits) - 1);
        h >>= bits;
    }
    out as u32
}

impl StatisticalCorrector {
    pub fn new(config: &ScConfig) -> Self {
        let ctr = SaturatingCounter::signed(config.counter_bits);
        let table = vec![ctr; 1 << config.table_bits];
        Self {
            bias: vec![ctr; 1 << config.bias_bits],
            gehl: config.history_lengths.iter().map(|_| table.clone()).collect(),
            gehl_lengths: config.history_lengths.clone(),
            local_table: table,
            local_hist: vec![0; 1 << config.local_table_bits],
            ghist: 0,
            threshold: config.initial_threshold,
            threshold_ctr: SaturatingCounter::signed(THRESHOLD_CTR_WIDTH),
            retired: 0,
            bias_mask: (1 << config.bias_bits) - 1,
            table_bits: config.table_bits,
            local_hist_mask: ((1u64 << config.local_history_bits) - 1) as u32,
        }
    }

    pub fn global_history(&self) -> u64 {
        self.ghist
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    fn local_slot(&self, pc: u64) -> u32 {
        ((pc >> 2) as u32) & (self.local_hist.len() as u32 - 1)
    }

    fn table_mask(&self) -> u32 {
        (1 << self.table_bits) - 1
    }
}

impl Component for StatisticalCorrector {
    type Context = ScContext;

    fn predict(&mut self, query: &Query, ctx: &mut ScContext) -> bool {
        let pc_bits = (query.pc >> 2) as u32;
        let mask = self.table_mask();
        let confidence = query.base.map_or(Confidence::Low, |v| v.confidence);

        ctx.predicted = true;
        ctx.bias_index =
            ((pc_bits << 3) | ((confidence as u32) << 1) | query.upstream as u32) & self.bias_mask;
        let mut sum = centered(&self.bias[ctx.bias_index as usize]);

        for (t, &len) in self.gehl_lengths.iter().enumerate() {
            let idx = (pc_bits ^ fold(self.ghist, len, self.table_bits) ^ ((t as u32) << 2)) & mask;
            ctx.gehl_indices[t] = idx;
            sum += centered(&self.gehl[t][idx as usize]);
        }

        let lhist = self.local_hist[self.local_slot(query.pc) as usize];
        ctx.local_index = (pc_bits ^ (lhist << 1)) & mask;
        sum += centered(&self.local_table[ctx.local_index as usize]);

        let weight = UPSTREAM_WEIGHT * (confidence as i32 + 1);
        sum += if query.upstream { weight } else { -weight };

        ctx.sum = sum;
        ctx.prediction = sum >= 0;
        ctx.prediction
    }

    fn update_speculative(&mut self, update: &SpecUpdate, ctx: &mut ScContext) {
        ctx.ghist_checkpoint = Some(self.ghist);
        if !update.br_type.is_conditional {
            return;
        }
        self.ghist = (self.ghist << 1) | update.taken as u64;
        let slot = self.local_slot(update.pc);
        let old = self.local_hist[slot as usize];
        ctx.prev_local = Some((slot, old));
        self.local_hist[slot as usize] = ((old << 1) | update.taken as u32) & self.local_hist_mask;
    }

    fn commit(&mut self, res: &Resolution, ctx: &ScContext, _entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional || !ctx.predicted {
            return;
        }
        let taken = res.taken;
        let wrong = ctx.prediction != taken;
        if wrong {
            self.threshold_ctr.increment();
            if self.threshold_ctr.get() == self.threshold_ctr.max() {
                self.threshold += 1;
                self.threshold_ctr.set(0);
            }
        } else if ctx.sum.abs() < self.threshold {
            self.threshold_ctr.decrement();
            if self.threshold_ctr.get() == self.threshold_ctr.min() {
                self.threshold = (self.threshold - 1).max(1);
                self.threshold_ctr.set(0);
            }
        }

        if wrong || ctx.sum.abs() < self.threshold {
            self.bias[ctx.bias_index as usize].update(taken);
            for (t, table) in self.gehl.iter_mut().enumerate() {
                table[ctx.gehl_indices[t] as usize].update(taken);
            }
            self.local_table[ctx.local_index as usize].update(taken);
        }
    }

    /// Retirement bookkeeping: periodically relaxes the threshold counter.
    fn commit_at_retire(&mut self, res: &Resolution, _ctx: &ScContext, _entropy: &mut Entropy<'_>) {
        if !res.br_type.is_conditional {
            return;
        }
        self.retired += 1;
        if self.retired % THRESHOLD_DECAY_PERIOD == 0 {
            self.threshold_ctr.set(0);
        }
    }

    fn local_recover(&mut self, pc: u64, ctx: &ScContext) {
        if let Some((slot, old)) = ctx.prev_local {
            debug_assert_eq!(slot, self.local_slot(pc));
            self.local_hist[slot as usize] = old;
        }
    }

    fn global_recover(&mut self, ctx: &ScContext) {
        if let Some(ghist) = ctx.ghist_checkpoint {
            self.ghist = ghist;
        }
    }
}
