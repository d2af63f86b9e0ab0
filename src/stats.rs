use std::collections::HashSet;

use serde::Serialize;

use crate::sim::Branch;

#[derive(Default, Debug, Clone)]
pub struct SimStats {
    pub mode: &'static str,
    pub warmup: u64,
    /// Correct-path branches read from the trace, warmup included.
    pub branches: u64,
    /// Measured conditional branches.
    pub conditional_branches: u64,
    pub mispredictions: u64,
    pub flushes: u64,
    pub wrong_path_branches: u64,
    pub unique_branch_pcs: usize,
    pub errors: Vec<String>,
    pcs: HashSet<u64>,
}

/// JSON shape of a finished run.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub metadata: Metadata<'a>,
    pub metrics: Metrics,
    pub errors: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct Metadata<'a> {
    pub simulator: &'a str,
    pub warmup_branches: u64,
    pub num_branches: u64,
    pub num_conditional_branches: u64,
    pub num_branch_pcs: usize,
}

#[derive(Debug, Serialize)]
pub struct Metrics {
    /// Mispredictions per thousand measured branches.
    pub mpkb: f64,
    pub mispredictions: u64,
    pub accuracy: Option<f64>,
    pub flushes: u64,
    pub wrong_path_branches: u64,
}

impl SimStats {
    pub fn new(mode: &'static str, warmup: u64) -> Self {
        Self {
            mode,
            warmup,
            ..Default::default()
        }
    }

    /// Counts a correct-path branch; returns whether it falls past warmup.
    pub fn fetch(&mut self, branch: &Branch) -> bool {
        let measured = self.branches >= self.warmup;
        self.branches += 1;
        self.pcs.insert(branch.pc);
        measured
    }

    pub fn record_conditional(&mut self, measured: bool, mispredicted: bool) {
        if measured {
            self.conditional_branches += 1;
            self.mispredictions += mispredicted as u64;
        }
    }

    pub fn record_flush(&mut self, wrong_path: u32) {
        self.flushes += 1;
        self.wrong_path_branches += wrong_path as u64;
    }

    pub fn finish(&mut self) {
        self.unique_branch_pcs = self.pcs.len();
        if self.warmup > 0 && self.branches <= self.warmup {
            self.errors.push(format!(
                "warmup of {} branches consumed the whole trace ({} branches)",
                self.warmup, self.branches
            ));
        }
    }

    pub fn measured_branches(&self) -> u64 {
        self.branches.saturating_sub(self.warmup)
    }

    pub fn accuracy(&self) -> Option<f64> {
        (self.conditional_branches > 0).then(|| {
            (self.conditional_branches - self.mispredictions) as f64
                / self.conditional_branches as f64
        })
    }

    pub fn mpkb(&self) -> f64 {
        let measured = self.measured_branches();
        if measured > 0 {
            1000.0 * self.mispredictions as f64 / measured as f64
        } else {
            0.0
        }
    }

    pub fn report(&self) -> Report<'_> {
        Report {
            metadata: Metadata {
                simulator: self.mode,
                warmup_branches: self.warmup,
                num_branches: self.branches,
                num_conditional_branches: self.conditional_branches,
                num_branch_pcs: self.unique_branch_pcs,
            },
            metrics: Metrics {
                mpkb: self.mpkb(),
                mispredictions: self.mispredictions,
                accuracy: self.accuracy(),
                flushes: self.flushes,
                wrong_path_branches: self.wrong_path_branches,
            },
            errors: &self.errors,
        }
    }

    pub fn print(&self) {
        println!("\n-----------------------------");
        println!("Mode:                 {}", self.mode);
        println!("Branches:             {}", self.branches);
        println!("Warmup:               {}", self.warmup);
        println!("Branch PCs:           {}", self.unique_branch_pcs);

        match self.accuracy() {
            Some(accuracy) => println!(
                "Branch Prediction:    {:.2}% accuracy ({} / {})",
                accuracy * 100.0,
                self.conditional_branches - self.mispredictions,
                self.conditional_branches
            ),
            None => println!("Branch Prediction:    N/A"),
        }
        println!("MPKB:                 {:.4}", self.mpkb());

        if self.flushes > 0 {
            println!(
                "Flushes:              {} ({} wrong-path branches)",
                self.flushes, self.wrong_path_branches
            );
        }
        for e in &self.errors {
            println!("Error:                {e}");
        }
        println!("-----------------------------");
    }
}
