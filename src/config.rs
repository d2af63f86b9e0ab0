//! Predictor configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! overrides:
//!
//! ```
//! use specbp::config::PredictorConfig;
//!
//! let json = r#"{
//!     "max_in_flight_branches": 128,
//!     "use_sc": false,
//!     "tage": { "history_lengths": [5, 12, 27, 60] }
//! }"#;
//! let config: PredictorConfig = serde_json::from_str(json).unwrap();
//! assert_eq!(config.max_in_flight_branches, 128);
//! assert!(config.use_loop_predictor);
//! assert_eq!(config.tage.history_lengths.len(), 4);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on tagged tables in the base predictor and GEHL tables in the
/// corrector; per-branch contexts hold fixed-size index arrays.
pub const MAX_TABLES: usize = 8;

mod defaults {
    pub const MAX_IN_FLIGHT_BRANCHES: usize = 64;
    /// Width of the signed counter arbitrating loop vs. base predictions.
    pub const CONFIDENCE_COUNTER_WIDTH: u32 = 7;

    pub const TAGE_BIMODAL_BITS: u32 = 13;
    pub const TAGE_TABLE_BITS: u32 = 10;
    pub const TAGE_TAG_BITS: u32 = 11;
    pub const TAGE_COUNTER_BITS: u32 = 3;
    pub const TAGE_USEFUL_RESET_PERIOD: u32 = 1 << 18;
    pub const TAGE_HISTORY_LENGTHS: [u32; 6] = [4, 8, 14, 24, 40, 64];

    pub const LOOP_INDEX_BITS: u32 = 6;
    pub const LOOP_TAG_BITS: u32 = 10;
    pub const LOOP_ITER_BITS: u32 = 10;
    pub const LOOP_CONFIDENCE_THRESHOLD: u8 = 3;

    pub const SC_BIAS_BITS: u32 = 9;
    pub const SC_TABLE_BITS: u32 = 9;
    pub const SC_COUNTER_BITS: u32 = 6;
    pub const SC_HISTORY_LENGTHS: [u32; 4] = [3, 7, 13, 21];
    pub const SC_LOCAL_TABLE_BITS: u32 = 6;
    pub const SC_LOCAL_HISTORY_BITS: u32 = 10;
    pub const SC_INITIAL_THRESHOLD: i32 = 35;
}

/// Top-level predictor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Sizes the branch-id ring (rounded up to a power of two).
    #[serde(default = "PredictorConfig::default_max_in_flight")]
    pub max_in_flight_branches: usize,

    #[serde(default = "PredictorConfig::default_true")]
    pub use_loop_predictor: bool,

    /// Enables the statistical corrector stage.
    #[serde(default = "PredictorConfig::default_true")]
    pub use_sc: bool,

    #[serde(default = "PredictorConfig::default_confidence_width")]
    pub confidence_counter_width: u32,

    #[serde(default)]
    pub tage: TageConfig,

    #[serde(default, rename = "loop")]
    pub loop_pred: LoopConfig,

    #[serde(default)]
    pub sc: ScConfig,
}

impl PredictorConfig {
    fn default_max_in_flight() -> usize {
        defaults::MAX_IN_FLIGHT_BRANCHES
    }

    fn default_true() -> bool {
        true
    }

    fn default_confidence_width() -> u32 {
        defaults::CONFIDENCE_COUNTER_WIDTH
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight_branches == 0 {
            return Err(Error::Config("max_in_flight_branches must be > 0".into()));
        }
        if !(2..=16).contains(&self.confidence_counter_width) {
            return Err(Error::Config(format!(
                "confidence_counter_width {} not in 2..=16",
                self.confidence_counter_width
            )));
        }
        self.tage.validate()?;
        self.loop_pred.validate()?;
        self.sc.validate()
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_branches: defaults::MAX_IN_FLIGHT_BRANCHES,
            use_loop_predictor: true,
            use_sc: true,
            confidence_counter_width: defaults::CONFIDENCE_COUNTER_WIDTH,
            tage: TageConfig::default(),
            loop_pred: LoopConfig::default(),
            sc: ScConfig::default(),
        }
    }
}

/// Geometric-history base predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TageConfig {
    /// log2 of the bimodal table size
    #[serde(default = "TageConfig::default_bimodal_bits")]
    pub bimodal_bits: u32,

    /// log2 of each tagged table's size
    #[serde(default = "TageConfig::default_table_bits")]
    pub table_bits: u32,

    #[serde(default = "TageConfig::default_tag_bits")]
    pub tag_bits: u32,

    #[serde(default = "TageConfig::default_counter_bits")]
    pub counter_bits: u32,

    /// Retired conditional branches between useful-bit decays
    #[serde(default = "TageConfig::default_useful_reset_period")]
    pub useful_reset_period: u32,

    /// One entry per tagged table, shortest first, each at most 64
    #[serde(default = "TageConfig::default_history_lengths")]
    pub history_lengths: Vec<u32>,
}

impl TageConfig {
    fn default_bimodal_bits() -> u32 {
        defaults::TAGE_BIMODAL_BITS
    }

    fn default_table_bits() -> u32 {
        defaults::TAGE_TABLE_BITS
    }

    fn default_tag_bits() -> u32 {
        defaults::TAGE_TAG_BITS
    }

    fn default_counter_bits() -> u32 {
        defaults::TAGE_COUNTER_BITS
    }

    fn default_useful_reset_period() -> u32 {
        defaults::TAGE_USEFUL_RESET_PERIOD
    }

    fn default_history_lengths() -> Vec<u32> {
        defaults::TAGE_HISTORY_LENGTHS.to_vec()
    }

    fn validate(&self) -> Result<()> {
        if self.history_lengths.is_empty() || self.history_lengths.len() > MAX_TABLES {
            return Err(Error::Config(format!(
                "tage.history_lengths needs 1..={MAX_TABLES} entries"
            )));
        }
        if self.history_lengths.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(
                "tage.history_lengths must be strictly increasing".into(),
            ));
        }
        if self.history_lengths.iter().any(|&l| l == 0 || l > 64) {
            return Err(Error::Config("tage.history_lengths must be in 1..=64".into()));
        }
        if !(1..=24).contains(&self.bimodal_bits) || !(1..=24).contains(&self.table_bits) {
            return Err(Error::Config("tage table sizes must be 2^1..2^24".into()));
        }
        if !(2..=16).contains(&self.tag_bits) || !(2..=8).contains(&self.counter_bits) {
            return Err(Error::Config("tage tag/counter widths out of range".into()));
        }
        Ok(())
    }
}

impl Default for TageConfig {
    fn default() -> Self {
        Self {
            bimodal_bits: defaults::TAGE_BIMODAL_BITS,
            table_bits: defaults::TAGE_TABLE_BITS,
            tag_bits: defaults::TAGE_TAG_BITS,
            counter_bits: defaults::TAGE_COUNTER_BITS,
            useful_reset_period: defaults::TAGE_USEFUL_RESET_PERIOD,
            history_lengths: defaults::TAGE_HISTORY_LENGTHS.to_vec(),
        }
    }
}

/// Loop predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "LoopConfig::default_index_bits")]
    pub index_bits: u32,

    #[serde(default = "LoopConfig::default_tag_bits")]
    pub tag_bits: u32,

    /// Width of the iteration counters; longer loops are not tracked
    #[serde(default = "LoopConfig::default_iter_bits")]
    pub iter_bits: u32,

    /// Confirmed trip counts needed before predictions are used
    #[serde(default = "LoopConfig::default_confidence_threshold")]
    pub confidence_threshold: u8,
}

impl LoopConfig {
    fn default_index_bits() -> u32 {
        defaults::LOOP_INDEX_BITS
    }

    fn default_tag_bits() -> u32 {
        defaults::LOOP_TAG_BITS
    }

    fn default_iter_bits() -> u32 {
        defaults::LOOP_ITER_BITS
    }

    fn default_confidence_threshold() -> u8 {
        defaults::LOOP_CONFIDENCE_THRESHOLD
    }

    fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.index_bits)
            || !(1..=16).contains(&self.tag_bits)
            || !(2..=16).contains(&self.iter_bits)
        {
            return Err(Error::Config("loop table geometry out of range".into()));
        }
        if self.confidence_threshold == 0 {
            return Err(Error::Config("loop.confidence_threshold must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            index_bits: defaults::LOOP_INDEX_BITS,
            tag_bits: defaults::LOOP_TAG_BITS,
            iter_bits: defaults::LOOP_ITER_BITS,
            confidence_threshold: defaults::LOOP_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Statistical corrector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScConfig {
    #[serde(default = "ScConfig::default_bias_bits")]
    pub bias_bits: u32,

    #[serde(default = "ScConfig::default_table_bits")]
    pub table_bits: u32,

    #[serde(default = "ScConfig::default_counter_bits")]
    pub counter_bits: u32,

    /// Global history lengths of the GEHL tables, each at most 64
    #[serde(default = "ScConfig::default_history_lengths")]
    pub history_lengths: Vec<u32>,

    #[serde(default = "ScConfig::default_local_table_bits")]
    pub local_table_bits: u32,

    #[serde(default = "ScConfig::default_local_history_bits")]
    pub local_history_bits: u32,

    #[serde(default = "ScConfig::default_initial_threshold")]
    pub initial_threshold: i32,
}

impl ScConfig {
    fn default_bias_bits() -> u32 {
        defaults::SC_BIAS_BITS
    }

    fn default_table_bits() -> u32 {
        defaults::SC_TABLE_BITS
    }

    fn default_counter_bits() -> u32 {
        defaults::SC_COUNTER_BITS
    }

    fn default_history_lengths() -> Vec<u32> {
        defaults::SC_HISTORY_LENGTHS.to_vec()
    }

    fn default_local_table_bits() -> u32 {
        defaults::SC_LOCAL_TABLE_BITS
    }

    fn default_local_history_bits() -> u32 {
        defaults::SC_LOCAL_HISTORY_BITS
    }

    fn default_initial_threshold() -> i32 {
        defaults::SC_INITIAL_THRESHOLD
    }

    fn validate(&self) -> Result<()> {
        if self.history_lengths.len() > MAX_TABLES {
            return Err(Error::Config(format!(
                "sc.history_lengths has more than {MAX_TABLES} entries"
            )));
        }
        if self.history_lengths.iter().any(|&l| l == 0 || l > 64) {
            return Err(Error::Config("sc.history_lengths must be in 1..=64".into()));
        }
        if !(1..=20).contains(&self.bias_bits)
            || !(1..=20).contains(&self.table_bits)
            || !(1..=16).contains(&self.local_table_bits)
            || !(1..=32).contains(&self.local_history_bits)
        {
            return Err(Error::Config("sc table geometry out of range".into()));
        }
        if !(2..=8).contains(&self.counter_bits) || self.initial_threshold <= 0 {
            return Err(Error::Config("sc counter width or threshold out of range".into()));
        }
        Ok(())
    }
}

impl Default for ScConfig {
    fn default() -> Self {
        Self {
            bias_bits: defaults::SC_BIAS_BITS,
            table_bits: defaults::SC_TABLE_BITS,
            counter_bits: defaults::SC_COUNTER_BITS,
            history_lengths: defaults::SC_HISTORY_LENGTHS.to_vec(),
            local_table_bits: defaults::SC_LOCAL_TABLE_BITS,
            local_history_bits: defaults::SC_LOCAL_HISTORY_BITS,
            initial_threshold: defaults::SC_INITIAL_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config: PredictorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_in_flight_branches, 64);
        assert!(config.use_loop_predictor && config.use_sc);
        assert_eq!(config.tage.history_lengths, vec![4, 8, 14, 24, 40, 64]);
        config.validate().unwrap();
    }

    #[test]
    fn loop_section_is_named_loop() {
        let config: PredictorConfig =
            serde_json::from_str(r#"{ "loop": { "index_bits": 4 } }"#).unwrap();
        assert_eq!(config.loop_pred.index_bits, 4);
        assert_eq!(config.loop_pred.tag_bits, 10);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = PredictorConfig {
            max_in_flight_branches: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.max_in_flight_branches = 8;
        config.tage.history_lengths = vec![8, 4];
        assert!(config.validate().is_err());

        config.tage.history_lengths = vec![4, 80];
        assert!(config.validate().is_err());
    }
}
