//! Speculative-state branch prediction for pipeline simulators.
//!
//! The [`predictor`] module holds the engine: a ring of in-flight branch
//! records, a history-seeded RNG, and the lifecycle that predicts, updates
//! speculative history, commits, retires, and repairs state after a
//! misprediction. [`sim`] drives it from branch traces under a few pipeline
//! models.

pub mod config;
pub mod error;
pub mod predictor;
pub mod sim;
pub mod stats;

pub use config::PredictorConfig;
pub use error::{Error, Result};
pub use predictor::{BranchPredictorUnit, BranchType, SpeculativePredictor};
