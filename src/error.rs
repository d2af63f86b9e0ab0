//! Error types.
//!
//! Lifecycle calls on the predictor never return these: a violated calling
//! contract is a modelling bug in the host pipeline and panics with the
//! message of the matching variant. The fallible outer surfaces (config
//! files, traces, the CLI) propagate them with `?`.

use thiserror::Error;

use crate::predictor::Stage;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the branch-id ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("branch arena full: {capacity} branches already in flight")]
    Full { capacity: usize },

    #[error("branch arena empty: nothing to retire")]
    Empty,

    #[error("out-of-order retirement: id {id} retired while front is {front}")]
    OutOfOrderRetire { id: u32, front: u32 },

    #[error("stale branch id {id}: live window is [{front}, {back}]")]
    StaleId { id: u32, front: u32, back: u32 },
}

/// Crate-level errors
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("branch {id}: {operation} not allowed in stage {stage:?}")]
    Lifecycle {
        id: u32,
        operation: &'static str,
        stage: Stage,
    },

    #[error("counter value {value} outside [{min}, {max}]")]
    CounterRange { value: i32, min: i32, max: i32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("trace line {line}: {message}")]
    Trace { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
