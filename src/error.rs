//! Error taxonomy for the synchronization engine.

use std::io;

use thiserror::Error;

use crate::sim::types::{Category, Descriptor};

/// Errors raised synchronously at the call that violates an engine contract.
///
/// Configuration bugs (duplicates, unresolvable handles, reward arity) are
/// surfaced to the caller and abort the run; nothing is silently coerced.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("channel name \"{name}\" is already registered as {existing}")]
    DuplicateChannel { name: String, existing: Category },

    #[error("channel name \"{0}\" is reserved for a category token")]
    ReservedChannelName(String),

    #[error("calling point {0} is already registered")]
    DuplicateCallingPoint(String),

    #[error("\"{0}\" is not a recognized calling point")]
    InvalidCallingPoint(String),

    #[error("handle for {descriptor} could not be found, check the model for accuracy")]
    HandleResolution { descriptor: Descriptor },

    #[error("actuator \"{0}\" is not tracked or is misspelled")]
    UnknownActuator(String),

    #[error("channel \"{0}\" is not registered")]
    UnknownChannel(String),

    #[error("\"{0}\" is not a weather metric provided by the simulator")]
    UnknownWeatherMetric(String),

    #[error("reward arity mismatch: expected {expected}, got {found}")]
    RewardArityMismatch { expected: usize, found: usize },

    #[error("reward element {index} is not numeric ({value})")]
    NonNumericReward { index: usize, value: f64 },

    #[error("channel \"{0}\" was never actuated and has no data to track")]
    UnusedChannel(String),

    #[error("category tokens must be queried alone, got \"{category}\" mixed with other names")]
    CategoryQueryMix { category: String },

    #[error("{what} frequency must be >= 1")]
    InvalidFrequency { what: &'static str },

    #[error("invalid simulator calendar {year}-{month}-{day} {hour}:{minute}")]
    InvalidCalendar {
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    },

    #[error("configured timestep [{configured}] must equal the model timestep [{model}] per hour")]
    TimestepMismatch { configured: u32, model: u32 },

    #[error("forecast request out of range: {0}")]
    ForecastOutOfRange(String),

    #[error("simulation must complete successfully first (exit status {0})")]
    SimulationFailed(i32),

    #[error("no calling points were registered, there is no table data to collect")]
    NothingTracked,

    #[error("the run has not finished, tables are built only after an exit status is recorded")]
    RunNotFinished,

    #[error("table \"{0}\" is not a category table or declared view")]
    UnknownTable(String),

    #[error("custom view \"{0}\" is already declared")]
    DuplicateView(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
