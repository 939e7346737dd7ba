//! Synchronization engine between a building energy simulator and
//! user-supplied observation and control callbacks.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod error;
pub mod io;
pub mod runner;
/// Channel registry, scheduling, dispatch, and result materialization.
pub mod sim;

pub use error::{EngineError, Result};
