//! Simulator-facing interface.
//!
//! The simulator owns the clock and the handle namespace. The engine only
//! calls these primitives synchronously from inside a dispatch and caches
//! the handles it resolves.

use crate::error::Result;
use crate::sim::engine::Engine;
use crate::sim::types::{Day, ExitStatus, Handle, WeatherMetric};

/// Handle/value read-write primitives exposed by a running simulator.
///
/// Lookups return `None` when the simulator reports "not found".
pub trait DataExchange {
    /// Returns `true` once the simulator's data model can be queried.
    fn api_data_fully_ready(&self) -> bool;

    /// Zone timestep length in fractional hours (`0.25` for 4 per hour).
    fn zone_time_step(&self) -> f64;

    fn variable_handle(&mut self, name: &str, key: &str) -> Option<Handle>;
    fn internal_variable_handle(&mut self, kind: &str, key: &str) -> Option<Handle>;
    fn meter_handle(&mut self, name: &str) -> Option<Handle>;
    fn actuator_handle(
        &mut self,
        component_type: &str,
        control_type: &str,
        key: &str,
    ) -> Option<Handle>;

    fn variable_value(&mut self, handle: Handle) -> f64;
    fn internal_variable_value(&mut self, handle: Handle) -> f64;
    fn meter_value(&mut self, handle: Handle) -> f64;
    fn actuator_value(&mut self, handle: Handle) -> f64;

    /// Weather metric value for `day` at the given hour and zone substep.
    fn weather_at_time(&mut self, metric: WeatherMetric, day: Day, hour: u32, substep: u32)
    -> f64;
    fn sun_is_up(&mut self) -> bool;

    /// Overrides the actuated quantity with `value`.
    fn set_actuator_value(&mut self, handle: Handle, value: f64);
    /// Returns control of the actuated quantity to the simulator.
    fn reset_actuator(&mut self, handle: Handle);
}

/// A simulator that drives a run by calling [`Engine::dispatch`] at its
/// declared calling points.
pub trait Runtime: DataExchange {
    /// Runs the simulation to completion and returns its exit status.
    ///
    /// # Errors
    ///
    /// Implementations propagate the first dispatch error, aborting the run.
    fn run_simulation(&mut self, engine: &mut Engine) -> Result<ExitStatus>;
}
