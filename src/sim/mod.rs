/// Actuation maps and their application to the simulator.
pub mod actuation;
pub mod channel;
/// Logical timestep tracking.
pub mod clock;
pub mod engine;
pub mod exchange;
/// Built-in callbacks selectable from configuration.
pub mod policy;
pub mod query;
pub mod results;
pub mod reward;
/// Calling-point registrations.
pub mod schedule;
pub mod scripted;
pub mod summary;
pub mod types;
pub mod views;
