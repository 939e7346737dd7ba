//! Applies actuation maps returned by user callbacks to the simulator.

use indexmap::IndexMap;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::sim::channel::{ChannelId, ChannelRegistry};
use crate::sim::exchange::DataExchange;
use crate::sim::types::Category;

/// Actuator name → commanded value. `None` relinquishes control.
pub type ActuationMap = IndexMap<String, Option<f64>>;

/// Applies `map` to the simulator and records each command in the
/// actuator's setpoint channel, stamped with global timestep `step`.
///
/// All names are validated before anything is sent, so an unknown name
/// leaves the simulator untouched. A missing or empty map is a no-op.
///
/// Returns the number of actuators commanded.
///
/// # Errors
///
/// Returns [`EngineError::UnknownActuator`] if a name is not a registered
/// actuator channel.
pub fn apply(
    registry: &mut ChannelRegistry,
    sim: &mut dyn DataExchange,
    map: Option<ActuationMap>,
    step: u64,
) -> Result<usize> {
    let Some(map) = map.filter(|m| !m.is_empty()) else {
        info!("no actuators or values returned by the actuation callback");
        return Ok(0);
    };

    let targets = map
        .iter()
        .map(|(name, value)| Ok((actuator_id(registry, name)?, *value)))
        .collect::<Result<Vec<(ChannelId, Option<f64>)>>>()?;

    for (id, value) in &targets {
        let channel = registry.get(*id);
        // Resolution happens before any callback runs.
        if let Some(handle) = channel.handle() {
            match value {
                Some(v) => sim.set_actuator_value(handle, *v),
                None => sim.reset_actuator(handle),
            }
        }
        let setpoint = channel.setpoint();
        registry.get_mut(*id).mark_actuated();
        if let Some(sp) = setpoint {
            registry.get_mut(sp).mark_actuated();
            registry.get_mut(sp).push(None, step, *value);
        }
    }
    Ok(targets.len())
}

fn actuator_id(registry: &ChannelRegistry, name: &str) -> Result<ChannelId> {
    registry
        .by_name(name)
        .filter(|c| c.category() == Category::Actuator)
        .and_then(|_| registry.id(name).ok())
        .ok_or_else(|| EngineError::UnknownActuator(name.to_string()))
}
