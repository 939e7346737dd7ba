//! Built-in observation and actuation callbacks selectable from a run
//! configuration.

use chrono::Timelike;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::sim::actuation::ActuationMap;
use crate::sim::query::CallbackContext;
use crate::sim::types::Reward;

/// Distance of `value` outside `[low, high]`, zero inside the band.
fn band_violation(value: f64, low: f64, high: f64) -> f64 {
    if value < low {
        low - value
    } else if value > high {
        value - high
    } else {
        0.0
    }
}

/// Reward functions computed from the latest channel readings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservePolicy {
    /// Scalar reward `-(distance of channel outside [low, high])`.
    ComfortBand { channel: String, low: f64, high: f64 },
    /// Two-element reward `[comfort, -weight * energy]`.
    ComfortEnergy {
        channel: String,
        low: f64,
        high: f64,
        energy: String,
        #[serde(default = "default_weight")]
        weight: f64,
    },
}

fn default_weight() -> f64 {
    1.0
}

impl ObservePolicy {
    /// Computes the reward, or `None` while a required reading is missing.
    pub fn reward(&self, ctx: &CallbackContext<'_>) -> Option<Reward> {
        match self {
            ObservePolicy::ComfortBand { channel, low, high } => {
                let t = ctx.latest(channel).ok().flatten()?;
                Some(Reward::Scalar(-band_violation(t, *low, *high)))
            }
            ObservePolicy::ComfortEnergy {
                channel,
                low,
                high,
                energy,
                weight,
            } => {
                let t = ctx.latest(channel).ok().flatten()?;
                let e = ctx.latest(energy).ok().flatten()?;
                Some(Reward::Vector(vec![
                    -band_violation(t, *low, *high),
                    -weight * e,
                ]))
            }
        }
    }

    pub fn into_callback(self) -> impl FnMut(&mut CallbackContext<'_>) -> Option<Reward> + 'static {
        move |ctx: &mut CallbackContext<'_>| self.reward(ctx)
    }
}

/// Actuation strategies producing an [`ActuationMap`] each call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActPolicy {
    /// Fixed value per actuator.
    Constant { values: IndexMap<String, f64> },
    /// Hand every listed actuator back to the simulator.
    Release { actuators: Vec<String> },
    /// `occupied` from `start_hour` (inclusive) to `end_hour` (exclusive),
    /// `unoccupied` otherwise.
    Schedule {
        actuator: String,
        occupied: f64,
        unoccupied: f64,
        start_hour: u32,
        end_hour: u32,
    },
    /// On/off control: command `on` below `low`, release above `high`,
    /// leave unchanged in between.
    Thermostat {
        actuator: String,
        channel: String,
        low: f64,
        high: f64,
        on: f64,
    },
}

impl ActPolicy {
    /// Builds this call's actuation map, or `None` for "no actuation".
    pub fn actuation(&self, ctx: &CallbackContext<'_>) -> Option<ActuationMap> {
        match self {
            ActPolicy::Constant { values } => Some(
                values
                    .iter()
                    .map(|(name, v)| (name.clone(), Some(*v)))
                    .collect(),
            ),
            ActPolicy::Release { actuators } => {
                Some(actuators.iter().map(|name| (name.clone(), None)).collect())
            }
            ActPolicy::Schedule {
                actuator,
                occupied,
                unoccupied,
                start_hour,
                end_hour,
            } => {
                let hour = ctx.calendar()?.hour();
                let value = if (*start_hour..*end_hour).contains(&hour) {
                    *occupied
                } else {
                    *unoccupied
                };
                Some(ActuationMap::from([(actuator.clone(), Some(value))]))
            }
            ActPolicy::Thermostat {
                actuator,
                channel,
                low,
                high,
                on,
            } => {
                let t = ctx.latest(channel).ok().flatten()?;
                if t < *low {
                    Some(ActuationMap::from([(actuator.clone(), Some(*on))]))
                } else if t > *high {
                    Some(ActuationMap::from([(actuator.clone(), None)]))
                } else {
                    None
                }
            }
        }
    }

    /// Actuators this policy commands, for config validation.
    pub fn actuators(&self) -> Vec<&str> {
        match self {
            ActPolicy::Constant { values } => values.keys().map(String::as_str).collect(),
            ActPolicy::Release { actuators } => actuators.iter().map(String::as_str).collect(),
            ActPolicy::Schedule { actuator, .. } | ActPolicy::Thermostat { actuator, .. } => {
                vec![actuator.as_str()]
            }
        }
    }

    pub fn into_callback(
        self,
    ) -> impl FnMut(&mut CallbackContext<'_>) -> Option<ActuationMap> + 'static {
        move |ctx: &mut CallbackContext<'_>| self.actuation(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_violation_is_zero_inside() {
        assert_eq!(band_violation(21.0, 20.0, 24.0), 0.0);
        assert_eq!(band_violation(18.5, 20.0, 24.0), 1.5);
        assert_eq!(band_violation(25.0, 20.0, 24.0), 1.0);
    }

    #[test]
    fn policies_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrap {
            observe: ObservePolicy,
            act: ActPolicy,
        }
        let w: Wrap = toml::from_str(
            r#"
observe = { kind = "comfort_band", channel = "zn0", low = 20.0, high = 24.0 }
act = { kind = "schedule", actuator = "heat", occupied = 21.0, unoccupied = 16.0, start_hour = 7, end_hour = 19 }
"#,
        )
        .unwrap();
        assert!(matches!(w.observe, ObservePolicy::ComfortBand { .. }));
        assert_eq!(w.act.actuators(), vec!["heat"]);
    }

    #[test]
    fn comfort_energy_defaults_weight() {
        let p: ObservePolicy = toml::from_str(
            r#"
kind = "comfort_energy"
channel = "zn0"
low = 20.0
high = 24.0
energy = "elec"
"#,
        )
        .unwrap();
        assert!(matches!(p, ObservePolicy::ComfortEnergy { weight, .. } if weight == 1.0));
    }
}
