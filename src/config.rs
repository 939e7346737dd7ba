//! TOML-based run configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::sim::channel::{SETPOINT_PREFIX, Transform};
use crate::sim::engine::ALLOWED_TIMESTEPS_PER_HOUR;
use crate::sim::policy::{ActPolicy, ObservePolicy};
use crate::sim::scripted::ScriptedConfig;
use crate::sim::types::{CallingPoint, Category, WeatherMetric};

/// Top-level run configuration parsed from TOML.
///
/// Channel tables are keyed by the user-facing channel name and registered
/// in document order. Load with [`RunConfig::from_toml_file`] or use
/// [`RunConfig::single_zone`] for the built-in preset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub variables: IndexMap<String, VariableDecl>,
    #[serde(default)]
    pub internal_variables: IndexMap<String, VariableDecl>,
    #[serde(default)]
    pub meters: IndexMap<String, MeterDecl>,
    #[serde(default)]
    pub weather: IndexMap<String, WeatherDecl>,
    #[serde(default)]
    pub actuators: IndexMap<String, ActuatorDecl>,
    #[serde(default)]
    pub calling_points: Vec<CallingPointDecl>,
    #[serde(default)]
    pub views: Vec<ViewDecl>,
    /// Scripted simulator parameters.
    #[serde(default)]
    pub simulator: ScriptedConfig,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    /// Zone timesteps per hour the model is expected to run at.
    pub timesteps_per_hour: u32,
    /// Field delimiter for exported tables.
    pub delimiter: char,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            timesteps_per_hour: 4,
            delimiter: ',',
        }
    }
}

/// Built-in value encoding attached to a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformDecl {
    /// `"min_max_saturate"` or `"scale"`.
    pub kind: String,
    #[serde(default)]
    pub args: Vec<f64>,
}

impl TransformDecl {
    pub fn build(&self) -> Option<Transform> {
        Transform::builtin(&self.kind, &self.args)
    }
}

/// Output variable or internal variable: `(name, key)` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDecl {
    pub name: String,
    pub key: String,
    pub transform: Option<TransformDecl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterDecl {
    pub meter: String,
    pub transform: Option<TransformDecl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeatherDecl {
    pub metric: WeatherMetric,
    pub transform: Option<TransformDecl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorDecl {
    pub component_type: String,
    pub control_type: String,
    pub key: String,
    pub transform: Option<TransformDecl>,
}

/// Callbacks attached to one calling point.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallingPointDecl {
    pub point: CallingPoint,
    #[serde(default)]
    pub update_state: bool,
    pub observe: Option<ObservePolicy>,
    pub act: Option<ActPolicy>,
    #[serde(default = "one")]
    pub observe_every_n: u32,
    #[serde(default = "one")]
    pub act_every_n: u32,
}

/// Custom view declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewDecl {
    pub name: String,
    pub point: CallingPoint,
    #[serde(default = "one")]
    pub frequency: u32,
    pub channels: Vec<String>,
}

fn one() -> u32 {
    1
}

/// Configuration validation error.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted path to the offending field.
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl RunConfig {
    /// One heated zone observed at the start of every zone timestep, with a
    /// comfort reward and an occupancy schedule on the heating setpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the bundled preset no longer parses.
    pub fn single_zone() -> Result<Self, ConfigError> {
        // Built from TOML so the preset and the sample file share one schema.
        Self::from_toml_str(SINGLE_ZONE_TOML).map_err(|e| ConfigError {
            field: "preset.single_zone".to_string(),
            message: e.message,
        })
    }

    pub const PRESETS: &[&str] = &["single_zone"];

    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "single_zone" => Self::single_zone(),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Delimiter as a byte, if it is a single ASCII character.
    pub fn delimiter_byte(&self) -> Option<u8> {
        u8::try_from(self.run.delimiter).ok().filter(u8::is_ascii)
    }

    /// All declared channel names in registration order.
    fn channel_names(&self) -> Vec<(&str, &'static str)> {
        let mut names: Vec<(&str, &'static str)> = Vec::new();
        names.extend(self.variables.keys().map(|k| (k.as_str(), "variables")));
        names.extend(self.internal_variables.keys().map(|k| (k.as_str(), "internal_variables")));
        names.extend(self.meters.keys().map(|k| (k.as_str(), "meters")));
        names.extend(self.weather.keys().map(|k| (k.as_str(), "weather")));
        names.extend(self.actuators.keys().map(|k| (k.as_str(), "actuators")));
        names
    }

    /// Checks everything that can be checked before the engine is built.
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| errors.push(ConfigError { field, message });

        let r = &self.run;
        if !ALLOWED_TIMESTEPS_PER_HOUR.contains(&r.timesteps_per_hour) {
            push(
                "run.timesteps_per_hour".into(),
                format!("must be one of {ALLOWED_TIMESTEPS_PER_HOUR:?}"),
            );
        }
        if self.delimiter_byte().is_none() {
            push("run.delimiter".into(), "must be a single ASCII character".into());
        }

        let mut seen = std::collections::HashSet::new();
        for (name, section) in self.channel_names() {
            if Category::from_token(name).is_some() || name == "reward" {
                push(format!("{section}.{name}"), "name is reserved".into());
            }
            if !seen.insert(name) {
                push(format!("{section}.{name}"), "channel name declared more than once".into());
            }
        }
        for name in self.actuators.keys() {
            let sp = format!("{SETPOINT_PREFIX}{name}");
            if seen.contains(sp.as_str()) {
                push(format!("actuators.{name}"), format!("derived name \"{sp}\" is taken"));
            }
        }

        let transforms = self
            .variables
            .iter()
            .map(|(n, d)| (format!("variables.{n}"), &d.transform))
            .chain(
                self.internal_variables
                    .iter()
                    .map(|(n, d)| (format!("internal_variables.{n}"), &d.transform)),
            )
            .chain(self.meters.iter().map(|(n, d)| (format!("meters.{n}"), &d.transform)))
            .chain(self.weather.iter().map(|(n, d)| (format!("weather.{n}"), &d.transform)))
            .chain(self.actuators.iter().map(|(n, d)| (format!("actuators.{n}"), &d.transform)));
        for (field, t) in transforms {
            if let Some(t) = t.as_ref().filter(|t| t.build().is_none()) {
                push(
                    format!("{field}.transform"),
                    format!("unsupported transform \"{}\" with {} args", t.kind, t.args.len()),
                );
            }
        }

        let mut points = std::collections::HashSet::new();
        for (i, cp) in self.calling_points.iter().enumerate() {
            let field = format!("calling_points[{i}]");
            if !points.insert(cp.point) {
                push(field.clone(), format!("{} registered more than once", cp.point));
            }
            if cp.observe_every_n == 0 || cp.act_every_n == 0 {
                push(field.clone(), "frequencies must be >= 1".into());
            }
            if cp.observe.is_some() && !cp.update_state {
                push(
                    format!("{field}.observe"),
                    "observation only runs where update_state = true".into(),
                );
            }
            if let Some(act) = &cp.act {
                for name in act.actuators() {
                    if !self.actuators.contains_key(name) {
                        push(format!("{field}.act"), format!("\"{name}\" is not a declared actuator"));
                    }
                }
            }
        }

        for (i, v) in self.views.iter().enumerate() {
            let field = format!("views[{i}]");
            if v.frequency == 0 {
                push(field.clone(), "frequency must be >= 1".into());
            }
            if !points.contains(&v.point) {
                push(field.clone(), format!("{} is not a registered calling point", v.point));
            }
        }

        let s = &self.simulator;
        if s.days == 0 {
            push("simulator.days".into(), "must be > 0".into());
        }
        if !ALLOWED_TIMESTEPS_PER_HOUR.contains(&s.timesteps_per_hour) {
            push(
                "simulator.timesteps_per_hour".into(),
                format!("must be one of {ALLOWED_TIMESTEPS_PER_HOUR:?}"),
            );
        }
        if s.heater_kw < 0.0 {
            push("simulator.heater_kw".into(), "must be >= 0".into());
        }
        if s.noise_std < 0.0 {
            push("simulator.noise_std".into(), "must be >= 0".into());
        }

        errors
    }
}

/// Source of the `single_zone` preset, also shipped as
/// `scenarios/single_zone.toml`.
pub const SINGLE_ZONE_TOML: &str = include_str!("../scenarios/single_zone.toml");
