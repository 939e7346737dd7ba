//! Channel registry, handle resolution, and per-channel buffered history.

use std::collections::HashMap;
use std::fmt;

use chrono::Timelike;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::sim::clock::RowStamp;
use crate::sim::exchange::DataExchange;
use crate::sim::types::{
    Category, Day, Descriptor, Handle, Reading, TimeField, WeatherMetric, time_field_value,
};

/// Name used in custom views to capture the latest reward.
pub const REWARD_TOKEN: &str = "reward";

/// Prefix of the setpoint companion channel derived for each actuator.
pub const SETPOINT_PREFIX: &str = "setpoint_";

/// Index of a channel in the registry arena, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

/// Reference to a channel by name or by arena index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Name(String),
    Id(ChannelId),
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        ChannelRef::Name(name.to_string())
    }
}

impl From<String> for ChannelRef {
    fn from(name: String) -> Self {
        ChannelRef::Name(name)
    }
}

impl From<ChannelId> for ChannelRef {
    fn from(id: ChannelId) -> Self {
        ChannelRef::Id(id)
    }
}

type TransformFn = dyn Fn(f64, &[f64]) -> f64;

/// Pure value encoding applied to every fresh reading of a channel.
///
/// The function receives the raw value first, then the stored extra args.
pub struct Transform {
    func: Box<TransformFn>,
    args: Vec<f64>,
}

impl Transform {
    pub fn new(func: impl Fn(f64, &[f64]) -> f64 + 'static, args: Vec<f64>) -> Self {
        Self {
            func: Box::new(func),
            args,
        }
    }

    /// Linear map of `[min, max]` onto `[-1, 1]`, saturating outside the range.
    ///
    /// Returns `None` unless both bounds are finite and `min < max`.
    pub fn min_max_saturate(min: f64, max: f64) -> Option<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return None;
        }
        Some(Self::new(
            |value, args| {
                let (min, max) = (args[0], args[1]);
                if value > max {
                    1.0
                } else if value < min {
                    -1.0
                } else {
                    (value - min) / (max - min) * 2.0 - 1.0
                }
            },
            vec![min, max],
        ))
    }

    /// `value * factor + offset`.
    pub fn scale(factor: f64, offset: f64) -> Self {
        Self::new(|value, args| value * args[0] + args[1], vec![factor, offset])
    }

    /// Builds one of the named built-in transforms, if `kind` and the
    /// argument count are recognized.
    pub fn builtin(kind: &str, args: &[f64]) -> Option<Self> {
        match (kind, args) {
            ("min_max_saturate", [min, max]) => Self::min_max_saturate(*min, *max),
            ("scale", [factor]) => Some(Self::scale(*factor, 0.0)),
            ("scale", [factor, offset]) => Some(Self::scale(*factor, *offset)),
            _ => None,
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        (self.func)(value, &self.args)
    }

    pub fn args(&self) -> &[f64] {
        &self.args
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("args", &self.args).finish_non_exhaustive()
    }
}

/// One buffered reading.
///
/// State refreshes stamp the row they open. Setpoint commands carry no row
/// and are placed by `step` when tables are built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub row: Option<usize>,
    /// Global timestep the reading was taken at.
    pub step: u64,
    pub value: Reading,
}

/// A uniquely named, typed, time-ordered data feed.
#[derive(Debug)]
pub struct Channel {
    name: String,
    descriptor: Descriptor,
    handle: Option<Handle>,
    history: Vec<Sample>,
    transform: Option<Transform>,
    encoded: Reading,
    /// Setpoint companion, for actuator channels.
    setpoint: Option<ChannelId>,
    actuated: bool,
}

impl Channel {
    fn new(name: String, descriptor: Descriptor, transform: Option<Transform>) -> Self {
        Self {
            name,
            descriptor,
            handle: None,
            history: Vec::new(),
            transform,
            encoded: None,
            setpoint: None,
            actuated: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.descriptor.category()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn history(&self) -> &[Sample] {
        &self.history
    }

    /// Readings in append order.
    pub fn values(&self) -> Vec<Reading> {
        self.history.iter().map(|s| s.value).collect()
    }

    /// Most recently appended reading, if any.
    pub fn latest(&self) -> Option<Reading> {
        self.history.last().map(|s| s.value)
    }

    /// Latest transformed value. Equals the latest raw value when the
    /// channel has no transform.
    pub fn encoded(&self) -> Reading {
        if self.transform.is_some() {
            self.encoded
        } else {
            self.latest().flatten()
        }
    }

    pub fn setpoint(&self) -> Option<ChannelId> {
        self.setpoint
    }

    /// Whether an actuation has ever targeted this channel.
    pub fn is_actuated(&self) -> bool {
        self.actuated
    }

    pub(crate) fn push(&mut self, row: Option<usize>, step: u64, value: Reading) {
        if let Some(t) = &self.transform {
            self.encoded = value.map(|v| t.apply(v));
        }
        self.history.push(Sample { row, step, value });
    }

    pub(crate) fn mark_actuated(&mut self) {
        self.actuated = true;
    }

    fn clear(&mut self) {
        self.handle = None;
        self.history.clear();
        self.encoded = None;
        self.actuated = false;
    }
}

/// Registry owning every channel of one engine, indexed by name.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    by_name: HashMap<String, ChannelId>,
    handles_resolved: bool,
    static_read: bool,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Creates a registry pre-populated with the built-in `Time` channels.
    pub fn new() -> Self {
        let mut registry = Self {
            channels: Vec::new(),
            by_name: HashMap::new(),
            handles_resolved: false,
            static_read: false,
        };
        for field in TimeField::ALL {
            registry.insert(field.channel_name().to_string(), Descriptor::Time(field), None);
        }
        registry
    }

    /// Registers a channel under a globally unique `name`.
    ///
    /// Registering an actuator also registers its `setpoint_<name>` companion.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateChannel`] if `name` (or the derived setpoint
    ///   name) already exists in any category.
    /// - [`EngineError::ReservedChannelName`] if `name` is a category token.
    pub fn register(
        &mut self,
        name: &str,
        descriptor: Descriptor,
        transform: Option<Transform>,
    ) -> Result<ChannelId> {
        if Category::from_token(name).is_some() || name == REWARD_TOKEN {
            return Err(EngineError::ReservedChannelName(name.to_string()));
        }
        if matches!(descriptor, Descriptor::Setpoint(_) | Descriptor::Time(_)) {
            return Err(EngineError::ReservedChannelName(name.to_string()));
        }
        self.ensure_free(name)?;

        if matches!(descriptor, Descriptor::Actuator { .. }) {
            let setpoint_name = format!("{SETPOINT_PREFIX}{name}");
            self.ensure_free(&setpoint_name)?;
            let id = self.insert(name.to_string(), descriptor, transform);
            let sp = self.insert(setpoint_name, Descriptor::Setpoint(name.to_string()), None);
            self.channels[id.0].setpoint = Some(sp);
            return Ok(id);
        }

        Ok(self.insert(name.to_string(), descriptor, transform))
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        match self.by_name.get(name) {
            Some(id) => Err(EngineError::DuplicateChannel {
                name: name.to_string(),
                existing: self.channels[id.0].category(),
            }),
            None => Ok(()),
        }
    }

    fn insert(
        &mut self,
        name: String,
        descriptor: Descriptor,
        transform: Option<Transform>,
    ) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.by_name.insert(name.clone(), id);
        self.channels.push(Channel::new(name, descriptor, transform));
        id
    }

    /// Looks up a channel id by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownChannel`] if no channel has this name.
    pub fn id(&self, name: &str) -> Result<ChannelId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownChannel(name.to_string()))
    }

    /// Resolves a [`ChannelRef`] to an arena index.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownChannel`] for unknown names or ids.
    pub fn lookup(&self, channel: &ChannelRef) -> Result<ChannelId> {
        match channel {
            ChannelRef::Name(name) => self.id(name),
            ChannelRef::Id(id) if id.0 < self.channels.len() => Ok(*id),
            ChannelRef::Id(id) => Err(EngineError::UnknownChannel(format!("#{}", id.0))),
        }
    }

    pub fn get(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    /// Channel by name, if registered.
    pub fn by_name(&self, name: &str) -> Option<&Channel> {
        self.by_name.get(name).map(|id| &self.channels[id.0])
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// All channels in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels.iter().enumerate().map(|(i, c)| (ChannelId(i), c))
    }

    /// Channels of one category in registration order.
    pub fn of_category(&self, category: Category) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.iter().filter(move |(_, c)| c.category() == category)
    }

    /// Whether any user channel of `category` is registered.
    pub fn tracks(&self, category: Category) -> bool {
        self.of_category(category).next().is_some()
    }

    pub fn handles_resolved(&self) -> bool {
        self.handles_resolved
    }

    /// Resolves every channel descriptor to a simulator handle.
    ///
    /// Does nothing until `sim` reports its data model ready, and nothing
    /// after the first successful resolution. Returns whether handles are
    /// resolved after the call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HandleResolution`] naming the first descriptor
    /// the simulator could not find.
    pub fn resolve_all(&mut self, sim: &mut dyn DataExchange) -> Result<bool> {
        if self.handles_resolved {
            return Ok(true);
        }
        if !sim.api_data_fully_ready() {
            debug!("simulator data not ready, deferring handle resolution");
            return Ok(false);
        }

        for channel in &mut self.channels {
            let handle = match &channel.descriptor {
                Descriptor::Variable { name, key } => sim.variable_handle(name, key),
                Descriptor::InternalVariable { kind, key } => {
                    sim.internal_variable_handle(kind, key)
                }
                Descriptor::Meter(name) => sim.meter_handle(name),
                Descriptor::Actuator {
                    component_type,
                    control_type,
                    key,
                } => sim.actuator_handle(component_type, control_type, key),
                Descriptor::Weather(_) | Descriptor::Setpoint(_) | Descriptor::Time(_) => continue,
            };
            match handle {
                Some(h) => channel.handle = Some(h),
                None => {
                    return Err(EngineError::HandleResolution {
                        descriptor: channel.descriptor.clone(),
                    });
                }
            }
        }

        self.handles_resolved = true;
        info!(channels = self.channels.len(), "resolved all channel handles");
        Ok(true)
    }

    /// Appends the current reading of every channel to its history.
    ///
    /// Weather channels read today's value at the current hour and substep,
    /// internal variables are read on the first refresh only, and setpoint
    /// channels are left to the actuation dispatcher.
    pub(crate) fn refresh(&mut self, sim: &mut dyn DataExchange, row: usize, stamp: &RowStamp) {
        let hour = stamp.calendar.hour();
        let read_static = !self.static_read;

        for channel in &mut self.channels {
            let value = match (&channel.descriptor, channel.handle) {
                (Descriptor::Time(field), _) => Some(time_field_value(
                    *field,
                    &stamp.calendar,
                    stamp.zone_substep,
                    stamp.global_step,
                )),
                (Descriptor::Weather(WeatherMetric::SunIsUp), _) => {
                    Some(if sim.sun_is_up() { 1.0 } else { 0.0 })
                }
                (Descriptor::Weather(metric), _) => {
                    Some(sim.weather_at_time(*metric, Day::Today, hour, stamp.zone_substep))
                }
                (Descriptor::InternalVariable { .. }, Some(h)) if read_static => {
                    Some(sim.internal_variable_value(h))
                }
                (Descriptor::Variable { .. }, Some(h)) => Some(sim.variable_value(h)),
                (Descriptor::Meter(_), Some(h)) => Some(sim.meter_value(h)),
                (Descriptor::Actuator { .. }, Some(h)) => Some(sim.actuator_value(h)),
                _ => continue,
            };
            channel.push(Some(row), stamp.global_step, value);
        }
        self.static_read = true;
    }

    /// Clears handles and histories for reuse in a new run.
    pub(crate) fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
        self.handles_resolved = false;
        self.static_read = false;
    }
}
