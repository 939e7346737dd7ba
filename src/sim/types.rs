//! Core engine types: channel categories, descriptors, calling points, ticks.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A single buffered reading. `None` marks an unset or relinquished value.
pub type Reading = Option<f64>;

/// Category of a tracked channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Variable,
    InternalVariable,
    Meter,
    Weather,
    Actuator,
    Setpoint,
    Time,
}

impl Category {
    /// All categories in default table order.
    pub const ALL: [Category; 7] = [
        Category::Variable,
        Category::InternalVariable,
        Category::Meter,
        Category::Weather,
        Category::Actuator,
        Category::Setpoint,
        Category::Time,
    ];

    /// Query token naming the whole category (`var`, `intvar`, ...).
    pub fn token(self) -> &'static str {
        match self {
            Category::Variable => "var",
            Category::InternalVariable => "intvar",
            Category::Meter => "meter",
            Category::Weather => "weather",
            Category::Actuator => "actuator",
            Category::Setpoint => "setpoint",
            Category::Time => "time",
        }
    }

    /// Parses a category query token, returning `None` for channel names.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Weather metrics the simulator can report for a given day, hour and substep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherMetric {
    SunIsUp,
    IsRaining,
    IsSnowing,
    Albedo,
    BeamSolar,
    DiffuseSolar,
    HorizontalIr,
    LiquidPrecipitation,
    OutdoorBarometricPressure,
    OutdoorDewPoint,
    OutdoorDryBulb,
    OutdoorRelativeHumidity,
    SkyTemperature,
    WindDirection,
    WindSpeed,
}

impl WeatherMetric {
    pub const ALL: [WeatherMetric; 15] = [
        WeatherMetric::SunIsUp,
        WeatherMetric::IsRaining,
        WeatherMetric::IsSnowing,
        WeatherMetric::Albedo,
        WeatherMetric::BeamSolar,
        WeatherMetric::DiffuseSolar,
        WeatherMetric::HorizontalIr,
        WeatherMetric::LiquidPrecipitation,
        WeatherMetric::OutdoorBarometricPressure,
        WeatherMetric::OutdoorDewPoint,
        WeatherMetric::OutdoorDryBulb,
        WeatherMetric::OutdoorRelativeHumidity,
        WeatherMetric::SkyTemperature,
        WeatherMetric::WindDirection,
        WeatherMetric::WindSpeed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WeatherMetric::SunIsUp => "sun_is_up",
            WeatherMetric::IsRaining => "is_raining",
            WeatherMetric::IsSnowing => "is_snowing",
            WeatherMetric::Albedo => "albedo",
            WeatherMetric::BeamSolar => "beam_solar",
            WeatherMetric::DiffuseSolar => "diffuse_solar",
            WeatherMetric::HorizontalIr => "horizontal_ir",
            WeatherMetric::LiquidPrecipitation => "liquid_precipitation",
            WeatherMetric::OutdoorBarometricPressure => "outdoor_barometric_pressure",
            WeatherMetric::OutdoorDewPoint => "outdoor_dew_point",
            WeatherMetric::OutdoorDryBulb => "outdoor_dry_bulb",
            WeatherMetric::OutdoorRelativeHumidity => "outdoor_relative_humidity",
            WeatherMetric::SkyTemperature => "sky_temperature",
            WeatherMetric::WindDirection => "wind_direction",
            WeatherMetric::WindSpeed => "wind_speed",
        }
    }
}

impl FromStr for WeatherMetric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| EngineError::UnknownWeatherMetric(s.to_string()))
    }
}

/// Built-in timing quantities tracked as `Time` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimeField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    ZoneSubstep,
    GlobalStep,
}

impl TimeField {
    pub const ALL: [TimeField; 7] = [
        TimeField::Year,
        TimeField::Month,
        TimeField::Day,
        TimeField::Hour,
        TimeField::Minute,
        TimeField::ZoneSubstep,
        TimeField::GlobalStep,
    ];

    /// Reserved channel name for this field.
    pub fn channel_name(self) -> &'static str {
        match self {
            TimeField::Year => "t_year",
            TimeField::Month => "t_month",
            TimeField::Day => "t_day",
            TimeField::Hour => "t_hour",
            TimeField::Minute => "t_minute",
            TimeField::ZoneSubstep => "t_zone_substep",
            TimeField::GlobalStep => "t_global_step",
        }
    }
}

/// Lookup key the simulator uses to look up a channel's handle.
///
/// The shape is category specific: variables are `(metric, key)`, meters a
/// single name, actuators `(component_type, control_type, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Descriptor {
    Variable {
        name: String,
        key: String,
    },
    InternalVariable {
        kind: String,
        key: String,
    },
    Meter(String),
    Weather(WeatherMetric),
    Actuator {
        component_type: String,
        control_type: String,
        key: String,
    },
    /// Companion of the named actuator channel; carries no simulator handle.
    Setpoint(String),
    Time(TimeField),
}

impl Descriptor {
    /// Category implied by the descriptor shape.
    pub fn category(&self) -> Category {
        match self {
            Descriptor::Variable { .. } => Category::Variable,
            Descriptor::InternalVariable { .. } => Category::InternalVariable,
            Descriptor::Meter(_) => Category::Meter,
            Descriptor::Weather(_) => Category::Weather,
            Descriptor::Actuator { .. } => Category::Actuator,
            Descriptor::Setpoint(_) => Category::Setpoint,
            Descriptor::Time(_) => Category::Time,
        }
    }

    pub fn variable(name: impl Into<String>, key: impl Into<String>) -> Self {
        Descriptor::Variable {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn internal_variable(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Descriptor::InternalVariable {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn meter(name: impl Into<String>) -> Self {
        Descriptor::Meter(name.into())
    }

    pub fn actuator(
        component_type: impl Into<String>,
        control_type: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Descriptor::Actuator {
            component_type: component_type.into(),
            control_type: control_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Variable { name, key } => write!(f, "[{name}, {key}]"),
            Descriptor::InternalVariable { kind, key } => write!(f, "[{kind}, {key}]"),
            Descriptor::Meter(name) => write!(f, "[{name}]"),
            Descriptor::Weather(metric) => write!(f, "[{}]", metric.as_str()),
            Descriptor::Actuator {
                component_type,
                control_type,
                key,
            } => write!(f, "[{component_type}, {control_type}, {key}]"),
            Descriptor::Setpoint(actuator) => write!(f, "[setpoint of {actuator}]"),
            Descriptor::Time(field) => write!(f, "[{}]", field.channel_name()),
        }
    }
}

/// Opaque simulator-internal identifier for a resolved channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Handle(pub i32);

/// Instants during a simulator run at which registered callbacks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CallingPoint {
    AfterComponentGetInput,
    EndZoneSizing,
    EndSystemSizing,
    BeginNewEnvironment,
    AfterNewEnvironmentWarmupComplete,
    BeginZoneTimestepBeforeInitHeatBalance,
    BeginZoneTimestepAfterInitHeatBalance,
    AfterPredictorBeforeHvacManagers,
    AfterPredictorAfterHvacManagers,
    BeginSystemTimestepBeforePredictor,
    BeginZoneTimestepBeforeSetCurrentWeather,
    EndSystemTimestepAfterHvacReporting,
    EndSystemTimestepBeforeHvacReporting,
    EndZoneTimestepAfterZoneReporting,
    EndZoneTimestepBeforeZoneReporting,
    InsideSystemIterationLoop,
}

impl CallingPoint {
    pub const ALL: [CallingPoint; 16] = [
        CallingPoint::AfterComponentGetInput,
        CallingPoint::EndZoneSizing,
        CallingPoint::EndSystemSizing,
        CallingPoint::BeginNewEnvironment,
        CallingPoint::AfterNewEnvironmentWarmupComplete,
        CallingPoint::BeginZoneTimestepBeforeInitHeatBalance,
        CallingPoint::BeginZoneTimestepAfterInitHeatBalance,
        CallingPoint::AfterPredictorBeforeHvacManagers,
        CallingPoint::AfterPredictorAfterHvacManagers,
        CallingPoint::BeginSystemTimestepBeforePredictor,
        CallingPoint::BeginZoneTimestepBeforeSetCurrentWeather,
        CallingPoint::EndSystemTimestepAfterHvacReporting,
        CallingPoint::EndSystemTimestepBeforeHvacReporting,
        CallingPoint::EndZoneTimestepAfterZoneReporting,
        CallingPoint::EndZoneTimestepBeforeZoneReporting,
        CallingPoint::InsideSystemIterationLoop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CallingPoint::AfterComponentGetInput => "callback_after_component_get_input",
            CallingPoint::EndZoneSizing => "callback_end_zone_sizing",
            CallingPoint::EndSystemSizing => "callback_end_system_sizing",
            CallingPoint::BeginNewEnvironment => "callback_begin_new_environment",
            CallingPoint::AfterNewEnvironmentWarmupComplete => {
                "callback_after_new_environment_warmup_complete"
            }
            CallingPoint::BeginZoneTimestepBeforeInitHeatBalance => {
                "callback_begin_zone_timestep_before_init_heat_balance"
            }
            CallingPoint::BeginZoneTimestepAfterInitHeatBalance => {
                "callback_begin_zone_timestep_after_init_heat_balance"
            }
            CallingPoint::AfterPredictorBeforeHvacManagers => {
                "callback_after_predictor_before_hvac_managers"
            }
            CallingPoint::AfterPredictorAfterHvacManagers => {
                "callback_after_predictor_after_hvac_managers"
            }
            CallingPoint::BeginSystemTimestepBeforePredictor => {
                "callback_begin_system_timestep_before_predictor"
            }
            CallingPoint::BeginZoneTimestepBeforeSetCurrentWeather => {
                "callback_begin_zone_timestep_before_set_current_weather"
            }
            CallingPoint::EndSystemTimestepAfterHvacReporting => {
                "callback_end_system_timestep_after_hvac_reporting"
            }
            CallingPoint::EndSystemTimestepBeforeHvacReporting => {
                "callback_end_system_timestep_before_hvac_reporting"
            }
            CallingPoint::EndZoneTimestepAfterZoneReporting => {
                "callback_end_zone_timestep_after_zone_reporting"
            }
            CallingPoint::EndZoneTimestepBeforeZoneReporting => {
                "callback_end_zone_timestep_before_zone_reporting"
            }
            CallingPoint::InsideSystemIterationLoop => "callback_inside_system_iteration_loop",
        }
    }
}

impl fmt::Display for CallingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallingPoint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|cp| cp.as_str() == s)
            .ok_or_else(|| EngineError::InvalidCallingPoint(s.to_string()))
    }
}

impl TryFrom<String> for CallingPoint {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CallingPoint> for String {
    fn from(cp: CallingPoint) -> Self {
        cp.as_str().to_string()
    }
}

/// Which simulated day a weather forecast refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Today,
    Tomorrow,
}

/// Simulator-side view of one callback firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTick {
    /// Current simulated date and time.
    pub calendar: NaiveDateTime,
    /// Sub-step index within the current hour (1-based).
    pub zone_substep: u32,
    /// Whether the simulator is still in its warmup phase.
    pub warmup: bool,
}

impl SimTick {
    pub fn new(calendar: NaiveDateTime, zone_substep: u32, warmup: bool) -> Self {
        Self {
            calendar,
            zone_substep,
            warmup,
        }
    }
}

/// Builds a calendar instant from raw simulator fields.
///
/// Simulators report end-of-interval times, so `hour == 24` and
/// `minute == 60` are accepted and rolled into the next hour or day.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCalendar`] if the fields do not form a date.
///
/// # Examples
///
/// ```
/// use ems_sync::sim::types::calendar_from_fields;
///
/// let dt = calendar_from_fields(2024, 1, 1, 24, 0).unwrap();
/// assert_eq!(dt.to_string(), "2024-01-02 00:00:00");
/// ```
pub fn calendar_from_fields(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Result<NaiveDateTime> {
    let invalid = || EngineError::InvalidCalendar {
        year,
        month,
        day,
        hour,
        minute,
    };
    if hour > 24 || minute > 60 {
        return Err(invalid());
    }

    let mut carry = Duration::zero();
    let (h, m) = (hour.min(23), minute.min(59));
    if hour == 24 {
        carry += Duration::hours(1);
    }
    if minute == 60 {
        carry += Duration::minutes(1);
    }

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(h, m, 0))
        .map(|dt| dt + carry)
        .ok_or_else(invalid)
}

/// Value of a timing field at a given calendar instant and counter.
pub(crate) fn time_field_value(
    field: TimeField,
    calendar: &NaiveDateTime,
    zone_substep: u32,
    global_counter: u64,
) -> f64 {
    match field {
        TimeField::Year => f64::from(calendar.year()),
        TimeField::Month => f64::from(calendar.month()),
        TimeField::Day => f64::from(calendar.day()),
        TimeField::Hour => f64::from(calendar.hour()),
        TimeField::Minute => f64::from(calendar.minute()),
        TimeField::ZoneSubstep => f64::from(zone_substep),
        TimeField::GlobalStep => global_counter as f64,
    }
}

/// Reward returned by an observation callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Reward {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Reward {
    /// Number of reward elements.
    pub fn arity(&self) -> usize {
        match self {
            Reward::Scalar(_) => 1,
            Reward::Vector(v) => v.len(),
        }
    }

    pub fn values(&self) -> &[f64] {
        match self {
            Reward::Scalar(v) => std::slice::from_ref(v),
            Reward::Vector(v) => v,
        }
    }
}

impl From<f64> for Reward {
    fn from(v: f64) -> Self {
        Reward::Scalar(v)
    }
}

impl From<Vec<f64>> for Reward {
    fn from(v: Vec<f64>) -> Self {
        Reward::Vector(v)
    }
}

/// Exit code returned by the simulator when its run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn success(self) -> bool {
        self.0 == 0
    }
}
