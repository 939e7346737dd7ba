//! Deterministic single-zone building simulator.
//!
//! Drives an [`Engine`] the way a whole-building simulator would: a warmup
//! phase, then one pass over the registered calling points per zone
//! timestep, with the system iteration loop optionally firing several times
//! within a timestep. The thermal model is a single lumped zone heated by
//! an electric heater that tracks the heating setpoint.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::sim::engine::Engine;
use crate::sim::exchange::{DataExchange, Runtime};
use crate::sim::types::{
    CallingPoint, Day, ExitStatus, Handle, SimTick, WeatherMetric, calendar_from_fields,
};

const ZONE_TEMP: Handle = Handle(1);
const OUTDOOR_TEMP: Handle = Handle(2);
const HEATING_SP_VAR: Handle = Handle(3);
const COOLING_SP_VAR: Handle = Handle(4);
const HEATER_POWER: Handle = Handle(5);
const FLOOR_AREA: Handle = Handle(11);
const AIR_VOLUME: Handle = Handle(12);
const FACILITY_ELECTRICITY: Handle = Handle(21);
const HEATING_ELECTRICITY: Handle = Handle(22);
const HEATING_SP: Handle = Handle(31);
const COOLING_SP: Handle = Handle(32);

/// Non-HVAC facility load (kW).
const BASE_LOAD_KW: f64 = 0.5;
/// Envelope conductance (1/h).
const ENVELOPE_UA: f64 = 0.3;
/// Zone temperature rise per kWh of heat.
const HEAT_TO_C: f64 = 1.5;
/// Heater proportional gain (kW per degree below setpoint).
const HEATER_GAIN_KW: f64 = 4.0;

/// Parameters of the scripted simulator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptedConfig {
    /// First simulated day.
    pub start: NaiveDate,
    /// Number of days to simulate (must be > 0).
    pub days: u32,
    /// Model zone timesteps per hour.
    pub timesteps_per_hour: u32,
    /// Warmup timesteps fired before the run period.
    pub warmup_steps: u32,
    /// Firings of the system iteration loop per timestep.
    pub system_iterations: u32,
    /// Dispatches fired before the data model reports ready.
    pub data_ready_after: u32,
    /// Zone name used as the key of zone-level lookups.
    pub zone: String,
    pub seed: u64,
    /// Daily mean outdoor temperature (°C).
    pub outdoor_mean_c: f64,
    /// Daily outdoor temperature swing amplitude (°C).
    pub outdoor_amp_c: f64,
    /// Standard deviation of internal gains noise (°C per timestep).
    pub noise_std: f64,
    pub initial_zone_c: f64,
    pub heater_kw: f64,
    pub default_heating_sp_c: f64,
    pub default_cooling_sp_c: f64,
    /// Run-period step (1-based) at which the run aborts with exit code 1.
    pub fail_at_step: Option<u64>,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap_or_default(),
            days: 1,
            timesteps_per_hour: 4,
            warmup_steps: 4,
            system_iterations: 1,
            data_ready_after: 0,
            zone: "Zone 1".to_string(),
            seed: 42,
            outdoor_mean_c: 4.0,
            outdoor_amp_c: 6.0,
            noise_std: 0.05,
            initial_zone_c: 18.0,
            heater_kw: 6.0,
            default_heating_sp_c: 20.0,
            default_cooling_sp_c: 26.0,
            fail_at_step: None,
        }
    }
}

/// Returns a normal sample scaled by `std_dev` using the Box-Muller transform.
fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// Scripted simulator implementing [`DataExchange`] and [`Runtime`].
#[derive(Debug, Clone)]
pub struct ScriptedSimulator {
    cfg: ScriptedConfig,
    rng: StdRng,
    dispatches_seen: u32,
    hour: u32,
    zone_c: f64,
    heater_kw: f64,
    heating_override: Option<f64>,
    cooling_override: Option<f64>,
    actuator_writes: u64,
}

impl ScriptedSimulator {
    pub fn new(cfg: ScriptedConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            zone_c: cfg.initial_zone_c,
            dispatches_seen: 0,
            hour: 0,
            heater_kw: 0.0,
            heating_override: None,
            cooling_override: None,
            actuator_writes: 0,
            cfg,
        }
    }

    pub fn config(&self) -> &ScriptedConfig {
        &self.cfg
    }

    /// Current zone air temperature (°C).
    pub fn zone_temperature(&self) -> f64 {
        self.zone_c
    }

    /// Number of set/reset calls received from the engine.
    pub fn actuator_writes(&self) -> u64 {
        self.actuator_writes
    }

    fn steps_per_day(&self) -> u64 {
        24 * u64::from(self.cfg.timesteps_per_hour)
    }

    fn dt_hours(&self) -> f64 {
        1.0 / f64::from(self.cfg.timesteps_per_hour.max(1))
    }

    fn heating_sp(&self) -> f64 {
        self.heating_override.unwrap_or(self.cfg.default_heating_sp_c)
    }

    fn cooling_sp(&self) -> f64 {
        self.cooling_override.unwrap_or(self.cfg.default_cooling_sp_c)
    }

    /// Outdoor dry-bulb profile, coldest before dawn.
    fn outdoor_at(&self, hour: f64) -> f64 {
        self.cfg.outdoor_mean_c + self.cfg.outdoor_amp_c * (2.0 * PI * (hour - 9.0) / 24.0).sin()
    }

    fn fractional_hour(&self, hour: u32, substep: u32) -> f64 {
        f64::from(hour) + f64::from(substep.saturating_sub(1)) * self.dt_hours()
    }

    /// Simulator-style calendar for run-period step `step` (1-based),
    /// stamped at the end of the interval.
    fn tick_for(&self, step: u64, warmup: bool) -> Result<SimTick> {
        let spd = self.steps_per_day();
        let tph = u64::from(self.cfg.timesteps_per_hour);
        let day_index = (step - 1) / spd;
        let within = step - day_index * spd;
        let minutes = within * 60 / tph;
        let date = self.cfg.start + chrono::Days::new(day_index);
        let calendar = calendar_from_fields(
            date.year(),
            date.month(),
            date.day(),
            (minutes / 60) as u32,
            (minutes % 60) as u32,
        )?;
        let substep = ((within - 1) % tph) as u32 + 1;
        Ok(SimTick::new(calendar, substep, warmup))
    }

    /// Advances the thermal model by one zone timestep ending at `tick`.
    fn advance(&mut self, tick: &SimTick) {
        use chrono::Timelike;

        let dt = self.dt_hours();
        let hour = tick.calendar.hour();
        self.hour = hour;
        let outdoor = self.outdoor_at(self.fractional_hour(hour, tick.zone_substep));

        let deficit = self.heating_sp() - self.zone_c;
        self.heater_kw = (deficit * HEATER_GAIN_KW).clamp(0.0, self.cfg.heater_kw);
        if self.zone_c > self.cooling_sp() {
            self.heater_kw = 0.0;
        }

        let noise = gaussian_noise(&mut self.rng, self.cfg.noise_std);
        self.zone_c += dt * (ENVELOPE_UA * (outdoor - self.zone_c) + HEAT_TO_C * self.heater_kw) + noise;
    }

    fn zone_matches(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(&self.cfg.zone)
    }

    fn fire(&mut self, engine: &mut Engine, points: &[CallingPoint], tick: SimTick) -> Result<()> {
        for &point in points {
            let repeats = if point == CallingPoint::InsideSystemIterationLoop {
                self.cfg.system_iterations.max(1)
            } else {
                1
            };
            for _ in 0..repeats {
                self.dispatches_seen = self.dispatches_seen.saturating_add(1);
                engine.dispatch(point, tick, &mut *self)?;
            }
        }
        Ok(())
    }
}

impl DataExchange for ScriptedSimulator {
    fn api_data_fully_ready(&self) -> bool {
        self.dispatches_seen > self.cfg.data_ready_after
    }

    fn zone_time_step(&self) -> f64 {
        self.dt_hours()
    }

    fn variable_handle(&mut self, name: &str, key: &str) -> Option<Handle> {
        match name {
            "Zone Air Temperature" if self.zone_matches(key) => Some(ZONE_TEMP),
            "Site Outdoor Air Drybulb Temperature" if key.eq_ignore_ascii_case("Environment") => {
                Some(OUTDOOR_TEMP)
            }
            "Zone Thermostat Heating Setpoint Temperature" if self.zone_matches(key) => {
                Some(HEATING_SP_VAR)
            }
            "Zone Thermostat Cooling Setpoint Temperature" if self.zone_matches(key) => {
                Some(COOLING_SP_VAR)
            }
            "Zone Air Heating Power" if self.zone_matches(key) => Some(HEATER_POWER),
            _ => None,
        }
    }

    fn internal_variable_handle(&mut self, kind: &str, key: &str) -> Option<Handle> {
        match kind {
            "Zone Floor Area" if self.zone_matches(key) => Some(FLOOR_AREA),
            "Zone Air Volume" if self.zone_matches(key) => Some(AIR_VOLUME),
            _ => None,
        }
    }

    fn meter_handle(&mut self, name: &str) -> Option<Handle> {
        match name {
            "Electricity:Facility" => Some(FACILITY_ELECTRICITY),
            "Heating:Electricity" => Some(HEATING_ELECTRICITY),
            _ => None,
        }
    }

    fn actuator_handle(
        &mut self,
        component_type: &str,
        control_type: &str,
        key: &str,
    ) -> Option<Handle> {
        if component_type != "Zone Temperature Control" || !self.zone_matches(key) {
            return None;
        }
        match control_type {
            "Heating Setpoint" => Some(HEATING_SP),
            "Cooling Setpoint" => Some(COOLING_SP),
            _ => None,
        }
    }

    fn variable_value(&mut self, handle: Handle) -> f64 {
        match handle {
            ZONE_TEMP => self.zone_c,
            OUTDOOR_TEMP => self.outdoor_at(f64::from(self.hour)),
            HEATING_SP_VAR => self.heating_sp(),
            COOLING_SP_VAR => self.cooling_sp(),
            HEATER_POWER => self.heater_kw * 1000.0,
            _ => 0.0,
        }
    }

    fn internal_variable_value(&mut self, handle: Handle) -> f64 {
        match handle {
            FLOOR_AREA => 100.0,
            AIR_VOLUME => 300.0,
            _ => 0.0,
        }
    }

    /// Energy over the last timestep in kWh.
    fn meter_value(&mut self, handle: Handle) -> f64 {
        let dt = self.dt_hours();
        match handle {
            FACILITY_ELECTRICITY => (BASE_LOAD_KW + self.heater_kw) * dt,
            HEATING_ELECTRICITY => self.heater_kw * dt,
            _ => 0.0,
        }
    }

    fn actuator_value(&mut self, handle: Handle) -> f64 {
        match handle {
            HEATING_SP => self.heating_sp(),
            COOLING_SP => self.cooling_sp(),
            _ => 0.0,
        }
    }

    fn weather_at_time(&mut self, metric: WeatherMetric, day: Day, hour: u32, substep: u32) -> f64 {
        let h = self.fractional_hour(hour, substep);
        let shift = match day {
            Day::Today => 0.0,
            Day::Tomorrow => -0.5,
        };
        match metric {
            WeatherMetric::OutdoorDryBulb => self.outdoor_at(h) + shift,
            WeatherMetric::OutdoorDewPoint => self.outdoor_at(h) + shift - 4.0,
            WeatherMetric::OutdoorRelativeHumidity => 65.0 + 15.0 * (2.0 * PI * h / 24.0).cos(),
            WeatherMetric::OutdoorBarometricPressure => 101_325.0,
            WeatherMetric::WindSpeed => 3.0,
            WeatherMetric::WindDirection => 225.0,
            WeatherMetric::BeamSolar => (800.0 * (PI * (h - 6.0) / 12.0).sin()).max(0.0),
            WeatherMetric::DiffuseSolar => (120.0 * (PI * (h - 6.0) / 12.0).sin()).max(0.0),
            WeatherMetric::SunIsUp => f64::from(u8::from((6.0..18.0).contains(&h))),
            WeatherMetric::SkyTemperature => self.outdoor_at(h) - 10.0,
            WeatherMetric::HorizontalIr => 300.0,
            WeatherMetric::Albedo => 0.2,
            WeatherMetric::IsRaining | WeatherMetric::IsSnowing => 0.0,
            WeatherMetric::LiquidPrecipitation => 0.0,
        }
    }

    fn sun_is_up(&mut self) -> bool {
        (6..18).contains(&self.hour)
    }

    fn set_actuator_value(&mut self, handle: Handle, value: f64) {
        self.actuator_writes += 1;
        match handle {
            HEATING_SP => self.heating_override = Some(value),
            COOLING_SP => self.cooling_override = Some(value),
            other => warn!(handle = other.0, "set on unknown actuator handle"),
        }
    }

    fn reset_actuator(&mut self, handle: Handle) {
        self.actuator_writes += 1;
        match handle {
            HEATING_SP => self.heating_override = None,
            COOLING_SP => self.cooling_override = None,
            other => warn!(handle = other.0, "reset on unknown actuator handle"),
        }
    }
}

impl Runtime for ScriptedSimulator {
    fn run_simulation(&mut self, engine: &mut Engine) -> Result<ExitStatus> {
        let points: Vec<CallingPoint> = CallingPoint::ALL
            .into_iter()
            .filter(|p| engine.scheduler().contains(*p))
            .collect();
        let spd = self.steps_per_day();

        for step in 1..=u64::from(self.cfg.warmup_steps) {
            let tick = self.tick_for((step - 1) % spd + 1, true)?;
            self.advance(&tick);
            self.fire(engine, &points, tick)?;
        }

        let total = spd * u64::from(self.cfg.days);
        for step in 1..=total {
            if self.cfg.fail_at_step == Some(step) {
                warn!(step, "scripted failure injected");
                return Ok(ExitStatus(1));
            }
            let tick = self.tick_for(step, false)?;
            self.advance(&tick);
            self.fire(engine, &points, tick)?;
        }
        debug!(steps = total, zone_c = self.zone_c, "scripted run finished");
        Ok(ExitStatus::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic_for_seed() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(gaussian_noise(&mut a, 1.0), gaussian_noise(&mut b, 1.0));
        assert_eq!(gaussian_noise(&mut a, 0.0), 0.0);
    }

    #[test]
    fn last_step_of_day_rolls_over() {
        let sim = ScriptedSimulator::new(ScriptedConfig::default());
        let last = sim.tick_for(96, false).unwrap();
        assert_eq!(last.calendar.to_string(), "2024-01-09 00:00:00");
        assert_eq!(last.zone_substep, 4);
        let first = sim.tick_for(1, false).unwrap();
        assert_eq!(first.calendar.to_string(), "2024-01-08 00:15:00");
        assert_eq!(first.zone_substep, 1);
    }

    #[test]
    fn handles_resolve_case_insensitively() {
        let mut sim = ScriptedSimulator::new(ScriptedConfig::default());
        assert_eq!(sim.variable_handle("Zone Air Temperature", "ZONE 1"), Some(ZONE_TEMP));
        assert_eq!(sim.variable_handle("Zone Air Temperature", "Zone 2"), None);
        assert_eq!(
            sim.actuator_handle("Zone Temperature Control", "Heating Setpoint", "zone 1"),
            Some(HEATING_SP)
        );
    }

    #[test]
    fn heater_tracks_override() {
        let mut sim = ScriptedSimulator::new(ScriptedConfig {
            noise_std: 0.0,
            ..ScriptedConfig::default()
        });
        sim.set_actuator_value(HEATING_SP, 10.0);
        let tick = sim.tick_for(1, false).unwrap();
        sim.advance(&tick);
        assert_eq!(sim.heater_kw, 0.0);

        sim.reset_actuator(HEATING_SP);
        sim.advance(&tick);
        assert!(sim.heater_kw > 0.0);
        assert_eq!(sim.actuator_writes(), 2);
    }
}
