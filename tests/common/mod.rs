//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use ems_sync::Result;
use ems_sync::sim::engine::Engine;
use ems_sync::sim::exchange::{DataExchange, Runtime};
use ems_sync::sim::types::{CallingPoint, Day, ExitStatus, Handle, SimTick, WeatherMetric};

/// Simulator stand-in whose handle namespace and readings are set up by the
/// test, and which records every actuator command it receives.
#[derive(Debug, Default)]
pub struct FakeSim {
    pub ready: bool,
    pub timesteps_per_hour: u32,
    handles: HashMap<String, Handle>,
    /// Queued readings per handle; the last value repeats once drained.
    values: HashMap<Handle, VecDeque<f64>>,
    pub sets: Vec<(Handle, f64)>,
    pub resets: Vec<Handle>,
    pub internal_reads: u32,
    /// Every `weather_at_time` request as `(metric, day, hour, substep)`.
    pub weather_calls: Vec<(WeatherMetric, Day, u32, u32)>,
    pub sun_calls: u32,
    pub sun_up: bool,
    /// Ticks driven by [`Runtime::run_simulation`], with the point they fire at.
    pub script: Vec<(CallingPoint, SimTick)>,
    pub exit_code: i32,
}

impl FakeSim {
    pub fn new(timesteps_per_hour: u32) -> Self {
        Self {
            ready: true,
            timesteps_per_hour,
            ..Self::default()
        }
    }

    fn next_handle(&self) -> Handle {
        Handle(self.handles.len() as i32 + 1)
    }

    /// Exposes a variable `(name, key)` with the given reading sequence.
    pub fn variable(mut self, name: &str, key: &str, readings: &[f64]) -> Self {
        let h = self.next_handle();
        self.handles.insert(format!("var|{name}|{key}"), h);
        self.values.insert(h, readings.iter().copied().collect());
        self
    }

    /// Exposes a static internal variable `(kind, key)`.
    pub fn internal_variable(mut self, kind: &str, key: &str, value: f64) -> Self {
        let h = self.next_handle();
        self.handles.insert(format!("intvar|{kind}|{key}"), h);
        self.values.insert(h, VecDeque::from([value]));
        self
    }

    pub fn meter(mut self, name: &str, readings: &[f64]) -> Self {
        let h = self.next_handle();
        self.handles.insert(format!("meter|{name}"), h);
        self.values.insert(h, readings.iter().copied().collect());
        self
    }

    pub fn actuator(mut self, component_type: &str, control_type: &str, key: &str) -> Self {
        let h = self.next_handle();
        self.handles
            .insert(format!("act|{component_type}|{control_type}|{key}"), h);
        self
    }

    /// Appends `n` consecutive non-warmup zone timesteps at `point`.
    pub fn steps(mut self, point: CallingPoint, n: u32) -> Self {
        let dt = 60 / i64::from(self.timesteps_per_hour);
        let already = self.script.len() as i64;
        for i in 0..i64::from(n) {
            let calendar = midnight() + Duration::minutes(dt * (already + i + 1));
            let substep = ((already + i) % i64::from(self.timesteps_per_hour)) as u32 + 1;
            self.script.push((point, SimTick::new(calendar, substep, false)));
        }
        self
    }

    pub fn handle(&self, key: &str) -> Option<Handle> {
        self.handles.get(key).copied()
    }

    fn read(&mut self, handle: Handle) -> f64 {
        match self.values.get_mut(&handle) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(0.0),
            Some(queue) => queue.front().copied().unwrap_or(0.0),
            None => 0.0,
        }
    }
}

pub fn midnight() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Tick at `minutes` past midnight.
pub fn tick(minutes: i64, substep: u32) -> SimTick {
    SimTick::new(midnight() + Duration::minutes(minutes), substep, false)
}

impl DataExchange for FakeSim {
    fn api_data_fully_ready(&self) -> bool {
        self.ready
    }

    fn zone_time_step(&self) -> f64 {
        1.0 / f64::from(self.timesteps_per_hour)
    }

    fn variable_handle(&mut self, name: &str, key: &str) -> Option<Handle> {
        self.handle(&format!("var|{name}|{key}"))
    }

    fn internal_variable_handle(&mut self, kind: &str, key: &str) -> Option<Handle> {
        self.handle(&format!("intvar|{kind}|{key}"))
    }

    fn meter_handle(&mut self, name: &str) -> Option<Handle> {
        self.handle(&format!("meter|{name}"))
    }

    fn actuator_handle(
        &mut self,
        component_type: &str,
        control_type: &str,
        key: &str,
    ) -> Option<Handle> {
        self.handle(&format!("act|{component_type}|{control_type}|{key}"))
    }

    fn variable_value(&mut self, handle: Handle) -> f64 {
        self.read(handle)
    }

    fn internal_variable_value(&mut self, handle: Handle) -> f64 {
        self.internal_reads += 1;
        self.read(handle)
    }

    fn meter_value(&mut self, handle: Handle) -> f64 {
        self.read(handle)
    }

    fn actuator_value(&mut self, handle: Handle) -> f64 {
        self.sets
            .iter()
            .rev()
            .find(|(h, _)| *h == handle)
            .map_or(0.0, |(_, v)| *v)
    }

    /// `hour + substep / 10`, plus 100 for tomorrow.
    fn weather_at_time(&mut self, metric: WeatherMetric, day: Day, hour: u32, substep: u32) -> f64 {
        self.weather_calls.push((metric, day, hour, substep));
        let offset = match day {
            Day::Today => 0.0,
            Day::Tomorrow => 100.0,
        };
        offset + f64::from(hour) + f64::from(substep) / 10.0
    }

    fn sun_is_up(&mut self) -> bool {
        self.sun_calls += 1;
        self.sun_up
    }

    fn set_actuator_value(&mut self, handle: Handle, value: f64) {
        self.sets.push((handle, value));
    }

    fn reset_actuator(&mut self, handle: Handle) {
        self.resets.push(handle);
    }
}

impl Runtime for FakeSim {
    fn run_simulation(&mut self, engine: &mut Engine) -> Result<ExitStatus> {
        let script = std::mem::take(&mut self.script);
        for (point, tick) in &script {
            engine.dispatch(*point, *tick, &mut *self)?;
        }
        self.script = script;
        Ok(ExitStatus(self.exit_code))
    }
}
