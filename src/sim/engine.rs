//! Synchronization engine driven by simulator calling points.

use std::path::Path;

use tracing::{debug, error, info};

use crate::error::{EngineError, Result};
use crate::sim::actuation;
use crate::sim::channel::{ChannelId, ChannelRegistry, REWARD_TOKEN, Transform};
use crate::sim::clock::{TickOutcome, TimestepTracker};
use crate::sim::exchange::{DataExchange, Runtime};
use crate::sim::query::{self, CallbackContext, ChannelValues, QueryArg, ReverseIndex};
use crate::sim::results::{Results, Table};
use crate::sim::reward::RewardLog;
use crate::sim::schedule::{CallingPointRegistration, Scheduler};
use crate::sim::summary::{DispatchCounters, RunSummary};
use crate::sim::types::{CallingPoint, Category, Descriptor, ExitStatus, Reading, SimTick};
use crate::sim::views::CustomView;

/// Zone timesteps per hour the simulator accepts.
pub const ALLOWED_TIMESTEPS_PER_HOUR: [u32; 12] = [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60];

/// What a single dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Simulator data not ready; handles unresolved, nothing else ran.
    NotReady,
    /// Warmup tick; nothing downstream ran.
    Warmup,
    /// This point already ran at the current global timestep.
    Repeated,
    Completed {
        /// Row opened by the state update, if this point updates state.
        state_row: Option<usize>,
        observed: bool,
        acted: bool,
    },
}

/// One run's worth of channels, timestep state, callbacks and results.
///
/// The simulator calls [`Engine::dispatch`] at every registered calling
/// point; between runs the engine must be [`reset`](Engine::reset).
///
/// # Examples
///
/// ```
/// use ems_sync::sim::engine::Engine;
/// use ems_sync::sim::schedule::CallingPointRegistration;
/// use ems_sync::sim::types::{CallingPoint, Descriptor};
///
/// let mut engine = Engine::new(4);
/// engine
///     .register("zn0_temp", Descriptor::variable("Zone Air Temperature", "Zone 1"), None)
///     .unwrap();
/// engine
///     .register_point(
///         CallingPointRegistration::new(CallingPoint::BeginZoneTimestepAfterInitHeatBalance)
///             .update_state(true)
///             .observe(|ctx| ctx.latest("zn0_temp").ok().flatten().map(Into::into)),
///     )
///     .unwrap();
/// assert_eq!(engine.points().count(), 1);
/// ```
#[derive(Debug)]
pub struct Engine {
    timesteps_per_hour: u32,
    delimiter: u8,
    registry: ChannelRegistry,
    tracker: TimestepTracker,
    scheduler: Scheduler,
    rewards: RewardLog,
    views: Vec<CustomView>,
    counters: DispatchCounters,
    timestep_checked: bool,
    exit_status: Option<ExitStatus>,
}

impl Engine {
    /// Creates an engine for a model running `timesteps_per_hour` zone
    /// timesteps per hour. The value is checked against the simulator on
    /// the first non-warmup dispatch.
    pub fn new(timesteps_per_hour: u32) -> Self {
        Self {
            timesteps_per_hour,
            delimiter: b',',
            registry: ChannelRegistry::new(),
            tracker: TimestepTracker::new(),
            scheduler: Scheduler::new(),
            rewards: RewardLog::new(),
            views: Vec::new(),
            counters: DispatchCounters::default(),
            timestep_checked: false,
            exit_status: None,
        }
    }

    /// Sets the field delimiter used by [`Engine::export`].
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Declares a channel. See [`ChannelRegistry::register`].
    pub fn register(
        &mut self,
        name: &str,
        descriptor: Descriptor,
        transform: Option<Transform>,
    ) -> Result<ChannelId> {
        let id = self.registry.register(name, descriptor, transform)?;
        debug!(channel = name, category = %self.registry.get(id).category(), "registered channel");
        Ok(id)
    }

    /// Attaches callbacks to a calling point. See [`Scheduler::register`].
    pub fn register_point(&mut self, registration: CallingPointRegistration) -> Result<()> {
        self.scheduler.register(registration)
    }

    /// Declares a named table sampled at `point` every `frequency` global
    /// timesteps. `channels` may include `reward`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateView`] if `name` is taken by another view
    ///   or a default table.
    /// - [`EngineError::InvalidCallingPoint`] if `point` is not registered.
    /// - [`EngineError::UnknownChannel`] if a channel is not registered.
    /// - [`EngineError::InvalidFrequency`] if `frequency` is zero.
    pub fn declare_custom_view(
        &mut self,
        name: &str,
        point: CallingPoint,
        frequency: u32,
        channels: &[&str],
    ) -> Result<()> {
        let reserved = Category::from_token(name).is_some() || name == REWARD_TOKEN;
        if reserved || self.views.iter().any(|v| v.name() == name) {
            return Err(EngineError::DuplicateView(name.to_string()));
        }
        if !self.scheduler.contains(point) {
            return Err(EngineError::InvalidCallingPoint(point.to_string()));
        }
        let view = CustomView::new(name, point, frequency, channels, &self.registry)?;
        info!(view = name, point = %point, frequency, "declared custom view");
        self.views.push(view);
        Ok(())
    }

    /// Handles one simulator callback.
    ///
    /// In order: resolve handles (returning early if the simulator is not
    /// ready), feed the timestep tracker (returning early on warmup),
    /// refresh state and observe, act, then capture custom views.
    ///
    /// A point runs at most once per global timestep. Later firings at the
    /// same `(calendar, substep)`, such as system iterations, return
    /// [`DispatchOutcome::Repeated`].
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidCallingPoint`] if `point` is not registered.
    /// - [`EngineError::HandleResolution`] if a descriptor does not resolve.
    /// - [`EngineError::TimestepMismatch`] if the simulator's timestep
    ///   differs from the configured one.
    /// - Reward and actuation contract errors from the callbacks' returns.
    pub fn dispatch(
        &mut self,
        point: CallingPoint,
        tick: SimTick,
        sim: &mut dyn DataExchange,
    ) -> Result<DispatchOutcome> {
        if !self.scheduler.contains(point) {
            return Err(EngineError::InvalidCallingPoint(point.to_string()));
        }
        if !self.registry.resolve_all(sim)? {
            return Ok(DispatchOutcome::NotReady);
        }

        match self.tracker.on_simulator_tick(tick) {
            TickOutcome::Warmup => {
                self.counters.warmup_dispatches += 1;
                return Ok(DispatchOutcome::Warmup);
            }
            TickOutcome::Advanced => {
                debug!(step = self.tracker.global_counter(), calendar = %tick.calendar, "timestep advanced");
            }
            TickOutcome::Repeated => {}
        }
        if !self.timestep_checked {
            self.verify_timestep(sim.zone_time_step())?;
            self.timestep_checked = true;
        }

        let tph = self.timesteps_per_hour;
        let step = self.tracker.global_counter();
        let Some(reg) = self.scheduler.get_mut(point) else {
            return Err(EngineError::InvalidCallingPoint(point.to_string()));
        };
        if !reg.claim_step(step) {
            self.counters.repeated_dispatches += 1;
            return Ok(DispatchOutcome::Repeated);
        }
        self.counters.dispatches += 1;

        let mut state_row = None;
        let mut observed = false;
        if reg.updates_state() {
            if let Some(row) = self.tracker.push_row(point) {
                let stamp = self.tracker.timeline()[row];
                self.registry.refresh(sim, row, &stamp);
                state_row = Some(row);
            }

            if self.tracker.modulo_due(reg.observe_every_n()) {
                if let Some(observe) = reg.observe_fn() {
                    let mut ctx = CallbackContext::new(
                        &self.registry,
                        &self.tracker,
                        &self.rewards,
                        &mut *sim,
                        tph,
                        point,
                    );
                    let reward = observe(&mut ctx);
                    observed = true;
                    self.counters.observations += 1;
                    if let (Some(reward), Some(stamp)) = (reward, self.tracker.stamp(point)) {
                        self.rewards
                            .record(reward, stamp, self.tracker.current_row())?;
                    }
                }
            }
        }

        let mut acted = false;
        if self.tracker.modulo_due(reg.act_every_n()) {
            if let Some(act) = reg.act_fn() {
                let mut ctx = CallbackContext::new(
                    &self.registry,
                    &self.tracker,
                    &self.rewards,
                    &mut *sim,
                    tph,
                    point,
                );
                let map = act(&mut ctx);
                let commands = actuation::apply(&mut self.registry, sim, map, step)?;
                acted = true;
                self.counters.actuations += 1;
                self.counters.commands += commands as u64;
            }
        }

        for view in &mut self.views {
            view.capture(point, &self.registry, &self.tracker, &self.rewards);
        }

        Ok(DispatchOutcome::Completed {
            state_row,
            observed,
            acted,
        })
    }

    fn verify_timestep(&self, zone_time_step: f64) -> Result<()> {
        let model = if zone_time_step > 0.0 {
            (1.0 / zone_time_step).round() as u32
        } else {
            0
        };
        if !ALLOWED_TIMESTEPS_PER_HOUR.contains(&model) || model != self.timesteps_per_hour {
            return Err(EngineError::TimestepMismatch {
                configured: self.timesteps_per_hour,
                model,
            });
        }
        info!(timesteps_per_hour = model, "model timestep verified");
        Ok(())
    }

    /// Hands control to `runtime` until the simulation ends and records its
    /// exit status.
    ///
    /// # Errors
    ///
    /// Propagates the first dispatch error raised during the run.
    pub fn run<R: Runtime + ?Sized>(&mut self, runtime: &mut R) -> Result<ExitStatus> {
        info!(points = self.scheduler.len(), channels = self.registry.len(), "starting simulation");
        let status = runtime.run_simulation(self)?;
        self.finish(status);
        if status.success() {
            info!(
                steps = self.tracker.global_counter(),
                rows = self.tracker.timeline().len(),
                "simulation completed successfully"
            );
        } else {
            error!(code = status.0, "simulation failed, tables cannot be materialized");
        }
        Ok(status)
    }

    /// Records the simulator's exit status for a run driven outside
    /// [`Engine::run`]. Tables can be materialized only once this is set.
    pub fn finish(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
    }

    /// Reads channel histories.
    ///
    /// `query` is a category, a [`Query`](crate::sim::query::Query), or raw
    /// name tokens; a lone category token selects the whole category.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CategoryQueryMix`] or
    /// [`EngineError::UnknownChannel`] for malformed queries.
    pub fn get(&self, query: impl Into<QueryArg>, index: ReverseIndex) -> Result<ChannelValues> {
        let query = query.into().into_query()?;
        query::fetch(&self.registry, &query, &index)
    }

    /// Latest reading of one channel.
    pub fn latest(&self, name: &str) -> Result<Reading> {
        let id = self.registry.id(name)?;
        Ok(self.registry.get(id).latest().flatten())
    }

    /// Latest encoded reading of one channel.
    pub fn encoded(&self, name: &str) -> Result<Reading> {
        let id = self.registry.id(name)?;
        Ok(self.registry.get(id).encoded())
    }

    /// Builds every default table and custom view.
    ///
    /// # Errors
    ///
    /// See [`Results::build`].
    pub fn materialize(&self) -> Result<Results> {
        Results::build(
            self.exit_status,
            !self.scheduler.is_empty(),
            &self.registry,
            &self.tracker,
            &self.rewards,
            &self.views,
        )
    }

    /// Materializes and returns the requested tables, optionally writing
    /// them to `path`. See [`Results::export`].
    pub fn export(&self, view: Option<&str>, path: Option<&Path>) -> Result<Vec<Table>> {
        let results = self.materialize()?;
        let tables = results.export(view, path, self.delimiter)?;
        Ok(tables.into_iter().cloned().collect())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            exit_status: self.exit_status.map(|s| s.0),
            global_steps: self.tracker.global_counter(),
            state_rows: self.tracker.timeline().len(),
            counters: self.counters,
            rewards: self.rewards.len(),
            reward_mean: self.rewards.mean(),
        }
    }

    /// Clears all run state (handles, histories, counters, rewards, view
    /// rows and exit status), keeping channel, calling-point and view
    /// declarations.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.tracker.reset();
        self.scheduler.reset();
        self.rewards.reset();
        for view in &mut self.views {
            view.clear();
        }
        self.counters = DispatchCounters::default();
        self.timestep_checked = false;
        self.exit_status = None;
        debug!("engine reset");
    }

    /// Registered calling points in registration order.
    pub fn points(&self) -> impl Iterator<Item = CallingPoint> + '_ {
        self.scheduler.points()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &TimestepTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn rewards(&self) -> &RewardLog {
        &self.rewards
    }

    pub fn views(&self) -> &[CustomView] {
        &self.views
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn timesteps_per_hour(&self) -> u32 {
        self.timesteps_per_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_needs_registered_point() {
        let mut engine = Engine::new(4);
        let err = engine.declare_custom_view("v", CallingPoint::EndZoneSizing, 1, &[]);
        assert!(matches!(err, Err(EngineError::InvalidCallingPoint(_))));
    }

    #[test]
    fn view_names_are_unique() {
        let mut engine = Engine::new(4);
        engine
            .register_point(CallingPointRegistration::new(CallingPoint::EndZoneSizing))
            .unwrap();
        engine
            .declare_custom_view("v", CallingPoint::EndZoneSizing, 1, &["t_hour"])
            .unwrap();
        assert!(matches!(
            engine.declare_custom_view("v", CallingPoint::EndZoneSizing, 1, &[]),
            Err(EngineError::DuplicateView(_))
        ));
        assert!(matches!(
            engine.declare_custom_view("var", CallingPoint::EndZoneSizing, 1, &[]),
            Err(EngineError::DuplicateView(_))
        ));
    }

    #[test]
    fn timestep_verification() {
        let engine = Engine::new(4);
        assert!(engine.verify_timestep(0.25).is_ok());
        assert!(matches!(
            engine.verify_timestep(1.0 / 6.0),
            Err(EngineError::TimestepMismatch {
                configured: 4,
                model: 6
            })
        ));
        assert!(Engine::new(7).verify_timestep(1.0 / 7.0).is_err());
        assert!(engine.verify_timestep(0.0).is_err());
    }

    #[test]
    fn materialize_without_points_fails() {
        let engine = Engine::new(4);
        assert!(matches!(engine.materialize(), Err(EngineError::NothingTracked)));
    }

    #[test]
    fn materialize_waits_for_exit_status() {
        let mut engine = Engine::new(4);
        engine
            .register_point(CallingPointRegistration::new(CallingPoint::EndZoneSizing))
            .unwrap();
        assert!(matches!(engine.materialize(), Err(EngineError::RunNotFinished)));

        engine.finish(ExitStatus::SUCCESS);
        assert!(engine.materialize().is_ok());

        engine.reset();
        assert!(matches!(engine.materialize(), Err(EngineError::RunNotFinished)));
    }
}
