//! Calling-point registrations: which callbacks run where, and how often.

use std::fmt;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::sim::actuation::ActuationMap;
use crate::sim::query::CallbackContext;
use crate::sim::types::{CallingPoint, Reward};

/// Observation callback; its optional return value is a reward.
pub type ObserveFn = Box<dyn FnMut(&mut CallbackContext<'_>) -> Option<Reward>>;

/// Actuation callback; `None` means "no actuation this call".
pub type ActFn = Box<dyn FnMut(&mut CallbackContext<'_>) -> Option<ActuationMap>>;

/// Callbacks and cadence attached to one simulator calling point.
///
/// # Examples
///
/// ```
/// use ems_sync::sim::schedule::CallingPointRegistration;
/// use ems_sync::sim::types::CallingPoint;
///
/// let reg = CallingPointRegistration::new(CallingPoint::BeginZoneTimestepAfterInitHeatBalance)
///     .update_state(true)
///     .observe(|_ctx| Some(1.0.into()))
///     .observe_every(1)
///     .act_every(4);
/// assert_eq!(reg.act_every_n(), 4);
/// ```
pub struct CallingPointRegistration {
    point: CallingPoint,
    observe: Option<ObserveFn>,
    act: Option<ActFn>,
    update_state: bool,
    observe_every_n: u32,
    act_every_n: u32,
    /// Global timestep this point last ran its callbacks at.
    handled_step: Option<u64>,
}

impl CallingPointRegistration {
    /// Creates an empty registration: no callbacks, no state update, both
    /// frequencies 1.
    pub fn new(point: CallingPoint) -> Self {
        Self {
            point,
            observe: None,
            act: None,
            update_state: false,
            observe_every_n: 1,
            act_every_n: 1,
            handled_step: None,
        }
    }

    pub fn observe<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut CallbackContext<'_>) -> Option<Reward> + 'static,
    {
        self.observe = Some(Box::new(f));
        self
    }

    pub fn act<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut CallbackContext<'_>) -> Option<ActuationMap> + 'static,
    {
        self.act = Some(Box::new(f));
        self
    }

    /// Whether channel readings are refreshed at this calling point.
    pub fn update_state(mut self, update: bool) -> Self {
        self.update_state = update;
        self
    }

    /// Run the observation callback every `n` global timesteps.
    pub fn observe_every(mut self, n: u32) -> Self {
        self.observe_every_n = n;
        self
    }

    /// Run the actuation callback every `n` global timesteps.
    pub fn act_every(mut self, n: u32) -> Self {
        self.act_every_n = n;
        self
    }

    pub fn point(&self) -> CallingPoint {
        self.point
    }

    pub fn updates_state(&self) -> bool {
        self.update_state
    }

    pub fn observe_every_n(&self) -> u32 {
        self.observe_every_n
    }

    pub fn act_every_n(&self) -> u32 {
        self.act_every_n
    }

    pub fn has_observe(&self) -> bool {
        self.observe.is_some()
    }

    pub fn has_act(&self) -> bool {
        self.act.is_some()
    }

    pub(crate) fn observe_fn(&mut self) -> Option<&mut ObserveFn> {
        self.observe.as_mut()
    }

    pub(crate) fn act_fn(&mut self) -> Option<&mut ActFn> {
        self.act.as_mut()
    }

    /// Records that this point ran at global timestep `step`. Returns
    /// `false` if it already had, in which case nothing should run again.
    pub(crate) fn claim_step(&mut self, step: u64) -> bool {
        if self.handled_step == Some(step) {
            return false;
        }
        self.handled_step = Some(step);
        true
    }
}

impl fmt::Debug for CallingPointRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallingPointRegistration")
            .field("point", &self.point)
            .field("observe", &self.has_observe())
            .field("act", &self.has_act())
            .field("update_state", &self.update_state)
            .field("observe_every_n", &self.observe_every_n)
            .field("act_every_n", &self.act_every_n)
            .finish()
    }
}

/// All calling-point registrations of one engine, in registration order.
#[derive(Debug, Default)]
pub struct Scheduler {
    registrations: IndexMap<CallingPoint, CallingPointRegistration>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration.
    ///
    /// Acting more often than observing, or refreshing state at more than one
    /// calling point, is legal but logged as a warning.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateCallingPoint`] if the point is registered.
    /// - [`EngineError::InvalidFrequency`] if a frequency is zero.
    pub fn register(&mut self, reg: CallingPointRegistration) -> Result<()> {
        if reg.observe_every_n == 0 {
            return Err(EngineError::InvalidFrequency { what: "observation" });
        }
        if reg.act_every_n == 0 {
            return Err(EngineError::InvalidFrequency { what: "actuation" });
        }
        if self.registrations.contains_key(&reg.point) {
            return Err(EngineError::DuplicateCallingPoint(reg.point.to_string()));
        }

        if reg.act_every_n > reg.observe_every_n {
            warn!(
                point = %reg.point,
                observe_every_n = reg.observe_every_n,
                act_every_n = reg.act_every_n,
                "actuation frequency is greater than observation frequency"
            );
        }
        if reg.update_state {
            let others: Vec<String> = self
                .registrations
                .values()
                .filter(|r| r.update_state)
                .map(|r| r.point.to_string())
                .collect();
            if !others.is_empty() {
                warn!(
                    point = %reg.point,
                    ?others,
                    "state is updated at multiple calling points per timestep, only once is advised"
                );
            }
        }

        info!(
            point = %reg.point,
            observation = reg.has_observe(),
            actuation = reg.has_act(),
            update_state = reg.update_state,
            observe_every_n = reg.observe_every_n,
            act_every_n = reg.act_every_n,
            "registered calling point"
        );
        self.registrations.insert(reg.point, reg);
        Ok(())
    }

    pub fn contains(&self, point: CallingPoint) -> bool {
        self.registrations.contains_key(&point)
    }

    pub fn get(&self, point: CallingPoint) -> Option<&CallingPointRegistration> {
        self.registrations.get(&point)
    }

    pub(crate) fn get_mut(&mut self, point: CallingPoint) -> Option<&mut CallingPointRegistration> {
        self.registrations.get_mut(&point)
    }

    /// Registered points in registration order.
    pub fn points(&self) -> impl Iterator<Item = CallingPoint> + '_ {
        self.registrations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Forgets which timesteps each point has handled.
    pub(crate) fn reset(&mut self) {
        for reg in self.registrations.values_mut() {
            reg.handled_step = None;
        }
    }
}
