//! Logical timestep tracking for a simulator-driven run.
//!
//! The simulator owns the clock; the tracker only observes the ticks it is
//! fed and derives a global counter from them. Repeated firings at the same
//! `(calendar, zone_substep)` instant (several calling points per timestep,
//! or sub-timestep system iterations) count once.
//!
//! # Examples
//!
//! ```
//! use chrono::NaiveDate;
//! use ems_sync::sim::clock::{TickOutcome, TimestepTracker};
//! use ems_sync::sim::types::SimTick;
//!
//! let t0 = NaiveDate::from_ymd_opt(2024, 1, 1)
//!     .unwrap()
//!     .and_hms_opt(0, 15, 0)
//!     .unwrap();
//! let mut tracker = TimestepTracker::new();
//! assert_eq!(tracker.on_simulator_tick(SimTick::new(t0, 1, false)), TickOutcome::Advanced);
//! assert_eq!(tracker.on_simulator_tick(SimTick::new(t0, 1, false)), TickOutcome::Repeated);
//! assert_eq!(tracker.global_counter(), 1);
//! ```
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::sim::types::{CallingPoint, SimTick};

/// Result of feeding one simulator tick to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Simulator is warming up; downstream work must be skipped.
    Warmup,
    /// A new logical timestep began; the counter was incremented.
    Advanced,
    /// Same logical timestep as the previous tick.
    Repeated,
}

/// Index entry of one state update: the row key of every aligned table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowStamp {
    pub calendar: NaiveDateTime,
    pub global_step: u64,
    pub zone_substep: u32,
    pub calling_point: CallingPoint,
}

/// Tracks calendar, sub-step, warmup state and the global timestep counter.
#[derive(Debug, Clone, Default)]
pub struct TimestepTracker {
    global_counter: u64,
    zone_substep: u32,
    calendar: Option<NaiveDateTime>,
    /// Last non-warmup `(calendar, substep)` pair, for dedup.
    previous: Option<(NaiveDateTime, u32)>,
    warmup_done: bool,
    timeline: Vec<RowStamp>,
}

impl TimestepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a simulator tick and advances the counter on a new instant.
    pub fn on_simulator_tick(&mut self, tick: SimTick) -> TickOutcome {
        self.calendar = Some(tick.calendar);
        self.zone_substep = tick.zone_substep;
        if tick.warmup {
            return TickOutcome::Warmup;
        }
        self.warmup_done = true;

        let pair = (tick.calendar, tick.zone_substep);
        if self.previous == Some(pair) {
            return TickOutcome::Repeated;
        }
        self.previous = Some(pair);
        self.global_counter += 1;
        TickOutcome::Advanced
    }

    /// `true` when `frequency` divides the global counter.
    pub fn modulo_due(&self, frequency: u32) -> bool {
        frequency > 0 && self.global_counter % u64::from(frequency) == 0
    }

    pub fn global_counter(&self) -> u64 {
        self.global_counter
    }

    pub fn zone_substep(&self) -> u32 {
        self.zone_substep
    }

    pub fn calendar(&self) -> Option<NaiveDateTime> {
        self.calendar
    }

    /// Whether the first non-warmup tick has been seen.
    pub fn warmup_done(&self) -> bool {
        self.warmup_done
    }

    /// Stamp of the current instant as seen from `calling_point`.
    pub fn stamp(&self, calling_point: CallingPoint) -> Option<RowStamp> {
        Some(RowStamp {
            calendar: self.calendar?,
            global_step: self.global_counter,
            zone_substep: self.zone_substep,
            calling_point,
        })
    }

    /// Opens a new state-update row at the current instant and returns its index.
    pub(crate) fn push_row(&mut self, calling_point: CallingPoint) -> Option<usize> {
        let stamp = self.stamp(calling_point)?;
        self.timeline.push(stamp);
        Some(self.timeline.len() - 1)
    }

    /// Index of the most recent state-update row.
    pub fn current_row(&self) -> Option<usize> {
        self.timeline.len().checked_sub(1)
    }

    /// Calendar series: one stamp per state update, in order.
    pub fn timeline(&self) -> &[RowStamp] {
        &self.timeline
    }

    /// Returns to the freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
