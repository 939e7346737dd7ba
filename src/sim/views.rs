//! User-declared tables sampled at one calling point on their own cadence.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::sim::channel::{ChannelId, ChannelRegistry, REWARD_TOKEN};
use crate::sim::clock::{RowStamp, TimestepTracker};
use crate::sim::reward::RewardLog;
use crate::sim::types::{CallingPoint, Category, Reading};

/// One column source of a custom view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewColumn {
    Channel(ChannelId),
    /// Latest reward, expanded to one column per element.
    Reward,
}

/// One captured row: the instant plus the latest value of each channel
/// column, and the latest reward if the view asks for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub stamp: RowStamp,
    pub values: Vec<Reading>,
    pub reward: Option<Vec<f64>>,
}

/// A named, restricted table filled while the simulation runs.
#[derive(Debug, Clone)]
pub struct CustomView {
    name: String,
    calling_point: CallingPoint,
    frequency: u32,
    columns: Vec<ViewColumn>,
    rows: Vec<ViewRow>,
}

impl CustomView {
    /// Resolves `channels` (plus the `reward` token) against `registry`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidFrequency`] if `frequency` is zero.
    /// - [`EngineError::UnknownChannel`] if a name is not registered.
    pub fn new(
        name: &str,
        calling_point: CallingPoint,
        frequency: u32,
        channels: &[&str],
        registry: &ChannelRegistry,
    ) -> Result<Self> {
        if frequency == 0 {
            return Err(EngineError::InvalidFrequency { what: "custom view" });
        }
        let columns = channels
            .iter()
            .map(|c| {
                if *c == REWARD_TOKEN {
                    Ok(ViewColumn::Reward)
                } else {
                    registry.id(c).map(ViewColumn::Channel)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_string(),
            calling_point,
            frequency,
            columns,
            rows: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calling_point(&self) -> CallingPoint {
        self.calling_point
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn columns(&self) -> &[ViewColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[ViewRow] {
        &self.rows
    }

    pub fn wants_reward(&self) -> bool {
        self.columns.contains(&ViewColumn::Reward)
    }

    /// Channel columns in declaration order.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.columns.iter().filter_map(|c| match c {
            ViewColumn::Channel(id) => Some(*id),
            ViewColumn::Reward => None,
        })
    }

    /// Appends a row if this dispatch is at the view's calling point and the
    /// global counter is on its cadence.
    pub(crate) fn capture(
        &mut self,
        point: CallingPoint,
        registry: &ChannelRegistry,
        tracker: &TimestepTracker,
        rewards: &RewardLog,
    ) {
        if point != self.calling_point || !tracker.modulo_due(self.frequency) {
            return;
        }
        let Some(stamp) = tracker.stamp(point) else {
            return;
        };
        // Repeated firings within one timestep yield a single row.
        if self
            .rows
            .last()
            .is_some_and(|r| r.stamp.global_step == stamp.global_step)
        {
            return;
        }
        let values = self
            .channel_ids()
            .map(|id| registry.get(id).latest().flatten())
            .collect();
        let reward = self
            .wants_reward()
            .then(|| rewards.latest().map(<[f64]>::to_vec))
            .flatten();
        debug!(view = %self.name, step = stamp.global_step, "captured custom view row");
        self.rows.push(ViewRow {
            stamp,
            values,
            reward,
        });
    }

    /// Fails if the view lists an actuator (or setpoint) that was never
    /// commanded during the run.
    pub(crate) fn check_used(&self, registry: &ChannelRegistry) -> Result<()> {
        for id in self.channel_ids() {
            let channel = registry.get(id);
            let controllable = matches!(channel.category(), Category::Actuator | Category::Setpoint);
            if controllable && !channel.is_actuated() {
                return Err(EngineError::UnusedChannel(channel.name().to_string()));
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }
}
