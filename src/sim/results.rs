//! Post-run materialization of channel histories into aligned tables.

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::io::export;
use crate::sim::channel::{Channel, ChannelRegistry};
use crate::sim::clock::{RowStamp, TimestepTracker};
use crate::sim::reward::RewardLog;
use crate::sim::types::{Category, ExitStatus, Reading};
use crate::sim::views::CustomView;

/// Name of the standalone reward table built when rewards do not line up
/// with the state-update timeline.
pub const REWARD_TABLE: &str = "reward";

/// Categories that get a default table, in output order.
const TABLE_CATEGORIES: [Category; 6] = [
    Category::Variable,
    Category::InternalVariable,
    Category::Meter,
    Category::Weather,
    Category::Actuator,
    Category::Setpoint,
];

/// One table row: its index stamp and one value per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    #[serde(flatten)]
    pub stamp: RowStamp,
    pub values: Vec<Reading>,
}

/// A named table indexed by `(calendar, global step, substep, calling point)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, stamp: RowStamp, values: Vec<Reading>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(TableRow { stamp, values });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Reading>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Rows in `from..to`, clamped to the table length.
    pub fn slice(&self, from: usize, to: usize) -> &[TableRow] {
        let to = to.min(self.rows.len());
        let from = from.min(to);
        &self.rows[from..to]
    }

    fn append_column(&mut self, name: String, values: impl IntoIterator<Item = Reading>) {
        self.columns.push(name);
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.values.push(v);
        }
    }
}

/// The set of tables produced by one run, default tables first and custom
/// views after, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Results {
    tables: IndexMap<String, Table>,
}

impl Results {
    /// Builds every table from the engine's run state.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NothingTracked`] if no calling point was registered.
    /// - [`EngineError::RunNotFinished`] if no exit status was recorded.
    /// - [`EngineError::SimulationFailed`] if the run exited nonzero.
    /// - [`EngineError::UnusedChannel`] if a custom view lists an actuator
    ///   that was never commanded.
    pub fn build(
        status: Option<ExitStatus>,
        has_points: bool,
        registry: &ChannelRegistry,
        tracker: &TimestepTracker,
        rewards: &RewardLog,
        views: &[CustomView],
    ) -> Result<Self> {
        if !has_points {
            return Err(EngineError::NothingTracked);
        }
        let status = status.ok_or(EngineError::RunNotFinished)?;
        if !status.success() {
            return Err(EngineError::SimulationFailed(status.0));
        }

        let timeline = tracker.timeline();
        let mut tables = IndexMap::new();

        for category in TABLE_CATEGORIES {
            let channels: Vec<&Channel> = registry
                .of_category(category)
                .map(|(_, c)| c)
                .filter(|c| keep_in_default_table(c))
                .collect();
            if channels.is_empty() {
                continue;
            }
            let carry = category == Category::InternalVariable;
            let columns: Vec<Vec<Reading>> = channels
                .iter()
                .map(|c| aligned_column(c, timeline, carry))
                .collect();

            let mut table = Table::new(
                category.token(),
                channels.iter().map(|c| c.name().to_string()).collect(),
            );
            for (i, stamp) in timeline.iter().enumerate() {
                table.push(*stamp, columns.iter().map(|col| col[i]).collect());
            }
            tables.insert(table.name.clone(), table);
        }

        attach_rewards(&mut tables, rewards, timeline.len());

        for view in views {
            view.check_used(registry)?;
            let table = view_table(view, registry, rewards);
            tables.insert(table.name.clone(), table);
        }

        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns the requested table (all tables when `view` is `None`) and
    /// optionally writes them as delimited text.
    ///
    /// With a `view`, `path` is the output file. Without one, `path` is a
    /// directory receiving one `<name>.csv` per table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownTable`] for an unknown `view`, or an
    /// I/O or CSV error if writing fails.
    pub fn export(&self, view: Option<&str>, path: Option<&Path>, delimiter: u8) -> Result<Vec<&Table>> {
        let selected: Vec<&Table> = match view {
            Some(name) => vec![
                self.table(name)
                    .ok_or_else(|| EngineError::UnknownTable(name.to_string()))?,
            ],
            None => self.tables().collect(),
        };

        match (path, view) {
            (Some(file), Some(_)) => {
                for table in &selected {
                    export::export_table(table, file, delimiter)?;
                }
            }
            (Some(dir), None) => {
                std::fs::create_dir_all(dir)?;
                for table in &selected {
                    export::export_table(table, &dir.join(format!("{}.csv", table.name)), delimiter)?;
                }
            }
            (None, _) => {}
        }
        Ok(selected)
    }
}

fn keep_in_default_table(channel: &Channel) -> bool {
    match channel.category() {
        Category::Actuator | Category::Setpoint if !channel.is_actuated() => {
            info!(
                channel = channel.name(),
                "dropping channel that was never actuated from default tables"
            );
            false
        }
        _ => true,
    }
}

/// Places each sample in the row it was stamped with, or, for samples
/// without a row, in every row opened at the same global timestep. The last
/// sample of a row wins and rows without a sample stay unset. With `carry`,
/// unset rows repeat the previous value.
fn aligned_column(channel: &Channel, timeline: &[RowStamp], carry: bool) -> Vec<Reading> {
    let mut col = vec![None; timeline.len()];
    for sample in channel.history() {
        match sample.row {
            Some(row) if row < timeline.len() => col[row] = sample.value,
            Some(_) => {}
            None => {
                for (slot, stamp) in col.iter_mut().zip(timeline) {
                    if stamp.global_step == sample.step {
                        *slot = sample.value;
                    }
                }
            }
        }
    }
    if carry {
        let mut last = None;
        for v in &mut col {
            match v {
                Some(_) => last = *v,
                None => *v = last,
            }
        }
    }
    col
}

fn attach_rewards(tables: &mut IndexMap<String, Table>, rewards: &RewardLog, rows: usize) {
    let Some(shape) = rewards.shape() else {
        return;
    };
    let names = shape.column_names();

    if rewards.len() == rows {
        for table in tables.values_mut() {
            for (j, name) in names.iter().enumerate() {
                table.append_column(
                    name.clone(),
                    rewards.entries().iter().map(|e| e.values.get(j).copied()),
                );
            }
        }
        return;
    }

    warn!(
        rewards = rewards.len(),
        rows, "reward log does not line up with state updates, writing a separate reward table"
    );
    let mut table = Table::new(REWARD_TABLE, names);
    for entry in rewards.entries() {
        table.push(entry.stamp, entry.values.iter().copied().map(Some).collect());
    }
    tables.insert(table.name.clone(), table);
}

fn view_table(view: &CustomView, registry: &ChannelRegistry, rewards: &RewardLog) -> Table {
    let mut columns: Vec<String> = view
        .channel_ids()
        .map(|id| registry.get(id).name().to_string())
        .collect();
    let reward_arity = if view.wants_reward() {
        let names = rewards
            .shape()
            .map(|s| s.column_names())
            .unwrap_or_else(|| vec![REWARD_TABLE.to_string()]);
        let arity = names.len();
        columns.extend(names);
        arity
    } else {
        0
    };

    let mut table = Table::new(view.name(), columns);
    for row in view.rows() {
        let mut values = row.values.clone();
        values.extend((0..reward_arity).map(|j| row.reward.as_ref().and_then(|r| r.get(j).copied())));
        table.push(row.stamp, values);
    }
    table
}
