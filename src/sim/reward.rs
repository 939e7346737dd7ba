//! Reward accumulation for observation callbacks.

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::sim::clock::RowStamp;
use crate::sim::types::Reward;

/// Shape of the rewards in a log, fixed by the first recorded reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RewardShape {
    Scalar,
    Vector(usize),
}

impl RewardShape {
    fn of(reward: &Reward) -> Self {
        match reward {
            Reward::Scalar(_) => RewardShape::Scalar,
            Reward::Vector(v) => RewardShape::Vector(v.len()),
        }
    }

    pub fn arity(self) -> usize {
        match self {
            RewardShape::Scalar => 1,
            RewardShape::Vector(n) => n,
        }
    }

    /// Column names for tables: `reward` for scalars, `reward1..n` otherwise.
    pub fn column_names(self) -> Vec<String> {
        match self {
            RewardShape::Scalar => vec!["reward".to_string()],
            RewardShape::Vector(n) => (1..=n).map(|i| format!("reward{i}")).collect(),
        }
    }
}

/// One recorded reward, stamped with the instant it was returned and the
/// state-update row it followed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardEntry {
    pub stamp: RowStamp,
    pub row: Option<usize>,
    pub values: Vec<f64>,
}

/// Append-only log of rewards returned by observation callbacks.
#[derive(Debug, Clone, Default)]
pub struct RewardLog {
    shape: Option<RewardShape>,
    entries: Vec<RewardEntry>,
}

impl RewardLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reward, fixing the log's shape on the first call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::RewardArityMismatch`] if the shape differs from the
    ///   first reward's, or a vector reward is empty.
    /// - [`EngineError::NonNumericReward`] if any element is NaN or infinite.
    pub fn record(&mut self, reward: Reward, stamp: RowStamp, row: Option<usize>) -> Result<()> {
        let shape = RewardShape::of(&reward);
        let expected = self.shape.unwrap_or(shape);
        if shape != expected || shape.arity() == 0 {
            return Err(EngineError::RewardArityMismatch {
                expected: expected.arity().max(1),
                found: shape.arity(),
            });
        }
        if let Some((index, &value)) = reward
            .values()
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(EngineError::NonNumericReward { index, value });
        }

        self.shape = Some(shape);
        self.entries.push(RewardEntry {
            stamp,
            row,
            values: reward.values().to_vec(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent reward values.
    pub fn latest(&self) -> Option<&[f64]> {
        self.entries.last().map(|e| e.values.as_slice())
    }

    pub fn shape(&self) -> Option<RewardShape> {
        self.shape
    }

    /// Number of elements per reward, once known.
    pub fn arity(&self) -> Option<usize> {
        self.shape.map(RewardShape::arity)
    }

    pub fn entries(&self) -> &[RewardEntry] {
        &self.entries
    }

    /// Per-element mean over all entries.
    pub fn mean(&self) -> Option<Vec<f64>> {
        let arity = self.arity()?;
        if self.entries.is_empty() {
            return None;
        }
        let mut sums = vec![0.0; arity];
        for entry in &self.entries {
            for (sum, v) in sums.iter_mut().zip(&entry.values) {
                *sum += v;
            }
        }
        let n = self.entries.len() as f64;
        Some(sums.into_iter().map(|s| s / n).collect())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
