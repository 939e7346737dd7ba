//! Post-run summary of what the engine did.

use std::fmt;

use serde::Serialize;

/// Dispatch counters maintained while the simulator drives the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    /// Dispatches that got past handle resolution and warmup.
    pub dispatches: u64,
    /// Dispatches skipped during warmup.
    pub warmup_dispatches: u64,
    /// Dispatches skipped because their point already ran this timestep.
    pub repeated_dispatches: u64,
    pub observations: u64,
    pub actuations: u64,
    /// Individual actuator commands sent to the simulator.
    pub commands: u64,
}

/// Aggregate run figures, printed after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Simulator exit code, if the run went through [`Engine::run`](crate::sim::engine::Engine::run).
    pub exit_status: Option<i32>,
    pub global_steps: u64,
    pub state_rows: usize,
    pub counters: DispatchCounters,
    pub rewards: usize,
    /// Per-element mean of all rewards.
    pub reward_mean: Option<Vec<f64>>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Summary ---")?;
        match self.exit_status {
            Some(code) => writeln!(f, "Exit status:           {code}")?,
            None => writeln!(f, "Exit status:           n/a")?,
        }
        writeln!(f, "Global timesteps:      {}", self.global_steps)?;
        writeln!(f, "State updates:         {}", self.state_rows)?;
        writeln!(
            f,
            "Dispatches:            {} ({} during warmup, {} repeated)",
            self.counters.dispatches,
            self.counters.warmup_dispatches,
            self.counters.repeated_dispatches
        )?;
        writeln!(f, "Observations:          {}", self.counters.observations)?;
        writeln!(
            f,
            "Actuations:            {} ({} commands)",
            self.counters.actuations, self.counters.commands
        )?;
        write!(f, "Rewards:               {}", self.rewards)?;
        if let Some(mean) = &self.reward_mean {
            let formatted: Vec<String> = mean.iter().map(|m| format!("{m:.3}")).collect();
            write!(f, " (mean {})", formatted.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reward_mean() {
        let summary = RunSummary {
            exit_status: Some(0),
            global_steps: 4,
            state_rows: 4,
            counters: DispatchCounters {
                dispatches: 4,
                observations: 4,
                actuations: 2,
                commands: 2,
                ..Default::default()
            },
            rewards: 4,
            reward_mean: Some(vec![1.0, 0.25]),
        };
        let text = summary.to_string();
        assert!(text.contains("Global timesteps:      4"));
        assert!(text.contains("(mean 1.000, 0.250)"));
    }

    #[test]
    fn display_without_run() {
        let summary = RunSummary {
            exit_status: None,
            global_steps: 0,
            state_rows: 0,
            counters: DispatchCounters::default(),
            rewards: 0,
            reward_mean: None,
        };
        let text = summary.to_string();
        assert!(text.contains("n/a"));
        assert!(text.ends_with("Rewards:               0"));
    }
}
