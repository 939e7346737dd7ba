//! Config-driven engine construction and scripted runs.

use tracing::info;

use crate::config::{RunConfig, TransformDecl};
use crate::error::Result;
use crate::sim::channel::Transform;
use crate::sim::engine::Engine;
use crate::sim::schedule::CallingPointRegistration;
use crate::sim::scripted::ScriptedSimulator;
use crate::sim::types::{Descriptor, ExitStatus};

/// Engine after a completed (or failed) scripted run.
#[derive(Debug)]
pub struct RunOutcome {
    pub engine: Engine,
    pub status: ExitStatus,
}

fn transform(decl: Option<&TransformDecl>) -> Option<Transform> {
    decl.and_then(TransformDecl::build)
}

/// Registers every channel, calling point and view declared in `cfg`.
///
/// Expects a config that passed [`RunConfig::validate`]; anything the
/// engine still rejects is returned as its error.
pub fn build_engine(cfg: &RunConfig) -> Result<Engine> {
    let delimiter = cfg.delimiter_byte().unwrap_or(b',');
    let mut engine = Engine::new(cfg.run.timesteps_per_hour).with_delimiter(delimiter);

    for (name, d) in &cfg.variables {
        engine.register(
            name,
            Descriptor::variable(&d.name, &d.key),
            transform(d.transform.as_ref()),
        )?;
    }
    for (name, d) in &cfg.internal_variables {
        engine.register(
            name,
            Descriptor::internal_variable(&d.name, &d.key),
            transform(d.transform.as_ref()),
        )?;
    }
    for (name, d) in &cfg.meters {
        engine.register(name, Descriptor::meter(&d.meter), transform(d.transform.as_ref()))?;
    }
    for (name, d) in &cfg.weather {
        engine.register(name, Descriptor::Weather(d.metric), transform(d.transform.as_ref()))?;
    }
    for (name, d) in &cfg.actuators {
        engine.register(
            name,
            Descriptor::actuator(&d.component_type, &d.control_type, &d.key),
            transform(d.transform.as_ref()),
        )?;
    }

    for cp in &cfg.calling_points {
        let mut reg = CallingPointRegistration::new(cp.point)
            .update_state(cp.update_state)
            .observe_every(cp.observe_every_n)
            .act_every(cp.act_every_n);
        if let Some(observe) = cp.observe.clone() {
            reg = reg.observe(observe.into_callback());
        }
        if let Some(act) = cp.act.clone() {
            reg = reg.act(act.into_callback());
        }
        engine.register_point(reg)?;
    }

    for view in &cfg.views {
        let channels: Vec<&str> = view.channels.iter().map(String::as_str).collect();
        engine.declare_custom_view(&view.name, view.point, view.frequency, &channels)?;
    }

    info!(
        channels = engine.registry().len(),
        points = engine.scheduler().len(),
        views = engine.views().len(),
        "engine built from config"
    );
    Ok(engine)
}

/// Builds the engine and runs it against the scripted simulator.
///
/// # Errors
///
/// Returns the first registration or dispatch error. A nonzero simulator
/// exit status is not an error here; it is reported in the outcome.
pub fn run_scripted(cfg: &RunConfig) -> Result<RunOutcome> {
    let mut engine = build_engine(cfg)?;
    let mut sim = ScriptedSimulator::new(cfg.simulator.clone());
    let status = engine.run(&mut sim)?;
    Ok(RunOutcome { engine, status })
}
