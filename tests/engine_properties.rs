//! Dispatch, query and actuation behavior of the engine driven by a fake
//! simulator.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{FakeSim, tick};
use ems_sync::EngineError;
use ems_sync::sim::actuation::ActuationMap;
use ems_sync::sim::engine::{DispatchOutcome, Engine};
use ems_sync::sim::query::ReverseIndex;
use ems_sync::sim::schedule::CallingPointRegistration;
use ems_sync::sim::types::{CallingPoint, Category, Day, Descriptor, SimTick, WeatherMetric};

const POINT: CallingPoint = CallingPoint::BeginZoneTimestepAfterInitHeatBalance;

fn zone_temp() -> Descriptor {
    Descriptor::variable("Zone Air Temperature", "Zone 1")
}

fn heating_sp() -> Descriptor {
    Descriptor::actuator("Zone Temperature Control", "Heating Setpoint", "Zone 1")
}

fn fake_sim(readings: &[f64]) -> FakeSim {
    FakeSim::new(4)
        .variable("Zone Air Temperature", "Zone 1", readings)
        .actuator("Zone Temperature Control", "Heating Setpoint", "Zone 1")
}

#[test]
fn observe_fires_every_nth_tick() {
    for (ticks, every) in [(12u32, 1u32), (12, 3), (10, 4), (3, 5)] {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&fired);

        let mut engine = Engine::new(4);
        engine.register("t", zone_temp(), None).unwrap();
        engine
            .register_point(
                CallingPointRegistration::new(POINT)
                    .update_state(true)
                    .observe_every(every)
                    .observe(move |ctx| {
                        log.borrow_mut().push(ctx.global_counter());
                        None
                    }),
            )
            .unwrap();

        let mut sim = fake_sim(&[20.0]).steps(POINT, ticks);
        engine.run(&mut sim).unwrap();

        let expected: Vec<u64> = (1..=u64::from(ticks / every))
            .map(|k| k * u64::from(every))
            .collect();
        assert_eq!(*fired.borrow(), expected, "ticks={ticks} every={every}");
    }
}

#[test]
fn duplicate_registrations_fail() {
    let mut engine = Engine::new(4);
    engine.register("x", zone_temp(), None).unwrap();
    assert!(matches!(
        engine.register("x", Descriptor::meter("Electricity:Facility"), None),
        Err(EngineError::DuplicateChannel {
            existing: Category::Variable,
            ..
        })
    ));

    engine
        .register_point(CallingPointRegistration::new(POINT))
        .unwrap();
    assert!(matches!(
        engine.register_point(CallingPointRegistration::new(POINT)),
        Err(EngineError::DuplicateCallingPoint(_))
    ));
}

#[test]
fn reverse_index_reads_back_from_latest() {
    let mut engine = Engine::new(4);
    engine.register("x", zone_temp(), None).unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).update_state(true))
        .unwrap();
    let mut sim = fake_sim(&[1.0, 2.0, 3.0]).steps(POINT, 3);
    engine.run(&mut sim).unwrap();

    let latest = engine.get(["x"], ReverseIndex::At(0)).unwrap();
    assert_eq!(latest["x"], vec![Some(3.0)]);
    let earlier = engine.get(["x"], ReverseIndex::At(2)).unwrap();
    assert_eq!(earlier["x"], vec![Some(1.0)]);
    let many = engine.get(["x"], ReverseIndex::Many(vec![1, 0])).unwrap();
    assert_eq!(many["x"], vec![Some(2.0), Some(3.0)]);
    let all = engine.get(["x"], ReverseIndex::All).unwrap();
    assert_eq!(all["x"], vec![Some(1.0), Some(2.0), Some(3.0)]);

    // Out of range is a note, not an error.
    let past = engine.get(["x"], ReverseIndex::At(3)).unwrap();
    assert!(past["x"].is_empty());
}

#[test]
fn category_token_cannot_mix_with_names() {
    let mut engine = Engine::new(4);
    engine.register("x", zone_temp(), None).unwrap();
    assert!(matches!(
        engine.get(["var", "x"], ReverseIndex::All),
        Err(EngineError::CategoryQueryMix { .. })
    ));
    let by_category = engine.get(Category::Variable, ReverseIndex::All).unwrap();
    assert_eq!(by_category.keys().collect::<Vec<_>>(), vec!["x"]);
}

#[test]
fn identical_ticks_count_once() {
    let mut engine = Engine::new(4);
    engine.register("x", zone_temp(), None).unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).update_state(true))
        .unwrap();
    let mut sim = fake_sim(&[20.0]);

    engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap();
    engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap();
    assert_eq!(engine.tracker().global_counter(), 1);

    engine.dispatch(POINT, tick(15, 2), &mut sim).unwrap();
    assert_eq!(engine.tracker().global_counter(), 2);
}

#[test]
fn repeated_tick_runs_callbacks_once() {
    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine.register("a", heating_sp(), None).unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .observe(|_ctx| Some(1.0.into()))
                .act(|_ctx| Some(ActuationMap::from([("a".to_string(), Some(21.0))]))),
        )
        .unwrap();
    let mut sim = fake_sim(&[20.0, 25.0]);

    let first = engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap();
    assert_eq!(
        first,
        DispatchOutcome::Completed {
            state_row: Some(0),
            observed: true,
            acted: true
        }
    );
    for _ in 0..2 {
        assert_eq!(
            engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap(),
            DispatchOutcome::Repeated
        );
    }

    assert_eq!(engine.tracker().global_counter(), 1);
    assert_eq!(engine.tracker().timeline().len(), 1);
    assert_eq!(engine.registry().by_name("t").unwrap().history().len(), 1);
    assert_eq!(engine.latest("t").unwrap(), Some(20.0));
    assert_eq!(engine.rewards().len(), 1);
    assert_eq!(sim.sets.len(), 1);
    let counters = engine.counters();
    assert_eq!(counters.dispatches, 1);
    assert_eq!(counters.observations, 1);
    assert_eq!(counters.actuations, 1);
    assert_eq!(counters.repeated_dispatches, 2);
}

#[test]
fn system_iterations_collapse_into_one_row_per_timestep() {
    let point = CallingPoint::InsideSystemIterationLoop;
    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine.register("a", heating_sp(), None).unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(point)
                .update_state(true)
                .observe(|_ctx| Some(0.5.into()))
                .act(|_ctx| Some(ActuationMap::from([("a".to_string(), Some(21.0))]))),
        )
        .unwrap();

    let mut sim = fake_sim(&[20.0, 21.0]);
    for step in 1..=2u32 {
        for _ in 0..3 {
            sim.script.push((point, tick(15 * i64::from(step), step)));
        }
    }
    engine.run(&mut sim).unwrap();

    assert_eq!(engine.tracker().global_counter(), 2);
    assert_eq!(engine.rewards().len(), 2);
    assert_eq!(sim.sets.len(), 2);
    assert_eq!(engine.counters().repeated_dispatches, 4);

    let results = engine.materialize().unwrap();
    let vars = results.table("var").unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars.column("t").unwrap(), vec![Some(20.0), Some(21.0)]);
    assert_eq!(vars.column("reward").unwrap(), vec![Some(0.5); 2]);
}

#[test]
fn warmup_and_not_ready_ticks_do_nothing() {
    let mut engine = Engine::new(4);
    engine.register("x", zone_temp(), None).unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).update_state(true))
        .unwrap();
    let mut sim = fake_sim(&[20.0]);

    sim.ready = false;
    assert_eq!(
        engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap(),
        DispatchOutcome::NotReady
    );
    sim.ready = true;
    let warmup = SimTick::new(common::midnight(), 1, true);
    assert_eq!(
        engine.dispatch(POINT, warmup, &mut sim).unwrap(),
        DispatchOutcome::Warmup
    );
    assert_eq!(engine.tracker().global_counter(), 0);
    assert!(engine.tracker().timeline().is_empty());
}

#[test]
fn unresolvable_handle_aborts_dispatch() {
    let mut engine = Engine::new(4);
    engine
        .register("x", Descriptor::variable("Bogus", "Nowhere"), None)
        .unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT))
        .unwrap();
    let mut sim = fake_sim(&[20.0]);
    assert!(matches!(
        engine.dispatch(POINT, tick(15, 1), &mut sim),
        Err(EngineError::HandleResolution { .. })
    ));
}

#[test]
fn unregistered_point_is_rejected() {
    let mut engine = Engine::new(4);
    let mut sim = fake_sim(&[20.0]);
    assert!(matches!(
        engine.dispatch(CallingPoint::EndZoneSizing, tick(15, 1), &mut sim),
        Err(EngineError::InvalidCallingPoint(_))
    ));
}

#[test]
fn timestep_mismatch_is_fatal() {
    let mut engine = Engine::new(6);
    engine
        .register_point(CallingPointRegistration::new(POINT))
        .unwrap();
    let mut sim = fake_sim(&[20.0]);
    assert!(matches!(
        engine.dispatch(POINT, tick(15, 1), &mut sim),
        Err(EngineError::TimestepMismatch {
            configured: 6,
            model: 4
        })
    ));
}

#[test]
fn null_actuation_relinquishes_control() {
    let mut engine = Engine::new(4);
    engine
        .register("zn0_heating_sp", heating_sp(), None)
        .unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .act(|_ctx| Some(ActuationMap::from([("zn0_heating_sp".to_string(), None)]))),
        )
        .unwrap();
    let mut sim = fake_sim(&[20.0]);
    engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap();

    let handle = sim
        .handle("act|Zone Temperature Control|Heating Setpoint|Zone 1")
        .unwrap();
    assert_eq!(sim.resets, vec![handle]);
    assert!(sim.sets.is_empty());
    assert_eq!(engine.latest("setpoint_zn0_heating_sp").unwrap(), None);
    assert_eq!(
        engine
            .registry()
            .by_name("setpoint_zn0_heating_sp")
            .unwrap()
            .history()
            .len(),
        1
    );
}

#[test]
fn unknown_actuator_applies_nothing() {
    let mut engine = Engine::new(4);
    engine
        .register("zn0_heating_sp", heating_sp(), None)
        .unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).act(|_ctx| {
            Some(ActuationMap::from([
                ("zn0_heating_sp".to_string(), Some(21.0)),
                ("misspelled".to_string(), Some(1.0)),
            ]))
        }))
        .unwrap();
    let mut sim = fake_sim(&[20.0]);
    assert!(matches!(
        engine.dispatch(POINT, tick(15, 1), &mut sim),
        Err(EngineError::UnknownActuator(name)) if name == "misspelled"
    ));
    assert!(sim.sets.is_empty());
}

#[test]
fn reward_arity_is_fixed_by_first_reward() {
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    let mut engine = Engine::new(4);
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .observe(move |_ctx| {
                    *counter.borrow_mut() += 1;
                    if *counter.borrow() == 1 {
                        Some(vec![1.0, 2.0].into())
                    } else {
                        Some(3.0.into())
                    }
                }),
        )
        .unwrap();
    let mut sim = fake_sim(&[20.0]).steps(POINT, 2);
    assert!(matches!(
        engine.run(&mut sim),
        Err(EngineError::RewardArityMismatch {
            expected: 2,
            found: 1
        })
    ));
    assert_eq!(engine.rewards().len(), 1);
}

#[test]
fn end_to_end_observe_every_tick_act_every_other() {
    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine.register("a", heating_sp(), None).unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .observe_every(1)
                .act_every(2)
                .observe(|_ctx| Some(1.0.into()))
                .act(|_ctx| Some(ActuationMap::from([("a".to_string(), Some(20.0))]))),
        )
        .unwrap();

    let mut sim = fake_sim(&[19.0, 19.5, 20.0, 20.5]).steps(POINT, 4);
    let status = engine.run(&mut sim).unwrap();
    assert!(status.success());

    assert_eq!(engine.tracker().global_counter(), 4);
    assert_eq!(engine.rewards().len(), 4);
    assert_eq!(sim.sets.len(), 2);

    let results = engine.materialize().unwrap();
    let setpoints = results.table("setpoint").unwrap();
    assert_eq!(
        setpoints.column("setpoint_a").unwrap(),
        vec![None, Some(20.0), None, Some(20.0)]
    );
    let vars = results.table("var").unwrap();
    assert_eq!(
        vars.column("t").unwrap(),
        vec![Some(19.0), Some(19.5), Some(20.0), Some(20.5)]
    );
    assert_eq!(vars.column("reward").unwrap(), vec![Some(1.0); 4]);
}

#[test]
fn reset_allows_a_second_run() {
    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .observe(|_ctx| Some(0.5.into())),
        )
        .unwrap();

    let mut sim = fake_sim(&[20.0]).steps(POINT, 4);
    engine.run(&mut sim).unwrap();
    engine.reset();
    assert_eq!(engine.tracker().global_counter(), 0);
    assert!(engine.rewards().is_empty());

    engine.run(&mut sim).unwrap();
    assert_eq!(engine.tracker().global_counter(), 4);
    assert_eq!(engine.rewards().len(), 4);
}

#[test]
fn setpoints_line_up_with_the_timestep_they_were_commanded() {
    let act_point = CallingPoint::BeginZoneTimestepBeforeInitHeatBalance;
    let state_point = CallingPoint::EndZoneTimestepAfterZoneReporting;
    let commanded = Rc::new(RefCell::new(20.0));
    let next = Rc::clone(&commanded);

    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine.register("a", heating_sp(), None).unwrap();
    engine
        .register_point(CallingPointRegistration::new(act_point).act(move |_ctx| {
            *next.borrow_mut() += 1.0;
            Some(ActuationMap::from([("a".to_string(), Some(*next.borrow()))]))
        }))
        .unwrap();
    engine
        .register_point(CallingPointRegistration::new(state_point).update_state(true))
        .unwrap();

    let mut sim = fake_sim(&[20.0]);
    for step in 1..=2u32 {
        let at = tick(15 * i64::from(step), step);
        sim.script.push((act_point, at));
        sim.script.push((state_point, at));
    }
    engine.run(&mut sim).unwrap();
    assert_eq!(*commanded.borrow(), 22.0);

    let results = engine.materialize().unwrap();
    let setpoints = results.table("setpoint").unwrap();
    assert_eq!(
        setpoints.column("setpoint_a").unwrap(),
        vec![Some(21.0), Some(22.0)]
    );
    let actuators = results.table("actuator").unwrap();
    assert_eq!(
        actuators.column("a").unwrap(),
        vec![Some(21.0), Some(22.0)]
    );
}

#[test]
fn weather_channels_read_today_at_each_row() {
    let mut engine = Engine::new(4);
    engine
        .register("oat", Descriptor::Weather(WeatherMetric::OutdoorDryBulb), None)
        .unwrap();
    engine
        .register("sun", Descriptor::Weather(WeatherMetric::SunIsUp), None)
        .unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).update_state(true))
        .unwrap();
    let mut sim = FakeSim::new(4).steps(POINT, 3);
    engine.run(&mut sim).unwrap();

    assert_eq!(
        sim.weather_calls,
        vec![
            (WeatherMetric::OutdoorDryBulb, Day::Today, 0, 1),
            (WeatherMetric::OutdoorDryBulb, Day::Today, 0, 2),
            (WeatherMetric::OutdoorDryBulb, Day::Today, 0, 3),
        ]
    );
    assert_eq!(sim.sun_calls, 3);

    let results = engine.materialize().unwrap();
    let weather = results.table("weather").unwrap();
    assert_eq!(weather.columns(), ["oat", "sun"]);
    assert_eq!(
        weather.column("oat").unwrap(),
        vec![Some(0.1), Some(0.2), Some(0.3)]
    );
    assert_eq!(weather.column("sun").unwrap(), vec![Some(0.0); 3]);
}

#[test]
fn internal_variables_are_read_once() {
    let mut engine = Engine::new(4);
    engine
        .register(
            "area",
            Descriptor::internal_variable("Zone Floor Area", "Zone 1"),
            None,
        )
        .unwrap();
    engine
        .register_point(CallingPointRegistration::new(POINT).update_state(true))
        .unwrap();
    let mut sim = FakeSim::new(4)
        .internal_variable("Zone Floor Area", "Zone 1", 100.0)
        .steps(POINT, 4);
    engine.run(&mut sim).unwrap();

    assert_eq!(sim.internal_reads, 1);
    let all = engine.get(["area"], ReverseIndex::All).unwrap();
    assert_eq!(all["area"], vec![Some(100.0)]);

    let results = engine.materialize().unwrap();
    assert_eq!(
        results.table("intvar").unwrap().column("area").unwrap(),
        vec![Some(100.0); 4]
    );
}

#[test]
fn forecast_from_a_callback_asks_for_tomorrow() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);

    let mut engine = Engine::new(4);
    engine.register("t", zone_temp(), None).unwrap();
    engine
        .register("oat", Descriptor::Weather(WeatherMetric::OutdoorDryBulb), None)
        .unwrap();
    engine
        .register("sun", Descriptor::Weather(WeatherMetric::SunIsUp), None)
        .unwrap();
    engine
        .register_point(
            CallingPointRegistration::new(POINT)
                .update_state(true)
                .observe(move |ctx| {
                    let forecast = ctx.forecast(&["oat", "sun"], Day::Tomorrow, 6, 2).unwrap();
                    log.borrow_mut().push((forecast["oat"], forecast["sun"]));

                    assert!(matches!(
                        ctx.forecast(&["oat"], Day::Tomorrow, 25, 1),
                        Err(EngineError::ForecastOutOfRange(_))
                    ));
                    assert!(matches!(
                        ctx.forecast(&["oat"], Day::Tomorrow, 6, 5),
                        Err(EngineError::ForecastOutOfRange(_))
                    ));
                    assert!(matches!(
                        ctx.forecast(&["t"], Day::Tomorrow, 6, 1),
                        Err(EngineError::UnknownChannel(_))
                    ));
                    None
                }),
        )
        .unwrap();

    let mut sim = fake_sim(&[20.0]);
    sim.sun_up = true;
    engine.dispatch(POINT, tick(15, 1), &mut sim).unwrap();

    assert_eq!(*seen.borrow(), vec![(106.2, 1.0)]);
    let tomorrow: Vec<_> = sim
        .weather_calls
        .iter()
        .filter(|(_, day, _, _)| *day == Day::Tomorrow)
        .collect();
    assert_eq!(
        tomorrow,
        vec![&(WeatherMetric::OutdoorDryBulb, Day::Tomorrow, 6, 2)]
    );
    // One read for the state refresh, one for the forecast.
    assert_eq!(sim.sun_calls, 2);
}
