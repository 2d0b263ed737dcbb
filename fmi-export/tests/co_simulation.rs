mod common;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use common::{initialized, instantiate, Fragile, Ramp};
use float_cmp::approx_eq;
use fmi::{
    fmi3::{CallbackFunctions, CoSimulation, Common, Fmi3Error, Fmi3Res, Fmi3Status, GetSet, StatusKind, StatusValue},
    InterfaceType,
};
use fmi_export::fmi3::{ModelInstance, ModelState};

fn x(inst: &mut ModelInstance<Ramp>) -> f64 {
    let mut x = [0.0];
    inst.get_float64(&[2], &mut x).unwrap();
    x[0]
}

#[test_log::test]
fn step_advances_to_the_communication_point() {
    let mut inst = instantiate::<Ramp>(InterfaceType::CoSimulation, CallbackFunctions::default());
    inst.setup_experiment(None, 0.0, None).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.set_float64(&[1], &[2.5]).unwrap();
    inst.exit_initialization_mode().unwrap();

    assert_eq!(inst.do_step(0.0, 0.1, true), Ok(Fmi3Res::OK));
    assert_eq!(inst.get_double_status(StatusKind::LastSuccessfulTime), Ok(0.1));
    assert_eq!(inst.get_fmi_status(StatusKind::DoStepStatus), Ok(Fmi3Status::OK));
    assert_eq!(inst.get_bool_status(StatusKind::Terminated), Ok(false));
    assert!(approx_eq!(f64, x(&mut inst), 0.25, epsilon = 1e-12));
    assert_eq!(inst.context().time(), 0.1);
}

#[test]
fn status_of_another_type_is_an_error() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    assert_eq!(inst.get_int32_status(StatusKind::DoStepStatus), Err(Fmi3Error::Error));
    assert_eq!(inst.get_double_status(StatusKind::Terminated), Err(Fmi3Error::Error));
    assert_eq!(inst.get_string_status(StatusKind::PendingStatus), Ok(String::new()));
    // the query itself was legal, only the typed accessor did not fit
    assert_eq!(inst.state(), ModelState::StepMode);
    assert_eq!(inst.do_step(0.0, 0.1, true), Ok(Fmi3Res::OK));
}

#[test]
fn step_arguments_are_validated() {
    let mut inst = instantiate::<Ramp>(InterfaceType::CoSimulation, CallbackFunctions::default());
    inst.setup_experiment(None, 0.0, Some(1.0)).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.exit_initialization_mode().unwrap();
    let snapshot = inst.get_fmu_state().unwrap();

    for (t, h) in [(0.0, 0.0), (0.0, -0.1), (0.5, 0.1), (0.0, 1.5)] {
        assert_eq!(inst.do_step(t, h, true), Err(Fmi3Error::Error), "do_step({t}, {h})");
        assert_eq!(inst.state(), ModelState::Error);
        let mut fresh = initialized::<Ramp>(InterfaceType::CoSimulation);
        fresh.set_fmu_state(&snapshot).unwrap();
        inst = fresh;
    }

    // a step ending exactly at the stop time is fine
    assert_eq!(inst.do_step(0.0, 1.0, true), Ok(Fmi3Res::OK));
}

#[test_log::test]
fn discard_leaves_the_unit_unchanged() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    inst.set_float64(&[1, 6], &[1.0, 0.05]).unwrap();
    inst.do_step(0.0, 0.05, true).unwrap();
    let before = inst.context().store().clone();

    assert_eq!(inst.do_step(0.05, 0.1, true), Err(Fmi3Error::Discard));
    assert_eq!(inst.state(), ModelState::StepMode);
    assert_eq!(inst.get_double_status(StatusKind::LastSuccessfulTime), Ok(0.05));
    assert_eq!(inst.get_fmi_status(StatusKind::DoStepStatus), Ok(Fmi3Status::Discard));
    assert_eq!(inst.context().store(), &before);

    // retry with a smaller step
    assert_eq!(inst.do_step(0.05, 0.05, true), Ok(Fmi3Res::OK));
    assert!(approx_eq!(f64, x(&mut inst), 0.1, epsilon = 1e-12));
}

#[test]
fn input_derivatives_extrapolate_over_the_step() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    inst.set_input_derivatives(&[1], &[1], &[2.0]).unwrap();
    inst.do_step(0.0, 0.1, true).unwrap();
    // integral of u = 2t, up to the Euler error
    assert!(approx_eq!(f64, x(&mut inst), 0.01, epsilon = 2e-4));

    // consumed by the step, the input keeps its value
    let mut u = [1.0];
    inst.get_float64(&[1], &mut u).unwrap();
    assert_eq!(u, [0.0]);
    let before = x(&mut inst);
    inst.do_step(0.1, 0.1, true).unwrap();
    assert_eq!(x(&mut inst), before);
}

#[test]
fn input_derivatives_are_validated() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    // order above the maximum
    assert_eq!(inst.set_input_derivatives(&[1], &[2], &[1.0]), Err(Fmi3Error::Error));

    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    // not an input
    assert_eq!(inst.set_input_derivatives(&[2], &[1], &[1.0]), Err(Fmi3Error::Error));

    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    // value count
    assert_eq!(inst.set_input_derivatives(&[4], &[1], &[1.0]), Err(Fmi3Error::Error));

    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    // order 0 is the value itself
    inst.set_input_derivatives(&[4], &[0], &[4.0, 5.0, 6.0]).unwrap();
    let mut v = [0.0; 3];
    inst.get_float64(&[4], &mut v).unwrap();
    assert_eq!(v, [4.0, 5.0, 6.0]);
}

#[test]
fn output_derivatives() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    inst.set_float64(&[1], &[3.0]).unwrap();
    inst.do_step(0.0, 0.1, true).unwrap();

    let mut values = [0.0; 2];
    inst.get_output_derivatives(&[2, 2], &[0, 1], &mut values).unwrap();
    assert!(approx_eq!(f64, values[0], 0.3, epsilon = 1e-12));
    assert_eq!(values[1], 3.0);

    assert_eq!(
        inst.get_output_derivatives(&[2], &[2], &mut [0.0]),
        Err(Fmi3Error::Error)
    );
}

fn poll(inst: &mut ModelInstance<Ramp>) -> Fmi3Status {
    loop {
        match inst.get_status(StatusKind::DoStepStatus) {
            Ok(StatusValue::Status(Fmi3Status::Pending)) => thread::sleep(Duration::from_millis(1)),
            Ok(StatusValue::Status(status)) => return status,
            other => panic!("unexpected status {other:?}"),
        }
    }
}

fn asynchronous(finished: Arc<Mutex<Vec<Fmi3Status>>>) -> ModelInstance<Ramp> {
    let callbacks = CallbackFunctions::default().with_step_finished(move |_, status| {
        finished.lock().unwrap().push(status);
    });
    let mut inst = instantiate::<Ramp>(InterfaceType::CoSimulation, callbacks);
    inst.setup_experiment(None, 0.0, None).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.set_float64(&[1], &[1.0]).unwrap();
    inst.exit_initialization_mode().unwrap();
    inst
}

#[test_log::test]
fn asynchronous_step_is_polled() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let mut inst = asynchronous(finished.clone());

    assert_eq!(inst.do_step(0.0, 0.5, true), Ok(Fmi3Res::Pending));
    // nothing but status queries and cancellation while the step runs
    assert_eq!(inst.state(), ModelState::StepInProgress);

    assert_eq!(poll(&mut inst), Fmi3Status::OK);
    assert_eq!(inst.state(), ModelState::StepMode);
    assert_eq!(inst.get_double_status(StatusKind::LastSuccessfulTime), Ok(0.5));
    assert!(approx_eq!(f64, x(&mut inst), 0.5, epsilon = 1e-12));
    assert_eq!(*finished.lock().unwrap(), vec![Fmi3Status::OK]);
}

#[test]
fn getters_are_illegal_while_pending() {
    let mut inst = asynchronous(Arc::default());
    inst.do_step(0.0, 1e6, true).unwrap();
    let mut u = [0.0];
    assert_eq!(inst.get_float64(&[1], &mut u), Err(Fmi3Error::Error));
}

#[test_log::test]
fn cancelled_step_is_discarded() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let mut inst = asynchronous(finished.clone());
    let snapshot = inst.get_fmu_state().unwrap();

    // long enough to still be running
    assert_eq!(inst.do_step(0.0, 1e6, true), Ok(Fmi3Res::Pending));
    assert_eq!(
        inst.get_string_status(StatusKind::PendingStatus),
        Ok("do_step from 0 to 1000000".to_owned())
    );
    inst.cancel_step().unwrap();
    assert_eq!(inst.state(), ModelState::StepCanceled);
    assert_eq!(inst.get_fmi_status(StatusKind::DoStepStatus), Ok(Fmi3Status::Discard));
    assert_eq!(inst.get_double_status(StatusKind::LastSuccessfulTime), Ok(0.0));
    assert_eq!(inst.context().time(), 0.0);
    assert!(finished.lock().unwrap().is_empty());

    // stepping requires a restore first
    let mut canceled = asynchronous(Arc::default());
    canceled.do_step(0.0, 1e6, true).unwrap();
    canceled.cancel_step().unwrap();
    assert_eq!(canceled.do_step(0.0, 0.1, true), Err(Fmi3Error::Error));

    inst.set_fmu_state(&snapshot).unwrap();
    assert_eq!(inst.state(), ModelState::StepMode);
    assert_eq!(inst.do_step(0.0, 0.1, true), Ok(Fmi3Res::Pending));
    assert_eq!(poll(&mut inst), Fmi3Status::OK);
}

#[test_log::test]
fn fatal_poisons_the_unit_type() {
    let mut first = initialized::<Fragile>(InterfaceType::CoSimulation);
    let mut second = initialized::<Fragile>(InterfaceType::CoSimulation);

    first.do_step(0.0, 0.1, true).unwrap();
    first.set_boolean(&[1], &[true]).unwrap();
    assert_eq!(first.do_step(0.1, 0.1, true), Err(Fmi3Error::Fatal));
    assert_eq!(first.state(), ModelState::Fatal);

    // every other instance of the type answers Fatal from now on
    let mut boom = [false];
    assert_eq!(second.get_boolean(&[1], &mut boom), Err(Fmi3Error::Fatal));
    assert_eq!(second.state(), ModelState::Fatal);
    assert!(ModelInstance::<Fragile>::instantiate(
        "third",
        InterfaceType::CoSimulation,
        "{fragile}",
        None,
        CallbackFunctions::default(),
        false,
        false,
    )
    .is_err());
}
