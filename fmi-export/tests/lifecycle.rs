mod common;

use common::{initialized, instantiate, Ramp};
use fmi::{
    fmi3::{CallbackFunctions, CoSimulation, Common, Fmi3Error, Fmi3Res, GetSet, ModelExchange},
    EventFlags, InterfaceType,
};
use fmi_export::fmi3::{ModelInstance, ModelState};
use rstest::rstest;

type Inst = ModelInstance<Ramp>;

fn in_state(interface_type: InterfaceType, state: ModelState) -> Inst {
    let mut inst = instantiate::<Ramp>(interface_type, CallbackFunctions::default());
    if state == ModelState::Instantiated {
        return inst;
    }
    inst.setup_experiment(None, 0.0, None).unwrap();
    inst.enter_initialization_mode().unwrap();
    if state == ModelState::InitializationMode {
        return inst;
    }
    inst.exit_initialization_mode().unwrap();
    match state {
        ModelState::EventMode | ModelState::StepMode => {}
        ModelState::ContinuousTimeMode => {
            let mut flags = EventFlags::default();
            inst.new_discrete_states(&mut flags).unwrap();
            inst.enter_continuous_time_mode().unwrap();
        }
        ModelState::Terminated => {
            inst.terminate().unwrap();
        }
        _ => unreachable!("not reachable in these tests"),
    }
    assert_eq!(inst.state(), state);
    inst
}

#[rstest]
#[case::step_before_init(InterfaceType::CoSimulation, ModelState::Instantiated, |i: &mut Inst| i.do_step(0.0, 0.1, true).map(drop))]
#[case::get_before_init(InterfaceType::CoSimulation, ModelState::Instantiated, |i: &mut Inst| i.get_float64(&[1], &mut [0.0]).map(drop))]
#[case::exit_without_enter(InterfaceType::ModelExchange, ModelState::Instantiated, |i: &mut Inst| i.exit_initialization_mode().map(drop))]
#[case::setup_twice(InterfaceType::CoSimulation, ModelState::InitializationMode, |i: &mut Inst| i.setup_experiment(None, 0.0, None).map(drop))]
#[case::continuous_time_from_init(InterfaceType::ModelExchange, ModelState::InitializationMode, |i: &mut Inst| i.enter_continuous_time_mode().map(drop))]
#[case::output_derivatives_in_init(InterfaceType::CoSimulation, ModelState::InitializationMode, |i: &mut Inst| i.get_output_derivatives(&[2], &[1], &mut [0.0]).map(drop))]
#[case::event_mode_twice(InterfaceType::ModelExchange, ModelState::EventMode, |i: &mut Inst| i.enter_event_mode().map(drop))]
#[case::integrator_step_in_event_mode(InterfaceType::ModelExchange, ModelState::EventMode, |i: &mut Inst| i.completed_integrator_step(true, &mut false, &mut false).map(drop))]
#[case::step_on_model_exchange(InterfaceType::ModelExchange, ModelState::EventMode, |i: &mut Inst| i.do_step(0.0, 0.1, true).map(drop))]
#[case::discrete_states_in_continuous_time(InterfaceType::ModelExchange, ModelState::ContinuousTimeMode, |i: &mut Inst| i.new_discrete_states(&mut EventFlags::default()).map(drop))]
#[case::set_time_on_co_simulation(InterfaceType::CoSimulation, ModelState::StepMode, |i: &mut Inst| i.set_time(1.0).map(drop))]
#[case::cancel_without_pending(InterfaceType::CoSimulation, ModelState::StepMode, |i: &mut Inst| i.cancel_step().map(drop))]
#[case::set_input_after_terminate(InterfaceType::CoSimulation, ModelState::Terminated, |i: &mut Inst| i.set_float64(&[1], &[1.0]).map(drop))]
#[case::step_after_terminate(InterfaceType::CoSimulation, ModelState::Terminated, |i: &mut Inst| i.do_step(0.0, 0.1, true).map(drop))]
#[case::reinitialize_after_terminate(InterfaceType::ModelExchange, ModelState::Terminated, |i: &mut Inst| i.enter_initialization_mode().map(drop))]
fn illegal_calls_are_errors(
    #[case] interface_type: InterfaceType,
    #[case] state: ModelState,
    #[case] op: fn(&mut Inst) -> Result<(), Fmi3Error>,
) {
    let mut inst = in_state(interface_type, state);
    assert_eq!(op(&mut inst), Err(Fmi3Error::Error));
    assert_eq!(inst.state(), ModelState::Error);

    // only diagnostics remain
    let mut x = [0.0];
    assert!(inst.get_float64(&[2], &mut x).is_ok());
    assert!(inst.set_debug_logging(true, &[]).is_ok());
    assert_eq!(inst.terminate(), Err(Fmi3Error::Error));
    assert_eq!(inst.reset(), Err(Fmi3Error::Error));
}

#[test]
fn canonical_model_exchange_path() {
    let mut inst = in_state(InterfaceType::ModelExchange, ModelState::Instantiated);
    inst.setup_experiment(None, 0.0, Some(10.0)).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.set_float64(&[1], &[10.0]).unwrap();
    inst.exit_initialization_mode().unwrap();
    assert_eq!(inst.state(), ModelState::EventMode);

    // at least one discrete update per event mode visit
    assert_eq!(inst.enter_continuous_time_mode(), Err(Fmi3Error::Error));
}

#[test_log::test]
fn state_event_requests_event_mode() {
    let mut inst = in_state(InterfaceType::ModelExchange, ModelState::InitializationMode);
    inst.set_float64(&[1], &[10.0]).unwrap();
    inst.exit_initialization_mode().unwrap();
    let mut flags = EventFlags::default();
    inst.new_discrete_states(&mut flags).unwrap();
    assert!(!flags.discrete_states_need_update);
    inst.enter_continuous_time_mode().unwrap();

    assert_eq!(inst.get_number_of_continuous_states(), Ok(1));
    assert_eq!(inst.get_number_of_event_indicators(), Ok(1));
    let mut der = [0.0];
    inst.get_derivatives(&mut der).unwrap();
    assert_eq!(der, [10.0]);

    // x crosses 1.0
    inst.set_time(0.15).unwrap();
    inst.set_continuous_states(&[1.5]).unwrap();
    let (mut enter_event_mode, mut terminate) = (false, false);
    inst.completed_integrator_step(true, &mut enter_event_mode, &mut terminate)
        .unwrap();
    assert!(enter_event_mode);
    assert!(!terminate);

    // event mode takes priority over continuous-time calls
    let mut blocked = inst.get_fmu_state().unwrap();
    assert_eq!(inst.set_time(0.2), Err(Fmi3Error::Error));
    assert_eq!(inst.state(), ModelState::Error);

    // back to the pending event
    let mut inst = in_state(InterfaceType::ModelExchange, ModelState::ContinuousTimeMode);
    inst.set_fmu_state(&blocked).unwrap();
    inst.enter_event_mode().unwrap();
    inst.new_discrete_states(&mut flags).unwrap();
    let mut count = [0];
    inst.get_int32(&[7], &mut count).unwrap();
    assert_eq!(count, [1]);
    blocked = inst.get_fmu_state().unwrap();
    inst.free_fmu_state(blocked).unwrap();
}

#[test]
fn new_discrete_states_is_idempotent_at_fixpoint() {
    let mut inst = in_state(InterfaceType::ModelExchange, ModelState::InitializationMode);
    inst.set_float64(&[1], &[10.0]).unwrap();
    inst.exit_initialization_mode().unwrap();
    let mut flags = EventFlags::default();
    inst.new_discrete_states(&mut flags).unwrap();
    inst.enter_continuous_time_mode().unwrap();
    inst.set_time(0.25).unwrap();
    inst.set_continuous_states(&[2.5]).unwrap();
    inst.completed_integrator_step(true, &mut false, &mut false).unwrap();
    inst.enter_event_mode().unwrap();

    inst.new_discrete_states(&mut flags).unwrap();
    assert_eq!(flags, EventFlags::default());
    let mut floats = [0.0; 7];
    let mut count = [0];
    inst.get_float64(&[1, 2, 3, 4, 5], &mut floats).unwrap();
    inst.get_int32(&[7], &mut count).unwrap();
    assert_eq!(count, [2]);

    for _ in 0..3 {
        inst.new_discrete_states(&mut flags).unwrap();
        assert_eq!(flags, EventFlags::default());
        let mut again = [0.0; 7];
        let mut count_again = [0];
        inst.get_float64(&[1, 2, 3, 4, 5], &mut again).unwrap();
        inst.get_int32(&[7], &mut count_again).unwrap();
        assert_eq!(again, floats);
        assert_eq!(count_again, count);
    }
}

#[test]
fn set_time_cannot_go_before_the_last_event() {
    let mut inst = in_state(InterfaceType::ModelExchange, ModelState::EventMode);
    inst.set_time(2.0).unwrap();
    inst.new_discrete_states(&mut EventFlags::default()).unwrap();
    inst.enter_continuous_time_mode().unwrap();
    inst.enter_event_mode().unwrap();
    assert_eq!(inst.set_time(1.0), Err(Fmi3Error::Error));
}

#[test]
fn batches_distribute_array_elements_in_order() {
    let mut inst = in_state(InterfaceType::CoSimulation, ModelState::InitializationMode);
    inst.set_float64(&[4, 5], &[10.0, 11.0, 12.0, 13.0]).unwrap();

    let mut v = [0.0; 3];
    let mut s = [0.0];
    inst.get_float64(&[4], &mut v).unwrap();
    inst.get_float64(&[5], &mut s).unwrap();
    assert_eq!(v, [10.0, 11.0, 12.0]);
    assert_eq!(s, [13.0]);

    let mut both = [0.0; 4];
    inst.get_float64(&[4, 5], &mut both).unwrap();
    assert_eq!(both, [10.0, 11.0, 12.0, 13.0]);

    // never truncated
    let mut short = [0.0; 3];
    assert_eq!(inst.get_float64(&[4, 5], &mut short), Err(Fmi3Error::Error));
    assert_eq!(inst.state(), ModelState::Error);
}

#[test]
fn mismatched_kind_is_an_error() {
    let mut inst = in_state(InterfaceType::CoSimulation, ModelState::InitializationMode);
    assert_eq!(inst.set_int32(&[1], &[1]), Err(Fmi3Error::Error));
}

#[rstest]
#[case(ModelState::InitializationMode)]
#[case(ModelState::StepMode)]
#[case(ModelState::Terminated)]
fn snapshot_round_trip(#[case] state: ModelState) {
    let mut inst = in_state(InterfaceType::CoSimulation, ModelState::InitializationMode);
    inst.set_float64(&[1, 4], &[2.0, 7.0, 8.0, 9.0]).unwrap();
    if state != ModelState::InitializationMode {
        inst.exit_initialization_mode().unwrap();
        inst.do_step(0.0, 0.1, true).unwrap();
    }
    if state == ModelState::Terminated {
        inst.terminate().unwrap();
    }

    let snapshot = inst.get_fmu_state().unwrap();
    let size = inst.serialized_fmu_state_size(&snapshot).unwrap();
    let mut bytes = vec![0u8; size];
    inst.serialize_fmu_state(&snapshot, &mut bytes).unwrap();

    let mut fresh = in_state(InterfaceType::CoSimulation, ModelState::InitializationMode);
    let restored = fresh.deserialize_fmu_state(&bytes).unwrap();
    assert_eq!(restored.store(), snapshot.store());
    fresh.set_fmu_state(&restored).unwrap();
    assert_eq!(fresh.state(), state);
    assert_eq!(fresh.context().time(), inst.context().time());
    assert_eq!(fresh.context().store(), inst.context().store());

    // restoring does not consume the snapshot
    fresh.set_fmu_state(&restored).unwrap();
    inst.free_fmu_state(snapshot).unwrap();
}

#[test]
fn snapshot_of_other_discipline_is_rejected() {
    let mut me = in_state(InterfaceType::ModelExchange, ModelState::EventMode);
    let snapshot = me.get_fmu_state().unwrap();
    let mut cs = in_state(InterfaceType::CoSimulation, ModelState::StepMode);
    assert_eq!(cs.set_fmu_state(&snapshot), Err(Fmi3Error::Error));
}

#[test]
fn restoring_rewinds_time_and_values() {
    let mut inst = initialized::<Ramp>(InterfaceType::CoSimulation);
    inst.set_float64(&[1], &[1.0]).unwrap();
    let snapshot = inst.get_fmu_state().unwrap();
    inst.do_step(0.0, 0.5, true).unwrap();
    let other = inst.get_fmu_state().unwrap();

    assert_eq!(inst.set_fmu_state(&snapshot), Ok(Fmi3Res::OK));
    let mut x = [1.0];
    inst.get_float64(&[2], &mut x).unwrap();
    assert_eq!(x, [0.0]);
    assert_eq!(inst.context().time(), 0.0);

    // the other snapshot is unaffected
    inst.set_fmu_state(&other).unwrap();
    assert_eq!(inst.context().time(), 0.5);
}

#[test]
fn directional_derivative_of_the_state_derivative() {
    let mut inst = initialized::<Ramp>(InterfaceType::ModelExchange);
    let mut sensitivity = [0.0];
    inst.get_directional_derivative(&[3], &[1], &[2.0], &mut sensitivity)
        .unwrap();
    // no dependency records: structural zero
    assert_eq!(sensitivity, [0.0]);
    assert_eq!(inst.get_number_of_variable_dependencies(3), Ok(0));
    assert_eq!(inst.get_variable_dependencies(99), Err(Fmi3Error::Error));
}
