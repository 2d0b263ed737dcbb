use float_cmp::approx_eq;
use fmi::{
    fmi3::{CallbackFunctions, CoSimulation, Common, Fmi3Error, Fmi3Res, GetSet, ModelExchange, StatusKind},
    EventFlags, InterfaceType,
};
use fmi_export::fmi3::{Model, ModelInstance, ModelState};
use fmi_test_data::{BouncingBall, Dahlquist, Feedthrough, Gain, Integrator};
use rstest::rstest;

fn initialized<M: Model>(interface_type: InterfaceType) -> ModelInstance<M> {
    let mut inst = ModelInstance::<M>::instantiate(
        M::MODEL_NAME,
        interface_type,
        M::INSTANTIATION_TOKEN,
        None,
        CallbackFunctions::default(),
        false,
        true,
    )
    .unwrap();
    inst.setup_experiment(None, 0.0, None).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.exit_initialization_mode().unwrap();
    inst
}

#[test_log::test]
fn dahlquist_decays() {
    let mut inst = initialized::<Dahlquist>(InterfaceType::CoSimulation);
    for i in 0..10 {
        inst.do_step(f64::from(i) * 0.1, 0.1, true).unwrap();
    }
    let mut x = [0.0];
    inst.get_float64(&[1], &mut x).unwrap();
    // forward Euler with 1 ms steps
    assert!(approx_eq!(f64, x[0], (-1.0f64).exp(), epsilon = 1e-3));
}

#[test]
fn dahlquist_analytic_jacobian() {
    let mut inst = initialized::<Dahlquist>(InterfaceType::ModelExchange);
    let mut sensitivity = [0.0];
    inst.get_directional_derivative(&[2], &[1], &[2.0], &mut sensitivity)
        .unwrap();
    assert_eq!(sensitivity, [-2.0]);
}

#[test_log::test]
fn bouncing_ball_bounces_in_co_simulation() {
    let mut inst = initialized::<BouncingBall>(InterfaceType::CoSimulation);
    let mut min_h = f64::INFINITY;
    let mut max_v = f64::NEG_INFINITY;
    for i in 0..300 {
        inst.do_step(f64::from(i) * 0.01, 0.01, true).unwrap();
        let mut hv = [0.0; 2];
        inst.get_float64(&[1, 3], &mut hv).unwrap();
        min_h = min_h.min(hv[0]);
        max_v = max_v.max(hv[1]);
    }
    assert!(min_h > -0.05, "ball fell through the ground: {min_h}");
    assert!(max_v > 0.0, "ball never bounced");
    // snapshots carry the private state of the ball
    let snapshot = inst.get_fmu_state().unwrap();
    let mut bytes = vec![0; inst.serialized_fmu_state_size(&snapshot).unwrap()];
    inst.serialize_fmu_state(&snapshot, &mut bytes).unwrap();
    let restored = inst.deserialize_fmu_state(&bytes).unwrap();
    assert_eq!(restored.model().is_resting(), snapshot.model().is_resting());
}

#[test]
fn bouncing_ball_event_in_model_exchange() {
    let mut inst = initialized::<BouncingBall>(InterfaceType::ModelExchange);
    let mut flags = EventFlags::default();
    inst.new_discrete_states(&mut flags).unwrap();
    inst.enter_continuous_time_mode().unwrap();

    // just below the ground, falling
    inst.set_time(0.45).unwrap();
    inst.set_continuous_states(&[-0.001, -4.4]).unwrap();
    let (mut enter_event_mode, mut terminate) = (false, false);
    inst.completed_integrator_step(true, &mut enter_event_mode, &mut terminate)
        .unwrap();
    assert!(enter_event_mode);

    inst.enter_event_mode().unwrap();
    inst.new_discrete_states(&mut flags).unwrap();
    assert!(flags.values_of_continuous_states_changed);
    let mut states = [0.0; 2];
    inst.get_continuous_states(&mut states).unwrap();
    assert!(states[0] > 0.0);
    assert!(approx_eq!(f64, states[1], 4.4 * 0.7, epsilon = 1e-12));
}

#[test]
fn feedthrough_copies_every_kind() {
    let mut inst = initialized::<Feedthrough>(InterfaceType::CoSimulation);
    inst.set_float64(&[7, 32], &[1.5, 1.0, 2.0, 3.0]).unwrap();
    inst.set_int8(&[11], &[-3]).unwrap();
    inst.set_uint64(&[25], &[u64::MAX]).unwrap();
    inst.set_boolean(&[27], &[true]).unwrap();
    inst.set_binary(&[30], &[&b"bar\0baz"[..]]).unwrap();
    inst.do_step(0.0, 0.1, true).unwrap();

    let mut floats = [0.0; 4];
    inst.get_float64(&[8, 33], &mut floats).unwrap();
    assert_eq!(floats, [1.5, 1.0, 2.0, 3.0]);
    let mut int8 = [0];
    inst.get_int8(&[12], &mut int8).unwrap();
    assert_eq!(int8, [-3]);
    let mut uint64 = [0];
    inst.get_uint64(&[26], &mut uint64).unwrap();
    assert_eq!(uint64, [u64::MAX]);
    let mut boolean = [false];
    inst.get_boolean(&[28], &mut boolean).unwrap();
    assert_eq!(boolean, [true]);

    let mut sizes = [0];
    let mut small = [0u8; 2];
    assert_eq!(
        inst.get_binary(&[31], &mut sizes, &mut [&mut small[..]]),
        Ok(Fmi3Res::Warning)
    );
    assert_eq!(sizes, [7]);
    let mut large = [0u8; 16];
    inst.get_binary(&[31], &mut sizes, &mut [&mut large[..]]).unwrap();
    assert_eq!(&large[..sizes[0]], b"bar\0baz");

    let mut strings = [String::new()];
    inst.get_string(&[29], &mut strings).unwrap();
    assert_eq!(strings[0], "Set me!");

    // larger than max_size
    assert_eq!(inst.set_binary(&[30], &[&[0u8; 17][..]]), Err(Fmi3Error::Error));
}

#[test]
fn feedthrough_declares_direct_dependencies() {
    let mut inst = initialized::<Feedthrough>(InterfaceType::CoSimulation);
    let deps = inst.get_variable_dependencies(8).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].independent, 7);
    assert_eq!(inst.get_number_of_variable_dependencies(7), Ok(0));
}

#[rstest]
#[case(0.05, Ok(Fmi3Res::OK))]
#[case(0.1, Ok(Fmi3Res::OK))]
#[case(0.2, Err(Fmi3Error::Discard))]
fn integrator_discards_large_steps(#[case] h: f64, #[case] expected: Result<Fmi3Res, Fmi3Error>) {
    let mut inst = initialized::<Integrator>(InterfaceType::CoSimulation);
    inst.set_float64(&[1, 5], &[1.0, 0.1]).unwrap();
    assert_eq!(inst.do_step(0.0, h, true), expected);
    let last = inst.get_double_status(StatusKind::LastSuccessfulTime).unwrap();
    assert_eq!(last, if expected.is_ok() { h } else { 0.0 });
    assert_eq!(inst.state(), ModelState::StepMode);
}

#[test]
fn integrator_output_derivative() {
    let mut inst = initialized::<Integrator>(InterfaceType::CoSimulation);
    inst.set_float64(&[1, 4], &[2.0, 3.0]).unwrap();
    let mut values = [0.0];
    inst.get_output_derivatives(&[2], &[1], &mut values).unwrap();
    assert_eq!(values, [6.0]);
}

#[test]
fn gain_is_co_simulation_only() {
    assert!(matches!(
        ModelInstance::<Gain>::instantiate(
            "gain",
            InterfaceType::ModelExchange,
            Gain::INSTANTIATION_TOKEN,
            None,
            CallbackFunctions::default(),
            false,
            false,
        ),
        Err(fmi::Error::UnsupportedInterface(_))
    ));
    let mut inst = initialized::<Gain>(InterfaceType::CoSimulation);
    inst.set_float64(&[1, 3, 4], &[2.0, 0.5, 1.0]).unwrap();
    let mut y = [0.0];
    inst.get_float64(&[2], &mut y).unwrap();
    assert_eq!(y, [2.0]);
}
