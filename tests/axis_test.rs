use assert_float_eq::*;
use eqmotion::axis::{
    Axis, AxisConfig, AxisState, FinishState, FixedMode, RotationDirection, SlewPhase,
};
use eqmotion::config::AxisBehavior;
use eqmotion::errors::ControlError;
use eqmotion::motor::{SimulatedStepper, StepperMotor};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const SIDEREAL: f64 = 0.00417807462;

fn test_axis() -> (Axis, Arc<SimulatedStepper>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let behavior = AxisBehavior {
        default_slew_speed: 2.0,
        acceleration: 1.0,
        min_slew_angle: 0.3,
        correction_tolerance: 0.05,
        ..AxisBehavior::default()
    };
    let stepper = Arc::new(SimulatedStepper::new());
    let axis = Axis::new(
        AxisConfig {
            name: "test",
            steps_per_deg: 10.0,
            invert: false,
            behavior,
        },
        stepper.clone(),
        Arc::new(FixedMode),
    );
    (axis, stepper)
}

#[tokio::test(start_paused = true)]
async fn slew_lands_within_tolerance() {
    let (axis, _) = test_axis();
    let finish = axis.slew_to(RotationDirection::Positive, 10.0).await.unwrap();
    assert_eq!(finish, FinishState::Complete);
    assert_float_absolute_eq!(axis.get_angle_deg(), 10.0, 0.05);
    assert_eq!(axis.get_state(), AxisState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn slew_in_negative_direction() {
    let (axis, _) = test_axis();
    let finish = axis.slew_to(RotationDirection::Negative, -5.0).await.unwrap();
    assert_eq!(finish, FinishState::Complete);
    assert_float_absolute_eq!(axis.get_angle_deg(), -5.0, 0.05);
}

#[tokio::test(start_paused = true)]
async fn short_slew_skips_the_ramp() {
    let (axis, _) = test_axis();
    let finish = axis.slew_to(RotationDirection::Positive, 0.2).await.unwrap();
    assert_eq!(finish, FinishState::Complete);
    assert_float_absolute_eq!(axis.get_angle_deg(), 0.2, 0.05);
}

#[tokio::test(start_paused = true)]
async fn stop_decelerates_to_standstill() {
    let (axis, stepper) = test_axis();
    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
    assert_eq!(axis.get_state(), AxisState::Stopped);

    // no residual motion
    let before = stepper.get_step_count();
    sleep(Duration::from_secs(2)).await;
    assert_float_absolute_eq!(stepper.get_step_count(), before, 1e-9);
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_halts_without_deceleration() {
    let (axis, stepper) = test_axis();
    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    axis.emergency_stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::EmergencyStopped);

    let before = stepper.get_step_count();
    sleep(Duration::from_secs(2)).await;
    assert_float_absolute_eq!(stepper.get_step_count(), before, 1e-9);
}

#[tokio::test(start_paused = true)]
async fn stop_keep_speed_leaves_the_motor_running() {
    let (axis, stepper) = test_axis();
    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    axis.stop_keep_speed();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
    assert_eq!(axis.get_state(), AxisState::Inertial);

    let before = stepper.get_step_count();
    sleep(Duration::from_secs(1)).await;
    assert!(stepper.get_step_count() > before + 1.0);

    // a plain stop brings it back to rest
    axis.stop();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(axis.get_state(), AxisState::Stopped);
    let before = stepper.get_step_count();
    sleep(Duration::from_secs(1)).await;
    assert_float_absolute_eq!(stepper.get_step_count(), before, 1e-9);
}

#[tokio::test(start_paused = true)]
async fn slew_reports_its_phase() {
    let (axis, _) = test_axis();
    axis.start_slew_to(RotationDirection::Positive, 30.0)
        .await
        .unwrap();
    // ramp to 2 deg/s at 1 deg/s^2 takes 2 s, the hold roughly 13 s more
    sleep(Duration::from_millis(500)).await;
    assert_eq!(
        axis.get_state(),
        AxisState::Slewing(SlewPhase::Accelerating)
    );
    sleep(Duration::from_secs(3)).await;
    assert_eq!(axis.get_state(), AxisState::Slewing(SlewPhase::Constant));
    sleep(Duration::from_millis(12_500)).await;
    assert_eq!(
        axis.get_state(),
        AxisState::Slewing(SlewPhase::Decelerating)
    );
    assert_eq!(axis.wait_for_slew().await, FinishState::Complete);
    assert_eq!(axis.get_state(), AxisState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn new_slew_ramps_from_the_inertial_speed() {
    let (axis, stepper) = test_axis();
    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    axis.stop_keep_speed();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
    assert_eq!(axis.get_state(), AxisState::Inertial);

    // a slew in the same direction picks up the rolling motor instead of
    // ramping from zero
    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    let before = stepper.get_step_count();
    sleep(Duration::from_secs(1)).await;
    let advanced_deg = (stepper.get_step_count() - before) / 10.0;
    assert_float_absolute_eq!(advanced_deg, 2.0, 0.05);

    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn slew_plan_uses_the_quantized_motor_speed() {
    // 3 deg/s at 10000 steps/deg asks for 30 kHz; the microsecond pulse
    // timer can only deliver 30303 Hz, and the plan must aim with that.
    let behavior = AxisBehavior {
        default_slew_speed: 3.0,
        acceleration: 1.0,
        min_slew_angle: 0.3,
        correction_tolerance: 0.5,
        ..AxisBehavior::default()
    };
    let stepper = Arc::new(SimulatedStepper::new());
    let axis = Axis::new(
        AxisConfig {
            name: "quant",
            steps_per_deg: 10_000.0,
            invert: false,
            behavior,
        },
        stepper.clone(),
        Arc::new(FixedMode),
    );
    let finish = axis.slew_to(RotationDirection::Positive, 20.0).await.unwrap();
    assert_eq!(finish, FinishState::Complete);
    // the wide tolerance disables correction pulses, so the ramp and hold
    // alone must land on the planned point half a minimum slew angle short
    assert_float_absolute_eq!(axis.get_angle_deg(), 20.0 - 0.15, 0.02);
}

#[tokio::test(start_paused = true)]
async fn guide_pulse_offsets_tracking_then_restores_it() {
    let (axis, _) = test_axis();
    axis.start_tracking(Some(RotationDirection::Positive))
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(axis.get_state(), AxisState::Tracking);

    axis.guide(RotationDirection::Positive, 1000).unwrap();
    sleep(Duration::from_millis(300)).await;
    // still Tracking mid-pulse
    assert_eq!(axis.get_state(), AxisState::Tracking);
    sleep(Duration::from_millis(1700)).await;
    assert_eq!(axis.get_state(), AxisState::Tracking);

    // four seconds of tracking plus one second of guide speed on top
    let expected = 4.0 * SIDEREAL + 1.0 * 0.5 * SIDEREAL;
    assert_float_absolute_eq!(axis.get_angle_deg(), expected, 1e-3);

    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn overlong_guide_pulse_is_clamped() {
    let (axis, _) = test_axis();
    axis.start_tracking(Some(RotationDirection::Positive))
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    // a minute-long request runs for max_guide_time_ms, then plain
    // tracking resumes
    axis.guide(RotationDirection::Positive, 60_000).unwrap();
    sleep(Duration::from_secs(7)).await;
    assert_eq!(axis.get_state(), AxisState::Tracking);

    let expected = 8.0 * SIDEREAL + 5.0 * 0.5 * SIDEREAL;
    assert_float_absolute_eq!(axis.get_angle_deg(), expected, 1e-3);

    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn runaway_position_error_reports_an_error_finish() {
    let (axis, stepper) = test_axis();
    axis.start_slew_to(RotationDirection::Positive, 10.0)
        .await
        .unwrap();
    sleep(Duration::from_secs(3)).await;
    // a slipping drive: yank the position far beyond max_correction_angle
    stepper.set_step_count(stepper.get_step_count() - 200.0);
    assert_eq!(axis.wait_for_slew().await, FinishState::Error);
    assert_eq!(axis.get_state(), AxisState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn guide_rejected_unless_tracking() {
    let (axis, _) = test_axis();
    let err = axis.guide(RotationDirection::Positive, 100).unwrap_err();
    assert!(matches!(err, ControlError::Parameter(_)));
}

#[tokio::test(start_paused = true)]
async fn command_queue_reports_backpressure() {
    let (axis, _) = test_axis();
    // more than the queue and the task together can hold
    for _ in 0..17 {
        let _ = axis.start_slewing(RotationDirection::Positive).await;
    }
    let err = axis
        .start_slewing(RotationDirection::Positive)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ResourceExhausted { .. }));
}

#[tokio::test(start_paused = true)]
async fn invalid_parameters_are_rejected() {
    let (axis, _) = test_axis();
    assert!(axis
        .start_slew_to(RotationDirection::Positive, f64::NAN)
        .await
        .is_err());
    assert!(axis.set_slew_speed(-1.0).is_err());
    assert!(axis.set_slew_speed(0.0).is_err());
    assert!(axis.set_angle_deg(f64::INFINITY).is_err());
}

#[tokio::test(start_paused = true)]
async fn set_angle_redefines_position_while_stopped() {
    let (axis, _) = test_axis();
    axis.set_angle_deg(42.0).unwrap();
    assert_float_absolute_eq!(axis.get_angle_deg(), 42.0, 1e-9);

    axis.start_slewing(RotationDirection::Positive).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(axis.set_angle_deg(0.0).is_err());
    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_queued_commands() {
    let (axis, _) = test_axis();
    axis.start_slew_to(RotationDirection::Positive, 350.0)
        .await
        .unwrap();
    axis.start_slew_to(RotationDirection::Positive, 20.0)
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    axis.stop();
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
    assert_eq!(axis.wait_for_slew().await, FinishState::Stopped);
    assert_eq!(axis.get_state(), AxisState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn inverted_axis_reports_positive_angles() {
    let behavior = AxisBehavior {
        default_slew_speed: 2.0,
        acceleration: 1.0,
        ..AxisBehavior::default()
    };
    let stepper = Arc::new(SimulatedStepper::new());
    let axis = Axis::new(
        AxisConfig {
            name: "inv",
            steps_per_deg: 10.0,
            invert: true,
            behavior,
        },
        stepper.clone(),
        Arc::new(FixedMode),
    );
    let finish = axis.slew_to(RotationDirection::Positive, 5.0).await.unwrap();
    assert_eq!(finish, FinishState::Complete);
    assert_float_absolute_eq!(axis.get_angle_deg(), 5.0, 0.05);
    // the physical step count ran backward
    assert!(stepper.get_step_count() < 0.0);
}
