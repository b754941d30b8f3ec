//! End-to-end integration tests for the pose-fusion EKF.
//!
//! These tests run the filter against the analytic circular trajectory from
//! [`visfusion::sim`], interleaving a 200 Hz IMU stream with 10 Hz absolute
//! pose observations the way a host scheduler would. The error bounds in the
//! assertions are empirically derived regression thresholds, not theoretical
//! limits: they are comfortably above the error observed on clean runs and
//! serve to catch future changes that degrade filter performance.
//!
//! The tests verify that:
//! 1. The fused filter tracks the trajectory closely
//! 2. Dead reckoning alone stays bounded but is not better than fusion
//! 3. Scale carried by the observations is recovered and reported
//! 4. Seeded sensor noise keeps the estimate bounded and the state well-formed

use visfusion::ekf::{EkfConfig, PoseFusionEkf};
use visfusion::sim::{CircularTrajectory, SensorNoise};
use visfusion::{pose_rotation, pose_scale, pose_translation};

use nalgebra::{SMatrix, Vector3};

const IMU_RATE_HZ: u64 = 200;
const POSE_RATE_HZ: u64 = 10;
const DURATION_S: f64 = 5.0;

/// Drive the filter along the trajectory, optionally corrupting both sensor
/// streams, and return the filter at the end of the run.
fn run_filter(
    trajectory: &CircularTrajectory,
    config: EkfConfig,
    with_observations: bool,
    mut noise: Option<SensorNoise>,
) -> PoseFusionEkf {
    let mut ekf = PoseFusionEkf::new(config);
    ekf.init(&trajectory.pose_at(0.0), trajectory.velocity_at(0.0));

    let imu_stream = trajectory.imu_samples(IMU_RATE_HZ, DURATION_S);
    let pose_stream = trajectory.pose_samples(POSE_RATE_HZ, DURATION_S);
    let mut next_pose = 0usize;
    for clean in &imu_stream {
        let sample = match noise.as_mut() {
            Some(noise) => noise.corrupt_imu(clean),
            None => *clean,
        };
        ekf.predict(sample.imu.accel, sample.imu.gyro, sample.timestamp_ns);
        while with_observations
            && next_pose < pose_stream.len()
            && pose_stream[next_pose].timestamp_ns <= clean.timestamp_ns
        {
            let observation = match noise.as_mut() {
                Some(noise) => noise.corrupt_pose(&pose_stream[next_pose]),
                None => pose_stream[next_pose],
            };
            ekf.observe(&observation.pose, observation.timestamp_ns);
            next_pose += 1;
        }
    }
    ekf
}

fn assert_well_formed(ekf: &PoseFusionEkf) {
    // Unit-norm attitude
    assert!((ekf.orientation().norm() - 1.0).abs() < 1e-6);
    // Symmetric, finite covariance
    let p = ekf.covariance();
    for i in 0..9 {
        for j in 0..9 {
            assert!(p[(i, j)].is_finite());
            assert!((p[(i, j)] - p[(j, i)]).abs() < 1e-9);
        }
    }
    // Readout is a well-formed similarity transform
    let pose = ekf.get_state();
    assert_eq!(pose[(3, 0)], 0.0);
    assert_eq!(pose[(3, 1)], 0.0);
    assert_eq!(pose[(3, 2)], 0.0);
    assert_eq!(pose[(3, 3)], 1.0);
    let scale = pose_scale(&pose);
    let r = pose_rotation(&pose, scale);
    let rtr = r.matrix().transpose() * r.matrix();
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((rtr[(i, j)] - expected).abs() < 1e-6);
        }
    }
}

#[test]
fn fused_filter_tracks_circular_trajectory() {
    let trajectory = CircularTrajectory::new(5.0, 0.5);
    let ekf = run_filter(&trajectory, EkfConfig::default(), true, None);

    let position_error = (ekf.position() - trajectory.position_at(DURATION_S)).norm();
    let velocity_error = (ekf.velocity() - trajectory.velocity_at(DURATION_S)).norm();
    let orientation_error = ekf
        .orientation()
        .angle_to(&trajectory.orientation_at(DURATION_S));

    assert!(
        position_error < 0.02,
        "position error {position_error} m too large"
    );
    assert!(
        velocity_error < 0.05,
        "velocity error {velocity_error} m/s too large"
    );
    assert!(
        orientation_error < 0.01,
        "orientation error {orientation_error} rad too large"
    );
    assert_well_formed(&ekf);
}

#[test]
fn dead_reckoning_stays_bounded_and_uncertainty_grows() {
    let trajectory = CircularTrajectory::new(5.0, 0.5);
    let fused = run_filter(&trajectory, EkfConfig::default(), true, None);
    let dead = run_filter(&trajectory, EkfConfig::default(), false, None);

    let dead_error = (dead.position() - trajectory.position_at(DURATION_S)).norm();
    let fused_error = (fused.position() - trajectory.position_at(DURATION_S)).norm();
    assert!(
        dead_error < 1.0,
        "dead-reckoning error {dead_error} m unexpectedly large on a clean run"
    );
    assert!(
        fused_error <= dead_error.max(1e-3),
        "fusion ({fused_error} m) should not be worse than dead reckoning ({dead_error} m)"
    );

    // Without observations the covariance only accumulates process noise
    let initial_trace = 0.5 * 9.0;
    assert!(
        dead.covariance().trace() > initial_trace,
        "uncertainty should grow during dead reckoning"
    );
    assert!(
        fused.covariance().trace() < dead.covariance().trace(),
        "observations should shrink uncertainty"
    );
    assert_well_formed(&dead);
}

#[test]
fn scale_from_observations_is_recovered() {
    let mut trajectory = CircularTrajectory::new(3.0, 0.25);
    trajectory.scale = 2.0;
    let ekf = run_filter(&trajectory, EkfConfig::default(), true, None);

    assert!((ekf.scale() - 2.0).abs() < 1e-9);
    // The scale is a readout property: it must not leak into the tracked
    // position or attitude.
    let position_error = (ekf.position() - trajectory.position_at(DURATION_S)).norm();
    assert!(
        position_error < 0.02,
        "position error {position_error} m too large under scaled observations"
    );
    let state = ekf.get_state();
    assert!((pose_scale(&state) - 2.0).abs() < 1e-9);
    assert_well_formed(&ekf);
}

#[test]
fn noisy_sensors_keep_estimate_bounded() {
    let trajectory = CircularTrajectory::new(5.0, 0.5);
    // Measurement noise matched to the corruption applied below
    let config = EkfConfig {
        measurement_noise: SMatrix::<f64, 7, 7>::identity() * 4e-4,
        ..EkfConfig::default()
    };
    let noise = SensorNoise::new(42, 0.05, 0.002, 0.02);
    let ekf = run_filter(&trajectory, config, true, Some(noise));

    let position_error = (ekf.position() - trajectory.position_at(DURATION_S)).norm();
    let orientation_error = ekf
        .orientation()
        .angle_to(&trajectory.orientation_at(DURATION_S));
    assert!(
        position_error < 0.5,
        "position error {position_error} m too large under sensor noise"
    );
    assert!(
        orientation_error < 0.1,
        "orientation error {orientation_error} rad too large under sensor noise"
    );
    assert_well_formed(&ekf);
}

#[test]
fn filter_recovers_from_initialization_offset() {
    let trajectory = CircularTrajectory::new(5.0, 0.5);
    let mut ekf = PoseFusionEkf::new(EkfConfig::default());
    // Initialize two meters away from the truth with zero velocity
    let offset_pose = visfusion::pose_from_parts(
        1.0,
        &trajectory.orientation_at(0.0),
        &(trajectory.position_at(0.0) + Vector3::new(2.0, 0.0, 0.0)),
    );
    ekf.init(&offset_pose, Vector3::zeros());

    let imu_stream = trajectory.imu_samples(IMU_RATE_HZ, DURATION_S);
    let pose_stream = trajectory.pose_samples(POSE_RATE_HZ, DURATION_S);
    let mut next_pose = 0usize;
    for sample in &imu_stream {
        ekf.predict(sample.imu.accel, sample.imu.gyro, sample.timestamp_ns);
        while next_pose < pose_stream.len()
            && pose_stream[next_pose].timestamp_ns <= sample.timestamp_ns
        {
            ekf.observe(&pose_stream[next_pose].pose, pose_stream[next_pose].timestamp_ns);
            next_pose += 1;
        }
    }

    let final_truth = pose_translation(&trajectory.pose_at(DURATION_S));
    let position_error = (ekf.position() - final_truth).norm();
    assert!(
        position_error < 0.05,
        "filter failed to pull in the initial offset: {position_error} m"
    );
    assert_well_formed(&ekf);
}
