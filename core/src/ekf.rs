//! Loosely-coupled pose/IMU extended Kalman filter.
//!
//! This module contains the estimator core: a multiplicative error-state EKF
//! whose nominal state is a world-frame position, velocity, and unit-quaternion
//! attitude, and whose error state is the nine-vector
//! `[position(3), velocity(3), attitude-error(3)]`. High-rate IMU samples drive
//! the time update ([`PoseFusionEkf::predict`]) and low-rate absolute pose
//! observations from an external localization pipeline drive the measurement
//! update ([`PoseFusionEkf::observe`]).
//!
//! # Mathematical Background
//!
//! ## Predict step
//!
//! $$
//! \begin{aligned}
//! a^w &= R(q) f^b - g \\\\
//! p &\leftarrow p + v t + \tfrac{1}{2} a^w t^2 \\\\
//! v &\leftarrow v + a^w t \\\\
//! q &\leftarrow q \otimes \exp(\omega^b t) \\\\
//! P &\leftarrow F P F^T + (L Q L^T) t
//! \end{aligned}
//! $$
//!
//! where $F$ is the transition Jacobian from
//! [`linearize::state_transition_jacobian`](crate::linearize::state_transition_jacobian)
//! and $L Q L^T$ is the configured process-noise shaping, injected linearly in
//! elapsed time.
//!
//! ## Observe step
//!
//! The observation is the seven-vector `[position(3), q_w, q_x, q_y, q_z]`
//! recovered from the measured similarity transform (scale removed and retained
//! for readout). With $H$ the observation Jacobian and $W$ the measurement
//! noise:
//!
//! $$
//! \begin{aligned}
//! S &= H P H^T + W \\\\
//! K &= P H^T S^{-1} \\\\
//! \delta x &= K \left( z - h(x) \right) \\\\
//! q &\leftarrow q \otimes \exp(\delta x_{6:9})
//! \end{aligned}
//! $$
//!
//! $S$ is factored by Cholesky with a jitter ramp; if it is numerically
//! singular the update is skipped entirely, leaving the state untouched, rather
//! than propagating NaNs.
//!
//! # Known approximation
//!
//! The default residual is a componentwise difference of quaternion
//! coefficients, not an SO(3) logarithmic residual. It is locally valid when
//! the predicted and observed attitudes are close (small-angle assumption) and
//! is retained as the default because the observation Jacobian is derived for
//! exactly this parameterization. [`ResidualPolicy::LogMap`] is available for
//! callers that expect large attitude corrections.

use crate::linalg::{SolveOptions, chol_solve_spd, symmetrize};
use crate::linearize::{
    exp_so3, pose_observation_jacobian, quaternion_differential, state_transition_jacobian,
};
use crate::{pose_from_parts, pose_rotation, pose_scale, pose_translation, pose_vector};

use std::fmt::{self, Display};

use nalgebra::{Matrix4, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Standard gravity in m/s^2.
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Constants configured at filter construction.
///
/// Explicit configuration passed to the estimator, not ambient globals: the
/// gravity vector expressed in the world frame, the process-noise shaping
/// $L Q L^T$ over the nine-dimensional error state (injected per second of
/// elapsed time), and the measurement-noise covariance $W$ over the
/// seven-dimensional pose observation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EkfConfig {
    /// Gravity vector in the world frame, m/s^2.
    pub gravity: Vector3<f64>,
    /// Process-noise shaping L·Q·Lᵀ over [position, velocity, attitude-error],
    /// in state units squared per second.
    pub process_noise: SMatrix<f64, 9, 9>,
    /// Measurement-noise covariance W over [position, q_w, q_x, q_y, q_z].
    pub measurement_noise: SMatrix<f64, 7, 7>,
}

impl Default for EkfConfig {
    fn default() -> Self {
        EkfConfig {
            gravity: Vector3::new(0.0, 0.0, STANDARD_GRAVITY),
            process_noise: SMatrix::<f64, 9, 9>::identity() * 1e-4,
            measurement_noise: SMatrix::<f64, 7, 7>::identity() * 1e-4,
        }
    }
}

/// Covariance-update form applied after the Kalman gain.
///
/// Both forms sit behind the same update interface so hosts and tests can run
/// against either.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceUpdate {
    /// `P -= K·H·P`. Cheap one-sided form; known to lose symmetry and positive
    /// semi-definiteness under ill-conditioning.
    #[default]
    Simplified,
    /// Joseph form `P = (I-KH)·P·(I-KH)ᵀ + K·W·Kᵀ`, symmetric and PSD by
    /// construction.
    Joseph,
}

/// Residual parameterization for the attitude part of the innovation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualPolicy {
    /// Componentwise difference of quaternion coefficients. Locally valid under
    /// a small-angle assumption; matches the derivation of the observation
    /// Jacobian and is therefore the default.
    #[default]
    QuaternionCoefficient,
    /// Attitude residual taken as `log(q⁻¹ q_obs)` and mapped back through
    /// `½·Ξ(q)` so it remains consistent with the observation Jacobian. Agrees
    /// with the default to first order but keeps the correction direction exact
    /// for large attitude error.
    LogMap,
}

/// Multiplicative error-state EKF fusing IMU data with absolute pose observations.
///
/// One instance tracks one rigid body. The estimator is a tight sequential
/// state machine: `predict` and `observe` must be invoked in non-decreasing
/// timestamp order by a single caller (no internal locking is provided), and
/// every call is a bounded, deterministic computation.
///
/// # Lifecycle
///
/// The state is undefined until [`init`](Self::init) is called with a starting
/// pose and velocity. Before that, `predict` only records timestamps so that
/// the first post-init sample sees a sane `dt`, and `observe` is a no-op.
///
/// # Example
///
/// ```rust
/// use visfusion::ekf::{EkfConfig, PoseFusionEkf};
/// use nalgebra::{Matrix4, Vector3};
///
/// let mut ekf = PoseFusionEkf::new(EkfConfig::default());
/// ekf.init(&Matrix4::identity(), Vector3::zeros());
///
/// // Stationary body: the accelerometer measures gravity.
/// ekf.predict(Vector3::new(0.0, 0.0, 9.80665), Vector3::zeros(), 5_000_000);
/// ekf.observe(&Matrix4::identity(), 5_000_000);
///
/// let pose = ekf.get_state();
/// assert_eq!(pose[(3, 3)], 1.0);
/// ```
#[derive(Clone, Debug)]
pub struct PoseFusionEkf {
    /// World-frame position, meters.
    position: Vector3<f64>,
    /// World-frame velocity, m/s.
    velocity: Vector3<f64>,
    /// World-frame attitude; unit norm on every assignment path.
    orientation: UnitQuaternion<f64>,
    /// Isotropic scale recovered from the most recent observation. Readout
    /// only; not part of the estimated error state.
    scale: f64,
    /// Error-state covariance over [position, velocity, attitude-error].
    covariance: SMatrix<f64, 9, 9>,
    /// Timestamp of the last processed inertial sample.
    last_timestamp_ns: u64,
    /// Set by `init`; gates propagation and updates.
    initialized: bool,
    config: EkfConfig,
    covariance_update: CovarianceUpdate,
    residual_policy: ResidualPolicy,
}

impl Display for PoseFusionEkf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoseFusionEkf {{ pos: [{:.3}, {:.3}, {:.3}], vel: [{:.3}, {:.3}, {:.3}], quat: [{:.4}, {:.4}, {:.4}, {:.4}], scale: {:.4} }}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            self.orientation.w,
            self.orientation.i,
            self.orientation.j,
            self.orientation.k,
            self.scale
        )
    }
}

impl PoseFusionEkf {
    /// Create a new filter with the given configuration and default policies
    /// (simplified covariance update, quaternion-coefficient residual).
    ///
    /// The returned filter is inert until [`init`](Self::init) is called.
    pub fn new(config: EkfConfig) -> PoseFusionEkf {
        PoseFusionEkf {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            scale: 1.0,
            covariance: SMatrix::<f64, 9, 9>::zeros(),
            last_timestamp_ns: 0,
            initialized: false,
            config,
            covariance_update: CovarianceUpdate::default(),
            residual_policy: ResidualPolicy::default(),
        }
    }

    /// Select the covariance-update form.
    pub fn with_covariance_update(mut self, form: CovarianceUpdate) -> Self {
        self.covariance_update = form;
        self
    }

    /// Select the attitude-residual parameterization.
    pub fn with_residual_policy(mut self, policy: ResidualPolicy) -> Self {
        self.residual_policy = policy;
        self
    }

    /// Initialize the filter from a starting pose and velocity.
    ///
    /// The pose is decomposed into its translation and rotation blocks. The
    /// rotation block may be only approximately orthonormal upstream, so the
    /// attitude quaternion is recovered through an explicit orthonormalization
    /// rather than taken at face value. Covariance resets to `0.5·I₉`. The
    /// scale readout and the last-seen timestamp are left untouched.
    ///
    /// # Arguments
    /// * `pose` - Starting pose as a 4x4 similarity transform.
    /// * `velocity` - Starting world-frame velocity in m/s.
    pub fn init(&mut self, pose: &Matrix4<f64>, velocity: Vector3<f64>) {
        let block = pose.fixed_view::<3, 3>(0, 0).into_owned();
        self.position = pose_translation(pose);
        self.orientation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&block));
        self.velocity = velocity;
        self.covariance = SMatrix::<f64, 9, 9>::identity() * 0.5;
        self.initialized = true;
    }

    /// Time update: propagate state and covariance through one inertial sample.
    ///
    /// Before initialization the call only records the timestamp, so the first
    /// sample processed after `init` sees the true inter-sample `dt` instead of
    /// a huge, meaningless one.
    ///
    /// # Arguments
    /// * `accel` - Body-frame specific force in m/s^2.
    /// * `gyro` - Body-frame angular rate in rad/s.
    /// * `timestamp_ns` - Sample timestamp in nanoseconds on a monotonic epoch.
    ///   Must be non-decreasing across `predict` calls; an out-of-order
    ///   timestamp yields a physically meaningless negative `dt`.
    pub fn predict(&mut self, accel: Vector3<f64>, gyro: Vector3<f64>, timestamp_ns: u64) {
        if !self.initialized {
            self.last_timestamp_ns = timestamp_ns;
            return;
        }
        let dt = (timestamp_ns as i64 - self.last_timestamp_ns as i64) as f64 * 1e-9;
        self.last_timestamp_ns = timestamp_ns;

        let rotation = self.orientation.to_rotation_matrix();
        let dq = exp_so3(&(gyro * dt));

        // Predict state
        let world_accel = rotation * accel - self.config.gravity;
        self.position += self.velocity * dt + 0.5 * world_accel * dt * dt;
        self.velocity += world_accel * dt;
        let mut orientation = self.orientation * dq;
        orientation.renormalize();
        self.orientation = orientation;

        // Propagate uncertainty
        let f = state_transition_jacobian(&self.orientation, &accel, dt);
        self.covariance =
            symmetrize(&(f * self.covariance * f.transpose())) + self.config.process_noise * dt;
    }

    /// Measurement update: fold in an absolute pose observation.
    ///
    /// The similarity transform is split into its isotropic scale (retained for
    /// [`get_state`](Self::get_state)), an orthonormalized rotation, and a
    /// translation. A singular innovation covariance is treated as a soft
    /// failure: the update is skipped and the state left unchanged.
    ///
    /// # Arguments
    /// * `pose` - Measured pose as a 4x4 similarity transform.
    /// * `_timestamp_ns` - Observation timestamp; carried for interface
    ///   symmetry with `predict` but not used by the update itself.
    pub fn observe(&mut self, pose: &Matrix4<f64>, _timestamp_ns: u64) {
        if !self.initialized {
            return;
        }
        self.scale = pose_scale(pose);
        let observed_rotation = pose_rotation(pose, self.scale);
        let observed_orientation = UnitQuaternion::from_rotation_matrix(&observed_rotation);
        let observed_translation = pose_translation(pose);

        // Observation Jacobian (7x9) and innovation covariance (7x7)
        let h = pose_observation_jacobian(&self.orientation);
        let s = h * self.covariance * h.transpose() + self.config.measurement_noise;

        // Kalman gain (9x7) via Cholesky solve: S Kᵀ = (P Hᵀ)ᵀ
        let pht = self.covariance * h.transpose();
        let Some(gain_t) = chol_solve_spd(&s, &pht.transpose(), SolveOptions::default()) else {
            return;
        };
        let gain = gain_t.transpose();

        let error = self.residual(&observed_translation, &observed_orientation);
        let dx: SVector<f64, 9> = gain * error;
        let dq = exp_so3(&dx.fixed_rows::<3>(6).into_owned());

        // Update
        self.position += dx.fixed_rows::<3>(0).into_owned();
        self.velocity += dx.fixed_rows::<3>(3).into_owned();
        let mut orientation = self.orientation * dq;
        orientation.renormalize();
        self.orientation = orientation;
        match self.covariance_update {
            CovarianceUpdate::Simplified => {
                let khp = gain * h * self.covariance;
                self.covariance -= khp;
            }
            CovarianceUpdate::Joseph => {
                let i_kh = SMatrix::<f64, 9, 9>::identity() - gain * h;
                self.covariance = i_kh * self.covariance * i_kh.transpose()
                    + gain * self.config.measurement_noise * gain.transpose();
            }
        }
        self.covariance = symmetrize(&self.covariance);
    }

    /// Innovation vector for the given observation, per the configured policy.
    fn residual(
        &self,
        observed_translation: &Vector3<f64>,
        observed_orientation: &UnitQuaternion<f64>,
    ) -> SVector<f64, 7> {
        match self.residual_policy {
            ResidualPolicy::QuaternionCoefficient => {
                pose_vector(observed_translation, observed_orientation)
                    - pose_vector(&self.position, &self.orientation)
            }
            ResidualPolicy::LogMap => {
                let theta = (self.orientation.inverse() * observed_orientation).scaled_axis();
                let coeffs = 0.5 * quaternion_differential(&self.orientation) * theta;
                let mut error = SVector::<f64, 7>::zeros();
                error
                    .fixed_rows_mut::<3>(0)
                    .copy_from(&(observed_translation - self.position));
                error.fixed_rows_mut::<4>(3).copy_from(&coeffs);
                error
            }
        }
    }

    /// Current estimate as a 4x4 homogeneous transform.
    ///
    /// The rotation block is `scale * R(q)`, the translation block is the
    /// position, and the bottom row is exactly `[0, 0, 0, 1]`. Pure read, no
    /// mutation.
    pub fn get_state(&self) -> Matrix4<f64> {
        pose_from_parts(self.scale, &self.orientation, &self.position)
    }

    /// World-frame position in meters.
    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    /// World-frame velocity in m/s.
    pub fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    /// World-frame attitude.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation
    }

    /// Isotropic scale from the most recent observation (1.0 before the first).
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Error-state covariance over [position, velocity, attitude-error].
    pub fn covariance(&self) -> SMatrix<f64, 9, 9> {
        self.covariance
    }

    /// Whether `init` has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
