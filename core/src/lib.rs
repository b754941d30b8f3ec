//! Loosely-coupled pose/IMU fusion toolbox.
//!
//! This crate provides an extended Kalman filter that fuses high-rate inertial
//! measurements (specific force and angular rate in the body frame) with low-rate
//! absolute pose observations produced by an external localization pipeline (for
//! example a point-cloud or visual registration front end). The filter maintains a
//! continuously updated estimate of world-frame position, velocity, orientation,
//! and the isotropic scale implied by the most recent observation.
//!
//! The crate is deliberately narrow in scope: it is the estimation core only.
//! Sensor drivers, timestamp synchronization, the registration pipeline that
//! produces pose observations, and the scheduling harness that interleaves
//! `predict` and `observe` calls are all external collaborators. The filter
//! assumes a caller that supplies correctly time-ordered, already-synchronized
//! inputs; it performs no outlier rejection and does not estimate IMU biases.
//!
//! Primarily built off of one crate dependency:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra
//!   tools for the filter. All state dimensions are fixed at compile time, so the
//!   statically sized `SMatrix`/`SVector` types are used throughout.
//!
//! # Filter formulation
//!
//! The filter is a multiplicative, error-state EKF over the nine-dimensional
//! error vector
//!
//! $$
//! \delta x = [\delta p, \delta v, \delta \theta]
//! $$
//!
//! where $\delta p$ and $\delta v$ are additive world-frame position and velocity
//! errors and $\delta \theta$ is a small attitude-error rotation vector applied
//! multiplicatively to the nominal unit quaternion. The nominal state is
//! propagated with the strap-down kinematics
//!
//! $$
//! \begin{aligned}
//! a^w &= R(q)\\, f^b - g \\\\
//! p &\leftarrow p + v t + \tfrac{1}{2} a^w t^2 \\\\
//! v &\leftarrow v + a^w t \\\\
//! q &\leftarrow q \otimes \exp(\omega^b t)
//! \end{aligned}
//! $$
//!
//! with $f^b$ the measured specific force, $\omega^b$ the measured angular rate,
//! and $\exp$ the SO(3) exponential map. Covariance is propagated through the
//! linearized transition Jacobian, and pose observations are folded in with a
//! standard Kalman update over the seven-dimensional observation vector
//! $[p, q_w, q_x, q_y, q_z]$. See the [`ekf`] module for details, including the
//! covariance-update and residual policies.
//!
//! Pose observations and the filter readout are 4×4 homogeneous similarity
//! transforms: a rotation block scaled by a uniform factor, a translation block
//! in meters, and a $[0,0,0,1]$ bottom row. The helpers in this module decompose
//! and rebuild such transforms.

pub mod ekf;
pub mod linalg;
pub mod linearize;
pub mod sim;

use nalgebra::{Matrix4, Rotation3, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Basic structure for holding IMU data in the form of acceleration and angular rate vectors.
///
/// The vectors are in the body frame of the vehicle and represent raw strap-down
/// quantities: the accelerometer reading is the specific force in m/s^2 (gravity
/// still present) and the gyroscope reading is the angular rate in rad/s. This
/// library is not a hardware driver; the data is assumed to be unit-converted and
/// time-stamped by the caller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImuData {
    /// Specific force in m/s^2, body frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}
impl Default for ImuData {
    fn default() -> Self {
        Self::new()
    }
}
impl Display for ImuData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImuData {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}
impl ImuData {
    /// Create a new ImuData instance with all zeros
    pub fn new() -> ImuData {
        ImuData {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        }
    }
    /// Create a new ImuData instance from acceleration and gyro vectors
    ///
    /// # Arguments
    /// * `accel` - A Vector3 representing the specific force in m/s^2 in the body frame x, y, z axis.
    /// * `gyro` - A Vector3 representing the angular rate in rad/s in the body frame x, y, z axis.
    ///
    /// # Returns
    /// * An ImuData instance containing the acceleration and gyro vectors.
    ///
    /// # Example
    /// ```rust
    /// use visfusion::ImuData;
    /// use nalgebra::Vector3;
    /// let imu_data = ImuData::new_from_vector(
    ///    Vector3::new(0.0, 0.0, 9.81), // stationary under gravity
    ///    Vector3::new(0.0, 0.0, 0.0)   // no rotation
    /// );
    /// ```
    pub fn new_from_vector(accel: Vector3<f64>, gyro: Vector3<f64>) -> ImuData {
        ImuData { accel, gyro }
    }
}

/// Extract the isotropic scale factor of a similarity transform.
///
/// A similarity transform carries its uniform scale in the rotation block: each
/// column of `scale * R` has norm equal to the scale. The three column norms are
/// averaged to smooth out upstream rounding.
///
/// # Arguments
/// * `pose` - A 4x4 homogeneous similarity transform.
///
/// # Returns
/// * The isotropic scale factor (1.0 for a rigid transform).
pub fn pose_scale(pose: &Matrix4<f64>) -> f64 {
    let block = pose.fixed_view::<3, 3>(0, 0);
    (block.column(0).norm() + block.column(1).norm() + block.column(2).norm()) / 3.0
}

/// Recover the proper rotation of a similarity transform.
///
/// The rotation block is divided by the given scale and then orthonormalized, so
/// an upstream block that is only approximately `scale * R` still yields a valid
/// rotation.
///
/// # Arguments
/// * `pose` - A 4x4 homogeneous similarity transform.
/// * `scale` - The isotropic scale factor of the transform, as returned by [`pose_scale`].
///
/// # Returns
/// * The orthonormalized rotation of the transform.
pub fn pose_rotation(pose: &Matrix4<f64>, scale: f64) -> Rotation3<f64> {
    let block = pose.fixed_view::<3, 3>(0, 0).into_owned() / scale;
    Rotation3::from_matrix(&block)
}

/// Extract the translation block of a homogeneous transform.
pub fn pose_translation(pose: &Matrix4<f64>) -> Vector3<f64> {
    pose.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Assemble a 4x4 homogeneous similarity transform from its parts.
///
/// # Arguments
/// * `scale` - The isotropic scale factor applied to the rotation block.
/// * `orientation` - The rotation as a unit quaternion.
/// * `translation` - The translation in meters.
///
/// # Returns
/// * A 4x4 matrix whose rotation block is `scale * R`, whose translation block is
///   `translation`, and whose bottom row is exactly `[0, 0, 0, 1]`.
///
/// # Example
/// ```rust
/// use visfusion::{pose_from_parts, pose_scale, pose_translation};
/// use nalgebra::{UnitQuaternion, Vector3};
/// let pose = pose_from_parts(2.0, &UnitQuaternion::identity(), &Vector3::new(1.0, 2.0, 3.0));
/// assert_eq!(pose_scale(&pose), 2.0);
/// assert_eq!(pose_translation(&pose), Vector3::new(1.0, 2.0, 3.0));
/// ```
pub fn pose_from_parts(
    scale: f64,
    orientation: &UnitQuaternion<f64>,
    translation: &Vector3<f64>,
) -> Matrix4<f64> {
    let mut pose = Matrix4::identity();
    pose.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(scale * orientation.to_rotation_matrix().into_inner()));
    pose.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    pose
}

/// Pack a position and a unit quaternion into the 7-element observation vector.
///
/// The ordering is `[p_x, p_y, p_z, q_w, q_x, q_y, q_z]`, matching the rows of
/// the observation Jacobian built by [`linearize::pose_observation_jacobian`].
pub fn pose_vector(position: &Vector3<f64>, orientation: &UnitQuaternion<f64>) -> SVector<f64, 7> {
    let mut x = SVector::<f64, 7>::zeros();
    x.fixed_rows_mut::<3>(0).copy_from(position);
    x[3] = orientation.w;
    x[4] = orientation.i;
    x[5] = orientation.j;
    x[6] = orientation.k;
    x
}
