//! Linearization utilities for the pose-fusion EKF.
//!
//! This module contains the pure math used by the filter: the SO(3) exponential
//! map from an angular-rate vector to a unit quaternion, the skew-symmetric
//! ("hat") cross-product operator, and the builders for the state-transition and
//! observation Jacobians. None of these functions carry state.
//!
//! The error state is ordered `[position(3), velocity(3), attitude-error(3)]`
//! and the observation vector is ordered `[position(3), q_w, q_x, q_y, q_z]`;
//! the Jacobian layouts below follow that convention.

use nalgebra::{Matrix3, Quaternion, SMatrix, UnitQuaternion, Vector3};

/// SO(3) exponential map from a rotation vector to a unit quaternion.
///
/// For a rotation vector $v$ with angle $\theta = \lVert v \rVert$:
///
/// $$
/// \exp(v) = \left( \cos\tfrac{\theta}{2},\ \sin\tfrac{\theta}{2} \cdot \hat{v} \right)
/// $$
///
/// The zero-angle case short-circuits to the identity quaternion so the axis
/// normalization never divides by zero.
///
/// # Arguments
/// * `v` - Rotation vector in radians (axis scaled by angle).
///
/// # Returns
/// * The unit quaternion representing the finite rotation.
///
/// # Example
/// ```rust
/// use visfusion::linearize::exp_so3;
/// use nalgebra::Vector3;
/// let q = exp_so3(&Vector3::zeros());
/// assert_eq!(q.w, 1.0);
/// ```
pub fn exp_so3(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = v.norm();
    if angle < f64::EPSILON {
        return UnitQuaternion::identity();
    }
    let half = 0.5 * angle;
    let axis = v / angle;
    UnitQuaternion::from_quaternion(Quaternion::from_parts(half.cos(), axis * half.sin()))
}

/// Skew-symmetric ("hat") matrix of a 3-vector.
///
/// Returns the matrix $\hat{v}$ satisfying $\hat{v} x = v \times x$ for all $x$.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    )
}

/// State-transition Jacobian of the strap-down propagation step.
///
/// Linearizes the constant-acceleration discretization around the current
/// nominal state:
///
/// $$
/// F = I_9 + \begin{bmatrix}
/// 0 & I_3 & 0 \\\\
/// 0 & 0 & -\widehat{R f^b} \\\\
/// 0 & 0 & 0
/// \end{bmatrix} t
/// $$
///
/// The position block is sensitive to velocity error and the velocity block to
/// attitude error through the rotated specific force; attitude error itself has
/// identity dynamics over one step.
///
/// # Arguments
/// * `orientation` - The nominal attitude the propagation was linearized around.
/// * `accel` - The body-frame specific force of the step in m/s^2.
/// * `dt` - The step duration in seconds.
///
/// # Returns
/// * The 9x9 transition Jacobian over `[position, velocity, attitude-error]`.
pub fn state_transition_jacobian(
    orientation: &UnitQuaternion<f64>,
    accel: &Vector3<f64>,
    dt: f64,
) -> SMatrix<f64, 9, 9> {
    let mut f = SMatrix::<f64, 9, 9>::identity();
    f.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(Matrix3::identity() * dt));
    f.fixed_view_mut::<3, 3>(3, 6)
        .copy_from(&(-skew_symmetric(&(orientation.to_rotation_matrix() * accel)) * dt));
    f
}

/// The 4x3 matrix mapping a small attitude-error vector to the corresponding
/// quaternion coefficient differential.
///
/// For a quaternion $q = (q_w, q_x, q_y, q_z)$ perturbed on the right by
/// $\exp(\delta\theta)$, the first-order change of its coefficients is
/// $\tfrac{1}{2} \Xi(q) \delta\theta$ with
///
/// $$
/// \Xi(q) = \begin{bmatrix}
/// -q_x & -q_y & -q_z \\\\
///  q_w & -q_z &  q_y \\\\
///  q_z &  q_w & -q_x \\\\
/// -q_y &  q_x &  q_w
/// \end{bmatrix}
/// $$
pub fn quaternion_differential(q: &UnitQuaternion<f64>) -> SMatrix<f64, 4, 3> {
    SMatrix::<f64, 4, 3>::new(
        -q.i, -q.j, -q.k, //
        q.w, -q.k, q.j, //
        q.k, q.w, -q.i, //
        -q.j, q.i, q.w,
    )
}

/// Observation Jacobian of the absolute-pose measurement.
///
/// The observation vector is `[position(3), q_w, q_x, q_y, q_z]`. Position is
/// observed directly (identity block) and the quaternion coefficients respond to
/// attitude error through $\tfrac{1}{2} \Xi(q)$ evaluated at the current
/// predicted quaternion. Velocity is unobserved, so its columns are zero.
///
/// # Arguments
/// * `orientation` - The current predicted attitude.
///
/// # Returns
/// * The 7x9 observation Jacobian.
pub fn pose_observation_jacobian(orientation: &UnitQuaternion<f64>) -> SMatrix<f64, 7, 9> {
    let mut h = SMatrix::<f64, 7, 9>::zeros();
    h.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&Matrix3::identity());
    h.fixed_view_mut::<4, 3>(3, 6)
        .copy_from(&(0.5 * quaternion_differential(orientation)));
    h
}
