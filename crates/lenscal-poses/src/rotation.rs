//! Rodrigues rotation vectors.
//!
//! A rotation vector `r` encodes the rotation `R = exp([r]×)`: the direction of
//! `r` is the rotation axis and its norm the angle in radians.
//!
//! The gradient of a rotated point with respect to the rotation vector uses
//! the left Jacobian of SO(3):
//!
//! ```text
//! J_L(r) = I + (1 - cos θ)/θ² [r]× + (θ - sin θ)/θ³ [r]×²
//! d(R(r) p)/dr = -[R(r) p]× J_L(r)
//! ```

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Squared angle below which the series expansions are used.
pub const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Cross-product matrix `[v]×`, such that `[v]× w = v × w`.
#[inline]
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rotation matrix from a rotation vector.
pub fn rotation_matrix(r: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*r).into_inner()
}

/// Rotation vector from a rotation matrix.
///
/// The matrix is assumed orthonormal; the returned angle lies in `[0, π]`.
pub fn rotation_vector(rotation: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix_unchecked(*rotation).scaled_axis()
}

/// Left Jacobian of the SO(3) exponential map.
pub fn left_jacobian(r: &Vector3<f64>) -> Matrix3<f64> {
    let angle = r.norm_squared();
    let r_skew = skew_symmetric(r);

    if angle <= SMALL_ANGLE_THRESHOLD {
        Matrix3::identity() + 0.5 * r_skew + r_skew * r_skew / 6.0
    } else {
        let theta = angle.sqrt();
        let sin_theta = theta.sin();
        let cos_theta = theta.cos();

        Matrix3::identity()
            + (1.0 - cos_theta) / angle * r_skew
            + (theta - sin_theta) / (angle * theta) * r_skew * r_skew
    }
}

/// Rotates `p` by the rotation vector `r`.
///
/// # Arguments
/// * `r` - Rotation vector
/// * `p` - Point to rotate
/// * `d_dr` - Optional output: gradient of the result with respect to `r`
/// * `d_dp` - Optional output: gradient of the result with respect to `p`
pub fn rotate_point(
    r: &Vector3<f64>,
    p: &Vector3<f64>,
    d_dr: Option<&mut Matrix3<f64>>,
    d_dp: Option<&mut Matrix3<f64>>,
) -> Vector3<f64> {
    let rotation = rotation_matrix(r);
    let rotated = rotation * p;

    if let Some(jac) = d_dr {
        *jac = -skew_symmetric(&rotated) * left_jacobian(r);
    }
    if let Some(jac) = d_dp {
        *jac = rotation;
    }

    rotated
}
