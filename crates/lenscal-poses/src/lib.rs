//! Rigid-pose algebra for camera calibration.
//!
//! Poses are stored the way the calibration state vector stores them: a
//! 6-vector `rt = [r, t]` where `r` is a Rodrigues rotation vector (axis times
//! angle, radians) and `t` a translation. A pose `rt_a_b` maps points from
//! frame `b` into frame `a`:
//!
//! ```text
//! x_a = R(r) x_b + t
//! ```
//!
//! Every operation that sits inside the bundle-adjustment residuals has a
//! closed-form gradient, returned through optional `&mut` output arguments:
//!
//! | operation          | value          | gradients                 |
//! | ------------------ | -------------- | ------------------------- |
//! | [`rotate_point`]   | `R(r) p`       | `d/dr`, `d/dp`            |
//! | [`Rt::transform_point`] | `R p + t` | `d/drt` (3×6), `d/dp`     |
//! | [`Rt::compose`]    | `rt0 ∘ rt1`    | none                      |
//! | [`Rt::inverse`]    | `rt⁻¹`         | none                      |

pub mod rotation;
pub mod rt;

pub use rotation::{
    SMALL_ANGLE_THRESHOLD, left_jacobian, rotate_point, rotation_matrix, rotation_vector,
    skew_symmetric,
};
pub use rt::Rt;
