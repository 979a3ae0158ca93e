//! The `rt` pose: rotation vector plus translation.

use crate::rotation::{rotate_point, rotation_matrix, rotation_vector};
use nalgebra::{Matrix3, Matrix3x6, Vector3};
use std::fmt;

/// A rigid transformation `x_a = R(r) x_b + t`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rt {
    /// Rotation vector
    pub r: Vector3<f64>,
    /// Translation
    pub t: Vector3<f64>,
}

impl fmt::Display for Rt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rt(r: [{:.6}, {:.6}, {:.6}], t: [{:.6}, {:.6}, {:.6}])",
            self.r.x, self.r.y, self.r.z, self.t.x, self.t.y, self.t.z
        )
    }
}

impl Default for Rt {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[f64; 6]> for Rt {
    fn from(rt: [f64; 6]) -> Self {
        Self::from_slice(&rt)
    }
}

impl From<Rt> for [f64; 6] {
    fn from(rt: Rt) -> Self {
        rt.to_array()
    }
}

impl Rt {
    pub fn new(r: Vector3<f64>, t: Vector3<f64>) -> Self {
        Self { r, t }
    }

    pub fn identity() -> Self {
        Self {
            r: Vector3::zeros(),
            t: Vector3::zeros(),
        }
    }

    /// Reads `[r0, r1, r2, t0, t1, t2]`. Panics if `rt.len() < 6`.
    pub fn from_slice(rt: &[f64]) -> Self {
        Self {
            r: Vector3::new(rt[0], rt[1], rt[2]),
            t: Vector3::new(rt[3], rt[4], rt[5]),
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.r.x, self.r.y, self.r.z, self.t.x, self.t.y, self.t.z]
    }

    /// Builds a pose from a rotation matrix and a translation.
    pub fn from_rotation_translation(rotation: &Matrix3<f64>, t: Vector3<f64>) -> Self {
        Self {
            r: rotation_vector(rotation),
            t,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        rotation_matrix(&self.r)
    }

    /// Applies the pose to `p`.
    ///
    /// # Arguments
    /// * `d_drt` - Optional output: gradient with respect to `[r, t]` (3×6)
    /// * `d_dp` - Optional output: gradient with respect to `p`
    pub fn transform_point(
        &self,
        p: &Vector3<f64>,
        d_drt: Option<&mut Matrix3x6<f64>>,
        d_dp: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        match d_drt {
            Some(jac) => {
                let mut d_dr = Matrix3::zeros();
                let rotated = rotate_point(&self.r, p, Some(&mut d_dr), d_dp);
                jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&d_dr);
                jac.fixed_view_mut::<3, 3>(0, 3).copy_from(&Matrix3::identity());
                rotated + self.t
            }
            None => rotate_point(&self.r, p, None, d_dp) + self.t,
        }
    }

    /// The inverse pose: if `self` is `rt_a_b`, returns `rt_b_a`.
    pub fn inverse(&self) -> Self {
        let rotation_t = self.rotation_matrix().transpose();
        Self {
            r: -self.r,
            t: -(rotation_t * self.t),
        }
    }

    /// Composition: `rt_a_b.compose(&rt_b_c)` is `rt_a_c`.
    pub fn compose(&self, other: &Rt) -> Self {
        let r0 = self.rotation_matrix();
        let r1 = other.rotation_matrix();
        Self {
            r: rotation_vector(&(r0 * r1)),
            t: r0 * other.t + self.t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-7;

    fn sample() -> Rt {
        Rt::new(Vector3::new(0.2, -0.4, 0.1), Vector3::new(1.0, -2.0, 0.5))
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let rt = sample();
        let identity = rt.compose(&rt.inverse());
        assert!(identity.r.norm() < 1e-12);
        assert!(identity.t.norm() < 1e-12);
    }

    #[test]
    fn test_compose_matches_sequential_transform() {
        let a = sample();
        let b = Rt::new(Vector3::new(-0.3, 0.05, 0.7), Vector3::new(0.1, 0.2, 3.0));
        let p = Vector3::new(0.4, 0.5, -0.6);

        let sequential = a.transform_point(&b.transform_point(&p, None, None), None, None);
        let composed = a.compose(&b).transform_point(&p, None, None);
        assert!((sequential - composed).norm() < 1e-12);
    }

    #[test]
    fn test_transform_point_gradient() {
        let rt = sample();
        let p = Vector3::new(0.4, 0.5, -0.6);

        let mut d_drt = Matrix3x6::zeros();
        let mut d_dp = Matrix3::zeros();
        rt.transform_point(&p, Some(&mut d_drt), Some(&mut d_dp));

        let base = rt.to_array();
        for i in 0..6 {
            let mut plus = base;
            let mut minus = base;
            plus[i] += EPS;
            minus[i] -= EPS;
            let diff = (Rt::from(plus).transform_point(&p, None, None)
                - Rt::from(minus).transform_point(&p, None, None))
                / (2.0 * EPS);
            for row in 0..3 {
                assert!(
                    (diff[row] - d_drt[(row, i)]).abs() < 1e-6,
                    "d/drt mismatch at ({row}, {i}): {} vs {}",
                    d_drt[(row, i)],
                    diff[row]
                );
            }
        }
        assert!((d_dp - rt.rotation_matrix()).abs().max() < 1e-15);
    }

    #[test]
    fn test_array_round_trip() {
        let rt = sample();
        assert_eq!(Rt::from(rt.to_array()), rt);
    }
}
