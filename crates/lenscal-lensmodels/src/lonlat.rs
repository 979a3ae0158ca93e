//! Equirectangular projections.
//!
//! ```text
//! LONLAT: u = (atan2(x, z), asin(y/|p|))
//! LATLON: u = (asin(x/|p|), atan2(y, z))
//! q = f·u + c
//! ```
//!
//! LATLON is the natural model for rectified stereo pairs: epipolar lines
//! are the rows of the image.

use nalgebra::{Matrix2x3, RowVector3, Vector2, Vector3};

use crate::ProjectionJacobians;
use crate::pinhole::Core;

/// atan2(a, z) and its partials with respect to a and z.
fn azimuth(a: f64, z: f64) -> (f64, f64, f64) {
    let d2 = a * a + z * z;
    (a.atan2(z), z / d2, -a / d2)
}

/// asin(p[k]/|p|) and its gradient.
fn elevation(p: &Vector3<f64>, k: usize) -> (f64, RowVector3<f64>) {
    let n2 = p.norm_squared();
    let n = n2.sqrt();
    let off = (n2 - p[k] * p[k]).max(0.0).sqrt();
    let mut d = -p.transpose() * (p[k] / n2);
    d[k] += 1.0;
    if off > 0.0 {
        d /= off;
    }
    ((p[k] / n).clamp(-1.0, 1.0).asin(), d)
}

fn normalize_lonlat(p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
    let (lon, dlon_dx, dlon_dz) = azimuth(p.x, p.z);
    let (lat, dlat) = elevation(p, 1);
    let mut du_dp = Matrix2x3::zeros();
    du_dp[(0, 0)] = dlon_dx;
    du_dp[(0, 2)] = dlon_dz;
    du_dp.set_row(1, &dlat);
    (Vector2::new(lon, lat), du_dp)
}

fn normalize_latlon(p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
    let (lat, dlat) = elevation(p, 0);
    let (lon, dlon_dy, dlon_dz) = azimuth(p.y, p.z);
    let mut du_dp = Matrix2x3::zeros();
    du_dp.set_row(0, &dlat);
    du_dp[(1, 1)] = dlon_dy;
    du_dp[(1, 2)] = dlon_dz;
    (Vector2::new(lat, lon), du_dp)
}

fn project_with(
    normalize: fn(&Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>),
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    let core = Core::from_intrinsics(intrinsics);
    let (u, du_dp) = normalize(p);
    if let Some(jac) = jacobians {
        jac.dq_dp = core.scale_rows(&du_dp);
        core.write_gradients(&u, jac);
    }
    core.apply(&u)
}

pub(crate) fn project_lonlat(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    project_with(normalize_lonlat, p, intrinsics, jacobians)
}

pub(crate) fn project_latlon(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    project_with(normalize_latlon, p, intrinsics, jacobians)
}

/// Unit vector of a (lon, lat) pair.
pub(crate) fn unproject_lonlat(q: &Vector2<f64>, intrinsics: &[f64]) -> Vector3<f64> {
    let u = Core::from_intrinsics(intrinsics).unapply(q);
    let (lon, lat) = (u.x, u.y);
    Vector3::new(lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos())
}

/// Unit vector of a (lat, lon) pair.
pub(crate) fn unproject_latlon(q: &Vector2<f64>, intrinsics: &[f64]) -> Vector3<f64> {
    let u = Core::from_intrinsics(intrinsics).unapply(q);
    let (lat, lon) = (u.x, u.y);
    Vector3::new(lat.sin(), lat.cos() * lon.sin(), lat.cos() * lon.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTRINSICS: [f64; 4] = [300.0, 310.0, 500.0, 400.0];

    #[test]
    fn test_lonlat_round_trip_behind_camera() {
        let p = Vector3::new(0.5, -0.4, -0.8);
        let q = project_lonlat(&p, &INTRINSICS, None);
        let v = unproject_lonlat(&q, &INTRINSICS);
        assert!((v - p.normalize()).norm() < 1e-12);
    }

    #[test]
    fn test_latlon_round_trip() {
        let p = Vector3::new(-0.2, 0.9, 0.6);
        let q = project_latlon(&p, &INTRINSICS, None);
        let v = unproject_latlon(&q, &INTRINSICS);
        assert!((v - p.normalize()).norm() < 1e-12);
    }

    #[test]
    fn test_latlon_rows_are_planes_through_x_axis() {
        // Points on a plane containing the x axis share the same row
        let angle: f64 = 0.3;
        let q0 = project_latlon(&Vector3::new(-1.0, angle.sin(), angle.cos()), &INTRINSICS, None);
        let q1 = project_latlon(&Vector3::new(2.0, 3.0 * angle.sin(), 3.0 * angle.cos()), &INTRINSICS, None);
        assert!((q0.y - q1.y).abs() < 1e-9);
    }

    #[test]
    fn test_elevation_gradient_numerically() {
        let p = Vector3::new(0.3, -0.7, 1.1);
        let eps = 1e-6;
        for (normalize, name) in [
            (normalize_lonlat as fn(&Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>), "lonlat"),
            (normalize_latlon, "latlon"),
        ] {
            let (_, du_dp) = normalize(&p);
            for k in 0..3 {
                let mut pp = p;
                let mut pm = p;
                pp[k] += eps;
                pm[k] -= eps;
                let num = (normalize(&pp).0 - normalize(&pm).0) / (2.0 * eps);
                assert!((num - du_dp.column(k)).norm() < 1e-7, "{name} column {k}");
            }
        }
    }
}
