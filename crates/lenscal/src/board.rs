//! Calibration object geometry.
//!
//! Corner `(i, j)` of a `W × H` grid sits at `(i·spacing, j·spacing, z)` in
//! the object frame. The object may be bent: `z` follows two parabolas, one
//! along each axis, peaking at the centre.
//!
//! ```text
//! ξ = i/(W−1),  η = j/(H−1)
//! z = warp.x · 4ξ(1−ξ) + warp.y · 4η(1−η)
//! ```

use nalgebra::{Matrix3x2, Vector2, Vector3};

/// Position of corner `(i, j)` in the calibration object frame.
///
/// # Arguments
/// * `dp_dwarp` - Optional output: gradient with respect to the warp
pub fn board_corner(
    i: usize,
    j: usize,
    width_n: usize,
    height_n: usize,
    spacing: f64,
    warp: &Vector2<f64>,
    dp_dwarp: Option<&mut Matrix3x2<f64>>,
) -> Vector3<f64> {
    let xi = i as f64 / (width_n.max(2) - 1) as f64;
    let eta = j as f64 / (height_n.max(2) - 1) as f64;
    let bend_x = 4.0 * xi * (1.0 - xi);
    let bend_y = 4.0 * eta * (1.0 - eta);

    if let Some(jac) = dp_dwarp {
        *jac = Matrix3x2::zeros();
        jac[(2, 0)] = bend_x;
        jac[(2, 1)] = bend_y;
    }
    Vector3::new(
        i as f64 * spacing,
        j as f64 * spacing,
        warp.x * bend_x + warp.y * bend_y,
    )
}

/// All corners in pool order: `j` (row) major, `i` (column) minor.
pub fn board_points(
    width_n: usize,
    height_n: usize,
    spacing: f64,
    warp: &Vector2<f64>,
) -> Vec<Vector3<f64>> {
    (0..height_n)
        .flat_map(|j| (0..width_n).map(move |i| (i, j)))
        .map(|(i, j)| board_corner(i, j, width_n, height_n, spacing, warp, None))
        .collect()
}
