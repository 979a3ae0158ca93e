//! Outlier rejection.
//!
//! After a solve, every inlier board corner and point observation whose
//! residual exceeds `k·σ` in either coordinate is flagged by negating its
//! weight. `σ` is the per-coordinate RMS of the inlier residuals:
//!
//! ```text
//! σ² = Σ_inliers (dx² + dy²) / (2·N_inliers)
//! ```
//!
//! Flags are never cleared, so a second pass over the same residuals with
//! no new outliers leaves the weights untouched.

use tracing::{debug, warn};

use crate::layout::ProblemLayout;
use crate::observations::{ObservedPixel, OptimizationInputs};

/// Residuals below this many pixels are never outliers, whatever `σ` is.
pub const MIN_OUTLIER_THRESHOLD_PIXELS: f64 = 1e-3;

/// Number of flagged observations per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlierCounts {
    pub board: usize,
    pub point: usize,
    pub triangulated_point: usize,
}

/// Counts the currently flagged observations.
pub fn count_outliers(inputs: &OptimizationInputs) -> OutlierCounts {
    OutlierCounts {
        board: inputs.observations_board_pool.iter().filter(|px| px.is_outlier()).count(),
        point: inputs.observations_point.iter().filter(|o| o.px.is_outlier()).count(),
        triangulated_point: inputs
            .observations_point_triangulated
            .iter()
            .filter(|o| o.is_outlier())
            .count(),
    }
}

/// An inlier: a board pool index or a point observation index.
enum Site {
    Board(usize),
    Point(usize),
}

/// Every inlier with the first of its two residual rows.
fn inlier_sites(inputs: &OptimizationInputs, layout: &ProblemLayout) -> Vec<(Site, usize)> {
    let ncorners = inputs.calibration_object_width_n * inputs.calibration_object_height_n;
    let mut sites = Vec::new();
    for iobservation in 0..inputs.observations_board.len() {
        let row0 = layout.measurement_index_boards(iobservation);
        for (k, px) in inputs.board_pixels(iobservation).iter().enumerate() {
            if !px.is_outlier() {
                sites.push((Site::Board(iobservation * ncorners + k), row0 + 2 * k));
            }
        }
    }
    for (iobservation, observation) in inputs.observations_point.iter().enumerate() {
        if !observation.px.is_outlier() {
            sites.push((Site::Point(iobservation), layout.measurement_index_points(iobservation)));
        }
    }
    sites
}

fn flag(px: &mut ObservedPixel) {
    px.weight = -px.weight.abs().max(f64::MIN_POSITIVE);
}

/// Flags the inliers whose residual in `x` exceeds `k·σ`. Returns the number
/// of newly flagged observations.
///
/// `x` is the residual vector of `inputs` under `layout`.
pub fn mark_outliers(inputs: &mut OptimizationInputs, layout: &ProblemLayout, x: &[f64], k: f64) -> usize {
    let sites = inlier_sites(inputs, layout);
    if sites.is_empty() {
        return 0;
    }
    let norm2: f64 = sites.iter().map(|(_, row)| x[*row] * x[*row] + x[row + 1] * x[row + 1]).sum();
    let sigma = (norm2 / (2.0 * sites.len() as f64)).sqrt();
    let threshold = (k * sigma).max(MIN_OUTLIER_THRESHOLD_PIXELS);
    debug!("Outlier threshold {:.4} px (σ = {:.4} px over {} inliers)", threshold, sigma, sites.len());

    let mut nnew = 0;
    for (site, row) in sites {
        if x[row].abs().max(x[row + 1].abs()) <= threshold {
            continue;
        }
        match site {
            Site::Board(ipool) => flag(&mut inputs.observations_board_pool[ipool]),
            Site::Point(iobservation) => flag(&mut inputs.observations_point[iobservation].px),
        }
        nnew += 1;
    }
    if nnew > 0 {
        warn!("Marked {} new outliers above {:.4} px", nnew, threshold);
    }
    nnew
}
