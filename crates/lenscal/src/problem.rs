//! Problem configuration: sizes, selections and constants.

use std::fmt;

/// Number of entities of each class in a calibration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProblemSizes {
    pub ncameras_intrinsics: usize,
    pub ncameras_extrinsics: usize,
    pub nframes: usize,
    pub npoints: usize,
    /// The last `npoints_fixed` points are never optimized
    pub npoints_fixed: usize,
    pub nobservations_board: usize,
    pub nobservations_point: usize,
    pub calibration_object_width_n: usize,
    pub calibration_object_height_n: usize,
}

impl ProblemSizes {
    /// Corners on one calibration object.
    pub fn ncorners_per_board(&self) -> usize {
        self.calibration_object_width_n * self.calibration_object_height_n
    }

    /// Points whose position is part of the state.
    pub fn npoints_variable(&self) -> usize {
        self.npoints.saturating_sub(self.npoints_fixed)
    }
}

/// Which variable classes are optimized and which residual classes are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemSelections {
    pub do_optimize_intrinsics_core: bool,
    pub do_optimize_intrinsics_distortions: bool,
    pub do_optimize_extrinsics: bool,
    /// Also governs the free discrete points
    pub do_optimize_frames: bool,
    pub do_optimize_calobject_warp: bool,
    pub do_apply_regularization: bool,
    pub do_apply_outlier_rejection: bool,
    pub do_apply_regularization_unity_cam01: bool,
}

impl Default for ProblemSelections {
    fn default() -> Self {
        Self {
            do_optimize_intrinsics_core: true,
            do_optimize_intrinsics_distortions: true,
            do_optimize_extrinsics: true,
            do_optimize_frames: true,
            do_optimize_calobject_warp: false,
            do_apply_regularization: true,
            do_apply_outlier_rejection: true,
            do_apply_regularization_unity_cam01: false,
        }
    }
}

impl ProblemSelections {
    /// Everything fixed, no regularization, no outlier rejection.
    pub fn none() -> Self {
        Self::from_bits(0)
    }

    /// Bit `i` of the result is the `i`-th toggle in declaration order.
    pub fn to_bits(self) -> u8 {
        [
            self.do_optimize_intrinsics_core,
            self.do_optimize_intrinsics_distortions,
            self.do_optimize_extrinsics,
            self.do_optimize_frames,
            self.do_optimize_calobject_warp,
            self.do_apply_regularization,
            self.do_apply_outlier_rejection,
            self.do_apply_regularization_unity_cam01,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |bits, (i, &on)| bits | (u8::from(on) << i))
    }

    pub fn from_bits(bits: u8) -> Self {
        let bit = |i: u8| bits & (1 << i) != 0;
        Self {
            do_optimize_intrinsics_core: bit(0),
            do_optimize_intrinsics_distortions: bit(1),
            do_optimize_extrinsics: bit(2),
            do_optimize_frames: bit(3),
            do_optimize_calobject_warp: bit(4),
            do_apply_regularization: bit(5),
            do_apply_outlier_rejection: bit(6),
            do_apply_regularization_unity_cam01: bit(7),
        }
    }

    pub fn with_intrinsics_core(mut self, on: bool) -> Self {
        self.do_optimize_intrinsics_core = on;
        self
    }

    pub fn with_intrinsics_distortions(mut self, on: bool) -> Self {
        self.do_optimize_intrinsics_distortions = on;
        self
    }

    pub fn with_extrinsics(mut self, on: bool) -> Self {
        self.do_optimize_extrinsics = on;
        self
    }

    pub fn with_frames(mut self, on: bool) -> Self {
        self.do_optimize_frames = on;
        self
    }

    pub fn with_calobject_warp(mut self, on: bool) -> Self {
        self.do_optimize_calobject_warp = on;
        self
    }

    pub fn with_regularization(mut self, on: bool) -> Self {
        self.do_apply_regularization = on;
        self
    }

    pub fn with_outlier_rejection(mut self, on: bool) -> Self {
        self.do_apply_outlier_rejection = on;
        self
    }

    pub fn with_regularization_unity_cam01(mut self, on: bool) -> Self {
        self.do_apply_regularization_unity_cam01 = on;
        self
    }
}

impl From<u8> for ProblemSelections {
    fn from(bits: u8) -> Self {
        Self::from_bits(bits)
    }
}

impl From<ProblemSelections> for u8 {
    fn from(selections: ProblemSelections) -> Self {
        selections.to_bits()
    }
}

impl fmt::Display for ProblemSelections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.do_optimize_intrinsics_core, "intrinsics-core"),
            (self.do_optimize_intrinsics_distortions, "intrinsics-distortions"),
            (self.do_optimize_extrinsics, "extrinsics"),
            (self.do_optimize_frames, "frames"),
            (self.do_optimize_calobject_warp, "calobject-warp"),
            (self.do_apply_regularization, "regularization"),
            (self.do_apply_outlier_rejection, "outlier-rejection"),
            (self.do_apply_regularization_unity_cam01, "unity-cam01"),
        ];
        let on: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();
        write!(f, "[{}]", on.join(", "))
    }
}

/// Bounds of the range prior on triangulated points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProblemConstants {
    pub point_min_range: f64,
    pub point_max_range: f64,
}

impl Default for ProblemConstants {
    fn default() -> Self {
        Self {
            point_min_range: 0.0,
            point_max_range: f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_bits_round_trip() {
        for bits in 0..=u8::MAX {
            assert_eq!(ProblemSelections::from_bits(bits).to_bits(), bits);
        }
    }

    #[test]
    fn test_selection_bit_order() {
        let s = ProblemSelections::none().with_intrinsics_core(true);
        assert_eq!(u8::from(s), 0b0000_0001);
        let s = ProblemSelections::none().with_regularization_unity_cam01(true);
        assert_eq!(u8::from(s), 0b1000_0000);
        assert_eq!(ProblemSelections::default().to_bits(), 0b0110_1111);
    }

    #[test]
    fn test_selection_display() {
        let s = ProblemSelections::none().with_frames(true).with_calobject_warp(true);
        assert_eq!(s.to_string(), "[frames, calobject-warp]");
    }

    #[test]
    fn test_npoints_variable() {
        let sizes = ProblemSizes {
            npoints: 5,
            npoints_fixed: 2,
            ..Default::default()
        };
        assert_eq!(sizes.npoints_variable(), 3);
    }
}
