//! Layout consistency over every selection combination and problem shape.

use lenscal::lenscal_lensmodels::SplinedStereographicConfig;
use lenscal::{LensModel, ProblemLayout, ProblemSelections, ProblemSizes};

fn models() -> Vec<LensModel> {
    vec![
        LensModel::Pinhole,
        LensModel::Opencv8,
        LensModel::Cahvor,
        LensModel::SplinedStereographic(SplinedStereographicConfig::new(3, 8, 6, 150)),
    ]
}

/// Problem shapes, including ones where some classes are empty.
fn shapes() -> Vec<(ProblemSizes, usize)> {
    let full = ProblemSizes {
        ncameras_intrinsics: 3,
        ncameras_extrinsics: 2,
        nframes: 4,
        npoints: 5,
        npoints_fixed: 2,
        nobservations_board: 7,
        nobservations_point: 9,
        calibration_object_width_n: 6,
        calibration_object_height_n: 5,
    };
    vec![
        (full, 4),
        (ProblemSizes::default(), 0),
        (
            ProblemSizes {
                ncameras_extrinsics: 0,
                npoints: 0,
                npoints_fixed: 0,
                nobservations_point: 0,
                ..full
            },
            0,
        ),
        (
            ProblemSizes {
                nframes: 0,
                nobservations_board: 0,
                ..full
            },
            3,
        ),
        (
            ProblemSizes {
                npoints_fixed: 5,
                ..full
            },
            1,
        ),
        (
            ProblemSizes {
                ncameras_intrinsics: 1,
                ncameras_extrinsics: 0,
                nframes: 1,
                npoints: 0,
                npoints_fixed: 0,
                nobservations_board: 1,
                nobservations_point: 0,
                calibration_object_width_n: 8,
                calibration_object_height_n: 6,
            },
            0,
        ),
    ]
}

fn layouts() -> impl Iterator<Item = ProblemLayout> {
    models().into_iter().flat_map(|model| {
        shapes().into_iter().flat_map(move |(sizes, npairs)| {
            (0..=u8::MAX).map(move |bits| {
                ProblemLayout::new(sizes, ProblemSelections::from_bits(bits), &model, npairs)
            })
        })
    })
}

/// Marks `[start, start + len)` in `cover`, panicking past the end.
fn claim(cover: &mut [u32], start: usize, len: usize, what: &str) {
    assert!(
        start + len <= cover.len(),
        "{what}: [{start}, {}) overruns {}",
        start + len,
        cover.len()
    );
    for slot in &mut cover[start..start + len] {
        *slot += 1;
    }
}

#[test]
fn test_state_classes_sum_to_total() {
    for layout in layouts() {
        let sum = layout.num_states_intrinsics()
            + layout.num_states_extrinsics()
            + layout.num_states_frames()
            + layout.num_states_points()
            + layout.num_states_calobject_warp();
        assert_eq!(sum, layout.num_states(), "{:?}", layout.selections());
        assert_eq!(layout.state_scales().len(), layout.num_states());
    }
}

#[test]
fn test_measurement_classes_sum_to_total() {
    for layout in layouts() {
        let sum = layout.num_measurements_boards()
            + layout.num_measurements_points()
            + layout.num_measurements_points_triangulated()
            + layout.num_measurements_regularization();
        assert_eq!(sum, layout.num_measurements(), "{:?}", layout.selections());
        assert_eq!(
            layout.measurement_index_regularization() + layout.num_measurements_regularization(),
            layout.num_measurements()
        );
    }
}

#[test]
fn test_state_blocks_tile_the_state_vector() {
    for layout in layouts() {
        let sizes = *layout.sizes();
        let mut cover = vec![0u32; layout.num_states()];

        let nintrinsics = layout.num_intrinsics_optimization_params();
        for icam in 0..sizes.ncameras_intrinsics {
            if let Some(start) = layout.state_index_intrinsics(icam) {
                claim(&mut cover, start, nintrinsics, "intrinsics");
            }
        }
        for icam in 0..sizes.ncameras_extrinsics {
            if let Some(start) = layout.state_index_extrinsics(icam) {
                claim(&mut cover, start, 6, "extrinsics");
            }
        }
        for iframe in 0..sizes.nframes {
            if let Some(start) = layout.state_index_frames(iframe) {
                claim(&mut cover, start, 6, "frames");
            }
        }
        for ipoint in 0..sizes.npoints {
            if let Some(start) = layout.state_index_points(ipoint) {
                claim(&mut cover, start, 3, "points");
            }
        }
        if let Some(start) = layout.state_index_calobject_warp() {
            claim(&mut cover, start, 2, "calobject_warp");
        }

        assert!(
            cover.iter().all(|&n| n == 1),
            "{:?}: state coverage {:?}",
            layout.selections(),
            cover
        );
    }
}

#[test]
fn test_measurement_blocks_do_not_overrun() {
    for layout in layouts() {
        let sizes = *layout.sizes();
        let mut cover = vec![0u32; layout.num_measurements()];
        for i in 0..sizes.nobservations_board {
            claim(
                &mut cover,
                layout.measurement_index_boards(i),
                2 * sizes.ncorners_per_board(),
                "boards",
            );
        }
        for i in 0..sizes.nobservations_point {
            claim(&mut cover, layout.measurement_index_points(i), 2, "points");
        }
        for ipair in 0..layout.num_measurements_points_triangulated() / 2 {
            claim(
                &mut cover,
                layout.measurement_index_points_triangulated(ipair),
                2,
                "triangulated",
            );
        }
        claim(
            &mut cover,
            layout.measurement_index_regularization(),
            layout.num_measurements_regularization(),
            "regularization",
        );
        assert!(cover.iter().all(|&n| n == 1), "{:?}", layout.selections());
    }
}

#[test]
fn test_pack_then_unpack_is_identity() -> Result<(), Box<dyn std::error::Error>> {
    for layout in layouts().step_by(7) {
        let original: Vec<f64> = (0..layout.num_states())
            .map(|i| ((i as f64) * 0.731).sin() * 10f64.powi((i % 7) as i32 - 3))
            .collect();
        let mut b = original.clone();
        layout.pack(&mut b)?;
        layout.unpack(&mut b)?;
        for (got, want) in b.iter().zip(&original) {
            assert!(
                (got - want).abs() <= 2.0 * f64::EPSILON * want.abs(),
                "{got} vs {want}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_single_board_scenario() {
    let sizes = ProblemSizes {
        ncameras_intrinsics: 1,
        ncameras_extrinsics: 0,
        nframes: 1,
        npoints: 0,
        npoints_fixed: 0,
        nobservations_board: 1,
        nobservations_point: 0,
        calibration_object_width_n: 8,
        calibration_object_height_n: 6,
    };
    let selections = ProblemSelections::from_bits(u8::MAX).with_calobject_warp(false);
    let layout = ProblemLayout::new(sizes, selections, &LensModel::Opencv4, 0);

    assert_eq!(layout.num_measurements_boards(), 8 * 6 * 2);
    assert_eq!(layout.num_states_frames(), 6);
    assert_eq!(layout.state_index_intrinsics(0), Some(0));
}
