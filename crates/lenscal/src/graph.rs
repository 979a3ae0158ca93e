//! Sensor connectivity graph.
//!
//! Rigs whose cameras do not all see the calibration object at the same
//! time are seeded by chaining relative poses: camera 3 is placed relative
//! to camera 1, which is placed relative to camera 0, and so on. The chain
//! comes from a best-first traversal of the graph whose edge weights count
//! shared observations.
//!
//! Connectivity is given as the packed upper triangle of a symmetric
//! `N × N` matrix, row-major over `i < j`:
//!
//! ```text
//! (0,1) (0,2) ... (0,N-1) (1,2) ... (1,N-1) ... (N-2,N-1)
//! ```

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use lenscal_poses::Rt;
use thiserror::Error;
use tracing::debug;

use crate::observations::OptimizationInputs;

/// Sensor graph errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Connectivity of {nsensors} sensors needs {expected} entries, got {got}")]
    SizeMismatch {
        nsensors: usize,
        expected: usize,
        got: usize,
    },

    #[error("Sensor {sensor} shares no observations with sensor 0, directly or through others")]
    Disconnected { sensor: usize },

    #[error("No relative pose between sensor {sensor} and sensor {parent}")]
    MissingRelativePose { sensor: usize, parent: usize },
}

/// A sensor and the already-visited sensor it is placed relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorLink {
    pub sensor: usize,
    pub parent: usize,
}

/// Number of packed entries for `nsensors` sensors.
pub fn connectivity_len(nsensors: usize) -> usize {
    nsensors * nsensors.saturating_sub(1) / 2
}

/// Packed index of the pair `(i, j)`, `i != j`.
pub fn connectivity_index(nsensors: usize, i: usize, j: usize) -> usize {
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    i * nsensors - i * (i + 1) / 2 + (j - i - 1)
}

/// Counts, for every pair of intrinsics cameras, the frames both observe.
pub fn connectivity_from_observations(inputs: &OptimizationInputs) -> Vec<u32> {
    let nsensors = inputs.intrinsics.len();
    let mut observers = vec![Vec::new(); inputs.frames_rt_toref.len()];
    for observation in &inputs.observations_board {
        if let Some(cameras) = observers.get_mut(observation.iframe) {
            cameras.push(observation.camera.intrinsics);
        }
    }

    let mut connectivity = vec![0; connectivity_len(nsensors)];
    for mut cameras in observers {
        cameras.sort_unstable();
        cameras.dedup();
        for (k, &a) in cameras.iter().enumerate() {
            for &b in &cameras[k + 1..] {
                if a < nsensors && b < nsensors {
                    connectivity[connectivity_index(nsensors, a, b)] += 1;
                }
            }
        }
    }
    connectivity
}

/// Visits every sensor starting from sensor 0.
///
/// Sensors closer to 0 (fewer links) are visited first; among those, the
/// one with the strongest link to an already visited sensor, then the
/// lowest index. Returns every sensor other than 0 in visit order, each
/// with the sensor it was reached from.
pub fn traverse_sensor_links(nsensors: usize, connectivity: &[u32]) -> Result<Vec<SensorLink>, GraphError> {
    let expected = connectivity_len(nsensors);
    if connectivity.len() != expected {
        return Err(GraphError::SizeMismatch {
            nsensors,
            expected,
            got: connectivity.len(),
        });
    }
    if nsensors == 0 {
        return Ok(Vec::new());
    }

    let mut visited = vec![false; nsensors];
    let mut links = Vec::with_capacity(nsensors - 1);
    // max-heap on (fewest hops, strongest link, lowest sensor, lowest parent)
    let mut heap = BinaryHeap::new();
    heap.push((Reverse(0usize), 0u32, Reverse(0usize), Reverse(0usize)));

    while let Some((Reverse(hops), strength, Reverse(sensor), Reverse(parent))) = heap.pop() {
        if visited[sensor] {
            continue;
        }
        visited[sensor] = true;
        if sensor != 0 {
            debug!("Sensor {} reached from {} ({} shared, {} hops)", sensor, parent, strength, hops);
            links.push(SensorLink { sensor, parent });
        }
        for neighbour in (0..nsensors).filter(|&n| n != sensor && !visited[n]) {
            let shared = connectivity[connectivity_index(nsensors, sensor, neighbour)];
            if shared > 0 {
                heap.push((Reverse(hops + 1), shared, Reverse(neighbour), Reverse(sensor)));
            }
        }
    }

    match visited.iter().position(|v| !v) {
        Some(sensor) => Err(GraphError::Disconnected { sensor }),
        None => Ok(links),
    }
}

/// Poses of every sensor relative to sensor 0, composed along `links`.
///
/// `relative_pose(sensor, parent)` returns `rt_sensor_parent`. The result
/// holds `rt_sensor_0` for every sensor; entry 0 is the identity.
pub fn seed_extrinsics_from_links<F>(
    nsensors: usize,
    links: &[SensorLink],
    mut relative_pose: F,
) -> Result<Vec<Rt>, GraphError>
where
    F: FnMut(usize, usize) -> Option<Rt>,
{
    let mut poses: Vec<Option<Rt>> = vec![None; nsensors];
    if let Some(first) = poses.first_mut() {
        *first = Some(Rt::identity());
    }
    for link in links {
        let rt_parent_0 = poses
            .get(link.parent)
            .copied()
            .flatten()
            .ok_or(GraphError::Disconnected { sensor: link.parent })?;
        let rt_sensor_parent = relative_pose(link.sensor, link.parent).ok_or(GraphError::MissingRelativePose {
            sensor: link.sensor,
            parent: link.parent,
        })?;
        if let Some(slot) = poses.get_mut(link.sensor) {
            *slot = Some(rt_sensor_parent.compose(&rt_parent_0));
        }
    }
    poses
        .into_iter()
        .enumerate()
        .map(|(sensor, pose)| pose.ok_or(GraphError::Disconnected { sensor }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn packed(nsensors: usize, edges: &[(usize, usize, u32)]) -> Vec<u32> {
        let mut connectivity = vec![0; connectivity_len(nsensors)];
        for &(i, j, w) in edges {
            connectivity[connectivity_index(nsensors, i, j)] = w;
        }
        connectivity
    }

    #[test]
    fn test_connectivity_index_is_row_major() {
        let n = 4;
        let order: Vec<usize> = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
            .iter()
            .map(|&(i, j)| connectivity_index(n, i, j))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(connectivity_index(n, 3, 1), 4);
    }

    #[test]
    fn test_chain_is_followed() -> TestResult {
        // 0 - 1 - 2 - 3
        let connectivity = packed(4, &[(0, 1, 5), (1, 2, 5), (2, 3, 5)]);
        let links = traverse_sensor_links(4, &connectivity)?;
        assert_eq!(
            links,
            vec![
                SensorLink { sensor: 1, parent: 0 },
                SensorLink { sensor: 2, parent: 1 },
                SensorLink { sensor: 3, parent: 2 },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_fewest_hops_then_strongest_link() -> TestResult {
        // 3 is reachable in two hops through 1 (weak) or 2 (strong); the
        // direct but weak 0-2 link still wins over a longer path.
        let connectivity = packed(4, &[(0, 1, 10), (0, 2, 1), (1, 3, 2), (2, 3, 8), (1, 2, 50)]);
        let links = traverse_sensor_links(4, &connectivity)?;
        assert_eq!(links[0], SensorLink { sensor: 1, parent: 0 });
        assert_eq!(links[1], SensorLink { sensor: 2, parent: 0 });
        assert_eq!(links[2], SensorLink { sensor: 3, parent: 2 });
        Ok(())
    }

    #[test]
    fn test_isolated_sensor_is_disconnected() {
        let connectivity = packed(4, &[(0, 1, 3), (1, 2, 3)]);
        assert_eq!(
            traverse_sensor_links(4, &connectivity),
            Err(GraphError::Disconnected { sensor: 3 })
        );
    }

    #[test]
    fn test_wrong_length() {
        assert!(matches!(
            traverse_sensor_links(3, &[1, 1]),
            Err(GraphError::SizeMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn test_seed_composes_along_links() -> TestResult {
        let links = vec![
            SensorLink { sensor: 1, parent: 0 },
            SensorLink { sensor: 2, parent: 1 },
        ];
        let step = Rt::new(Vector3::new(0.0, 0.1, 0.0), Vector3::new(-1.0, 0.0, 0.0));
        let poses = seed_extrinsics_from_links(3, &links, |_, _| Some(step))?;

        assert_eq!(poses[0], Rt::identity());
        assert!((poses[1].r - step.r).norm() < 1e-12);
        assert!((poses[1].t - step.t).norm() < 1e-12);
        let expected = step.compose(&step);
        assert!((poses[2].r - expected.r).norm() < 1e-12);
        assert!((poses[2].t - expected.t).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_seed_missing_relative_pose() {
        let links = vec![SensorLink { sensor: 1, parent: 0 }];
        assert_eq!(
            seed_extrinsics_from_links(2, &links, |_, _| None),
            Err(GraphError::MissingRelativePose { sensor: 1, parent: 0 })
        );
    }
}
