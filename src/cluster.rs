// SPDX-License-Identifier: Apache-2.0

//! DBSCAN clusterer (C5b): density-clusters world-frame points into
//! [`WorldCluster`]s.

use dbscan::{Classification, Model};
use serde::{Deserialize, Serialize};

use crate::world::WorldPoint;

/// Tunable parameters for the clusterer (§6.2 `cluster.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ClusterParams {
    /// DBSCAN neighborhood radius, meters.
    pub eps_m: f64,
    /// DBSCAN minimum points to form a dense region.
    pub min_points: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            eps_m: 0.6,
            min_points: 12,
        }
    }
}

/// A density-connected group of world points (§3 WorldCluster).
#[derive(Debug, Clone, PartialEq)]
pub struct WorldCluster {
    /// Deterministic, scan-order-assigned id, stable for identical input
    /// (§4.4 tie-break).
    pub cluster_id: usize,
    /// Capture time, taken from the latest member point.
    pub t_ns: u64,
    /// Arithmetic mean of member point coordinates.
    pub centroid: (f32, f32, f32),
    /// Axis-aligned bounding box length along X, meters.
    pub bbox_length_m: f32,
    /// Axis-aligned bounding box length along Y, meters.
    pub bbox_width_m: f32,
    /// Axis-aligned bounding box length along Z, meters.
    pub bbox_height_m: f32,
    /// Number of member points.
    pub point_count: usize,
    /// 95th percentile of member Z, per §4.4's sorted-index formula.
    pub height_p95: f32,
    /// Arithmetic mean of member intensities.
    pub intensity_mean: f32,
}

/// The 95th percentile of `values` using the sorted-index formula from
/// §4.4: `floor(0.95 * (n - 1))`. `values` is sorted in place.
fn percentile_95(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((values.len() - 1) as f32 * 0.95).floor() as usize;
    values[idx]
}

/// Cluster `points` with DBSCAN, returning one [`WorldCluster`] per
/// density-connected group. Noise points are discarded.
///
/// Cluster ids are assigned by first appearance in `points`' order, which
/// callers must supply in a deterministic (row-major) scan order so
/// identical input produces identical ids (§4.4 tie-break).
pub fn cluster_points(points: &[WorldPoint], params: &ClusterParams) -> Vec<WorldCluster> {
    if points.is_empty() {
        return Vec::new();
    }

    let dbscan_input: Vec<Vec<f32>> = points.iter().map(|p| vec![p.x, p.y, p.z]).collect();
    let classifications = Model::new(params.eps_m, params.min_points).run(&dbscan_input);

    let mut next_id = 1usize;
    let mut seed_to_id: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    let mut members: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();

    for (idx, classification) in classifications.iter().enumerate() {
        let seed = match classification {
            Classification::Core(i) | Classification::Edge(i) => *i,
            Classification::Noise => continue,
        };
        let cluster_id = *seed_to_id.entry(seed).or_insert_with(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        members.entry(cluster_id).or_default().push(idx);
    }

    let mut clusters: Vec<WorldCluster> = members
        .into_iter()
        .map(|(cluster_id, member_indices)| build_cluster(cluster_id, &member_indices, points))
        .collect();
    clusters.sort_by_key(|c| c.cluster_id);
    clusters
}

fn build_cluster(cluster_id: usize, member_indices: &[usize], points: &[WorldPoint]) -> WorldCluster {
    let n = member_indices.len() as f32;
    let mut sum_x = 0.0f32;
    let mut sum_y = 0.0f32;
    let mut sum_z = 0.0f32;
    let mut sum_intensity = 0.0f32;
    let mut min_x = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    let mut min_z = f32::INFINITY;
    let mut max_z = f32::NEG_INFINITY;
    let mut t_ns = 0u64;
    let mut z_values = Vec::with_capacity(member_indices.len());

    for &idx in member_indices {
        let p = &points[idx];
        sum_x += p.x;
        sum_y += p.y;
        sum_z += p.z;
        sum_intensity += p.intensity as f32;
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
        min_z = min_z.min(p.z);
        max_z = max_z.max(p.z);
        t_ns = t_ns.max(p.t_ns);
        z_values.push(p.z);
    }

    WorldCluster {
        cluster_id,
        t_ns,
        centroid: (sum_x / n, sum_y / n, sum_z / n),
        bbox_length_m: max_x - min_x,
        bbox_width_m: max_y - min_y,
        bbox_height_m: max_z - min_z,
        point_count: member_indices.len(),
        height_p95: percentile_95(z_values),
        intensity_mean: sum_intensity / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(x: f32, y: f32, z: f32) -> WorldPoint {
        WorldPoint {
            x,
            y,
            z,
            intensity: 20,
            t_ns: 1,
            src_idx: 0,
        }
    }

    #[test]
    fn dense_cluster_is_found() {
        let mut points = Vec::new();
        for i in 0..15 {
            let offset = i as f32 * 0.05;
            points.push(wp(offset, 0.0, 0.0));
        }
        let params = ClusterParams {
            eps_m: 0.3,
            min_points: 5,
        };
        let clusters = cluster_points(&points, &params);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count, 15);
    }

    #[test]
    fn sparse_points_are_noise_and_discarded() {
        let points = vec![wp(0.0, 0.0, 0.0), wp(50.0, 50.0, 0.0), wp(-50.0, -50.0, 0.0)];
        let params = ClusterParams::default();
        let clusters = cluster_points(&points, &params);
        assert!(clusters.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let clusters = cluster_points(&[], &ClusterParams::default());
        assert!(clusters.is_empty());
    }

    #[test]
    fn cluster_ids_stable_across_repeated_runs() {
        let mut points = Vec::new();
        for i in 0..15 {
            points.push(wp(i as f32 * 0.05, 0.0, 0.0));
        }
        for i in 0..15 {
            points.push(wp(100.0 + i as f32 * 0.05, 0.0, 0.0));
        }
        let params = ClusterParams {
            eps_m: 0.3,
            min_points: 5,
        };
        let first = cluster_points(&points, &params);
        let second = cluster_points(&points, &params);
        assert_eq!(
            first.iter().map(|c| c.cluster_id).collect::<Vec<_>>(),
            second.iter().map(|c| c.cluster_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn two_nearby_objects_separate_into_two_clusters() {
        let mut points = Vec::new();
        for i in 0..50 {
            let angle = i as f32 * (std::f32::consts::TAU / 50.0);
            points.push(wp(0.3 * angle.cos(), 0.3 * angle.sin(), 0.0));
        }
        for i in 0..50 {
            let angle = i as f32 * (std::f32::consts::TAU / 50.0);
            points.push(wp(5.0 + 0.3 * angle.cos(), 0.3 * angle.sin(), 0.0));
        }
        let params = ClusterParams {
            eps_m: 0.6,
            min_points: 12,
        };
        let mut clusters = cluster_points(&points, &params);
        clusters.sort_by(|a, b| a.centroid.0.partial_cmp(&b.centroid.0).unwrap());
        assert_eq!(clusters.len(), 2);
        assert!((clusters[0].centroid.0 - 0.0).abs() < 0.05);
        assert!((clusters[0].centroid.1 - 0.0).abs() < 0.05);
        assert!((clusters[1].centroid.0 - 5.0).abs() < 0.05);
        assert!((clusters[1].centroid.1 - 0.0).abs() < 0.05);
    }

    #[test]
    fn height_p95_uses_sorted_index_formula() {
        let mut points = Vec::new();
        for i in 0..20 {
            points.push(wp(i as f32 * 0.02, 0.0, i as f32));
        }
        let params = ClusterParams {
            eps_m: 1.0,
            min_points: 5,
        };
        let clusters = cluster_points(&points, &params);
        assert_eq!(clusters.len(), 1);
        let idx = ((20 - 1) as f32 * 0.95).floor() as usize;
        assert_eq!(clusters[0].height_p95, idx as f32);
    }
}
