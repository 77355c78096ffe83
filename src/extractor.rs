// SPDX-License-Identifier: Apache-2.0

//! Foreground extractor (C4): turns a frame plus a background mask into a
//! foreground-only sequence, optionally augmented by frame-to-frame
//! velocity coherence.

use serde::{Deserialize, Serialize};

use crate::polar::{PolarFrame, PolarPoint};

/// Extraction mode (§4.3, §6.2 `extractor.mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Use the background mask only.
    Background,
    /// Use frame-to-frame nearest-neighbor velocity coherence only.
    Velocity,
    /// Combine both via `merge_mode`.
    Hybrid,
}

/// How `Hybrid` combines the background mask with the velocity mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMode {
    /// Foreground if either mask says foreground.
    Union,
    /// Foreground only if both masks say foreground.
    Intersection,
    /// Background mask is authoritative; velocity rescues points the
    /// background mask missed only when the background mask says
    /// background (a fallback for sparse far points).
    Primary,
}

/// Tunable parameters for the extractor (§6.2 `extractor.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExtractorParams {
    /// Selected extraction mode.
    pub mode: Mode,
    /// Merge mode used when `mode == Hybrid`.
    pub hybrid_merge_mode: MergeMode,
    /// Nearest-neighbor search radius for frame-to-frame correspondence,
    /// meters (polar approximation, see [`approx_planar_distance`]).
    pub velocity_search_radius_m: f32,
    /// Minimum apparent speed, m/s, for a matched point to be classified
    /// foreground by the velocity test.
    pub velocity_threshold_mps: f32,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        ExtractorParams {
            mode: Mode::Background,
            hybrid_merge_mode: MergeMode::Primary,
            velocity_search_radius_m: 2.0,
            velocity_threshold_mps: 0.5,
        }
    }
}

/// Approximate planar (ring-local) distance between two polar points,
/// projecting azimuth and range onto a local tangent plane. Good enough for
/// a ~2 m correspondence search; not a substitute for the world transform
/// in C5.
fn approx_planar_distance(a: &PolarPoint, b: &PolarPoint) -> f32 {
    if a.ring != b.ring {
        return f32::INFINITY;
    }
    let ax = a.distance_m * a.azimuth_deg.to_radians().cos();
    let ay = a.distance_m * a.azimuth_deg.to_radians().sin();
    let bx = b.distance_m * b.azimuth_deg.to_radians().cos();
    let by = b.distance_m * b.azimuth_deg.to_radians().sin();
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

/// Computes a velocity-coherence mask by nearest-neighbor correspondence
/// between `prev` and `curr` (§4.3). Deterministic: ties in distance are
/// broken by the lower index in `prev`.
fn velocity_mask(prev: &PolarFrame, curr: &PolarFrame, params: &ExtractorParams) -> Vec<bool> {
    let dt_s = (curr.t_end_ns.saturating_sub(prev.t_end_ns)) as f32 / 1.0e9;
    let mut mask = vec![false; curr.points.len()];
    if dt_s <= 0.0 {
        return mask;
    }

    for (i, cp) in curr.points.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (j, pp) in prev.points.iter().enumerate() {
            let d = approx_planar_distance(cp, pp);
            if d > params.velocity_search_radius_m {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((j, d)),
            }
        }
        if let Some((_, d)) = best {
            let speed = d / dt_s;
            mask[i] = speed > params.velocity_threshold_mps;
        }
    }

    mask
}

/// Extract the foreground subset of `frame`, given its background mask and
/// (optionally) the previous frame for velocity correspondence.
///
/// Deterministic on identical inputs, as required by §4.3.
pub fn extract_foreground(
    frame: &PolarFrame,
    background_mask: &[bool],
    prev_frame: Option<&PolarFrame>,
    params: &ExtractorParams,
) -> Vec<PolarPoint> {
    let foreground_mask = match params.mode {
        Mode::Background => background_mask.to_vec(),
        Mode::Velocity => match prev_frame {
            Some(prev) => velocity_mask(prev, frame, params),
            None => vec![false; frame.points.len()],
        },
        Mode::Hybrid => {
            let velocity = match prev_frame {
                Some(prev) => velocity_mask(prev, frame, params),
                None => vec![false; frame.points.len()],
            };
            match params.hybrid_merge_mode {
                MergeMode::Union => background_mask
                    .iter()
                    .zip(velocity.iter())
                    .map(|(&b, &v)| b || v)
                    .collect(),
                MergeMode::Intersection => background_mask
                    .iter()
                    .zip(velocity.iter())
                    .map(|(&b, &v)| b && v)
                    .collect(),
                MergeMode::Primary => background_mask
                    .iter()
                    .zip(velocity.iter())
                    .map(|(&b, &v)| if b { true } else { v })
                    .collect(),
            }
        }
    };

    frame
        .points
        .iter()
        .zip(foreground_mask.iter())
        .filter_map(|(p, &fg)| if fg { Some(*p) } else { None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ring: u8, azimuth_deg: f32, distance_m: f32) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_deg,
            elevation_deg: 0.0,
            distance_m,
            intensity: 10,
            t_ns: 0,
        }
    }

    fn frame(points: Vec<PolarPoint>, t_end_ns: u64) -> PolarFrame {
        PolarFrame {
            sensor_id: "lidar-0".to_string(),
            t_start_ns: 0,
            t_end_ns,
            points,
            rotation_index: 1,
        }
    }

    #[test]
    fn background_mode_uses_mask_only() {
        let f = frame(vec![point(0, 0.0, 5.0), point(0, 1.0, 5.0)], 0);
        let mask = vec![true, false];
        let params = ExtractorParams {
            mode: Mode::Background,
            ..ExtractorParams::default()
        };
        let fg = extract_foreground(&f, &mask, None, &params);
        assert_eq!(fg.len(), 1);
    }

    #[test]
    fn velocity_mode_flags_fast_moving_point() {
        let prev = frame(vec![point(0, 0.0, 5.0)], 0);
        let curr = frame(vec![point(0, 0.0, 10.0)], 100_000_000);
        let params = ExtractorParams {
            mode: Mode::Velocity,
            velocity_search_radius_m: 10.0,
            velocity_threshold_mps: 1.0,
            ..ExtractorParams::default()
        };
        let mask_only = vec![false];
        let fg = extract_foreground(&curr, &mask_only, Some(&prev), &params);
        assert_eq!(fg.len(), 1);
    }

    #[test]
    fn velocity_mode_without_prev_frame_yields_empty() {
        let curr = frame(vec![point(0, 0.0, 10.0)], 100);
        let params = ExtractorParams {
            mode: Mode::Velocity,
            ..ExtractorParams::default()
        };
        let fg = extract_foreground(&curr, &vec![false], None, &params);
        assert!(fg.is_empty());
    }

    #[test]
    fn hybrid_primary_falls_back_to_velocity_when_background_says_background() {
        let prev = frame(vec![point(0, 0.0, 5.0)], 0);
        let curr = frame(vec![point(0, 0.0, 10.0)], 100_000_000);
        let params = ExtractorParams {
            mode: Mode::Hybrid,
            hybrid_merge_mode: MergeMode::Primary,
            velocity_search_radius_m: 10.0,
            velocity_threshold_mps: 1.0,
        };
        let fg = extract_foreground(&curr, &vec![false], Some(&prev), &params);
        assert_eq!(fg.len(), 1);
    }

    #[test]
    fn hybrid_intersection_requires_both() {
        let prev = frame(vec![point(0, 0.0, 5.0)], 0);
        let curr = frame(vec![point(0, 0.0, 10.0)], 100_000_000);
        let params = ExtractorParams {
            mode: Mode::Hybrid,
            hybrid_merge_mode: MergeMode::Intersection,
            velocity_search_radius_m: 10.0,
            velocity_threshold_mps: 1.0,
        };
        let fg = extract_foreground(&curr, &vec![false], Some(&prev), &params);
        assert!(fg.is_empty());
    }

    #[test]
    fn is_deterministic_on_identical_inputs() {
        let prev = frame(vec![point(0, 0.0, 5.0), point(1, 0.0, 5.0)], 0);
        let curr = frame(
            vec![point(0, 0.0, 10.0), point(1, 0.0, 5.01)],
            100_000_000,
        );
        let params = ExtractorParams {
            mode: Mode::Hybrid,
            ..ExtractorParams::default()
        };
        let mask = vec![false, false];
        let first = extract_foreground(&curr, &mask, Some(&prev), &params);
        let second = extract_foreground(&curr, &mask, Some(&prev), &params);
        assert_eq!(first, second);
    }
}
