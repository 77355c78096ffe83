// SPDX-License-Identifier: Apache-2.0

//! Transit promoter (C7): on track retirement, emits a [`Transit`] record
//! if the track passes a quality filter.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::tracker::{Track, TrackClass};

/// Tunable parameters for the promoter (§6.2 `transit.*`, §4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransitParams {
    /// Minimum observation count to be eligible.
    pub min_obs: u64,
    /// Minimum track duration, milliseconds.
    pub min_duration_ms: u64,
    /// Minimum total path length, meters.
    pub min_length_m: f32,
    /// Minimum combined quality score, `[0, 1]`.
    pub quality_threshold: f32,
    /// Weight of the observation-density sub-score.
    pub quality_weight_density: f32,
    /// Weight of the velocity-smoothness sub-score.
    pub quality_weight_smoothness: f32,
    /// Weight of the bbox-stability sub-score.
    pub quality_weight_stability: f32,
    /// Expected observation count for a track observed at the nominal
    /// frame rate for its full duration; used by the density sub-score.
    pub expected_at_10hz: f32,
}

impl Default for TransitParams {
    fn default() -> Self {
        TransitParams {
            min_obs: 5,
            min_duration_ms: 500,
            min_length_m: 1.0,
            quality_threshold: 0.3,
            quality_weight_density: 0.4,
            quality_weight_smoothness: 0.35,
            quality_weight_stability: 0.25,
            expected_at_10hz: 10.0,
        }
    }
}

/// A single completed object traversal (§3 Transit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transit {
    pub track_id: Ulid,
    pub sensor_id: String,
    pub t_start_ns: u64,
    pub t_end_ns: u64,
    pub length_m: f32,
    pub avg_speed_mps: f32,
    pub p50_speed_mps: f32,
    pub p85_speed_mps: f32,
    pub p95_speed_mps: f32,
    pub max_speed_mps: f32,
    pub min_speed_mps: f32,
    pub point_count: u64,
    pub class: TrackClass,
    pub quality_score: f32,
    pub avg_bbox_length_m: f32,
    pub avg_bbox_width_m: f32,
    pub avg_bbox_height_m: f32,
}

fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * p).floor() as usize;
    sorted[idx]
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}

fn coefficient_of_variation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    if mean.abs() < 1.0e-6 {
        return 0.0;
    }
    let var = variance(values);
    var.sqrt() / mean.abs()
}

/// Compute the resolved §4.6 composite quality score for `track`.
fn quality_score(track: &Track, params: &TransitParams) -> f32 {
    let n = track.history.len();
    if n == 0 {
        return 0.0;
    }

    let density_score = (track.observation_count as f32 / params.expected_at_10hz).min(1.0);

    let speeds: Vec<f32> = track.history.iter().map(|o| o.speed_mps).collect();
    let speed_deltas: Vec<f32> = speeds.windows(2).map(|w| w[1] - w[0]).collect();
    let smoothness_score = 1.0 / (1.0 + variance(&speed_deltas));

    let bbox_lengths: Vec<f32> = track.history.iter().map(|o| o.bbox.0).collect();
    let stability_score = 1.0 / (1.0 + coefficient_of_variation(&bbox_lengths));

    let weight_sum = params.quality_weight_density + params.quality_weight_smoothness + params.quality_weight_stability;
    if weight_sum <= 0.0 {
        return 0.0;
    }

    (params.quality_weight_density * density_score
        + params.quality_weight_smoothness * smoothness_score
        + params.quality_weight_stability * stability_score)
        / weight_sum
}

/// Evaluate a retired `track` against the transit filter, returning a
/// [`Transit`] if it passes (§4.6).
pub fn promote(track: &Track, params: &TransitParams) -> Option<Transit> {
    if track.observation_count < params.min_obs {
        return None;
    }
    if track.history.len() < 2 {
        return None;
    }

    let t_start_ns = track.history.front().unwrap().t_ns;
    let t_end_ns = track.history.back().unwrap().t_ns;
    let duration_ms = t_end_ns.saturating_sub(t_start_ns) / 1_000_000;
    if duration_ms < params.min_duration_ms {
        return None;
    }

    let length_m = track.path_length_m();
    if length_m < params.min_length_m {
        return None;
    }

    let score = quality_score(track, params);
    if score < params.quality_threshold {
        return None;
    }

    let mut speeds: Vec<f32> = track.history.iter().map(|o| o.speed_mps).collect();
    speeds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let avg_speed = speeds.iter().sum::<f32>() / speeds.len() as f32;

    let n = track.history.len() as f32;
    let avg_bbox_length = track.history.iter().map(|o| o.bbox.0).sum::<f32>() / n;
    let avg_bbox_width = track.history.iter().map(|o| o.bbox.1).sum::<f32>() / n;
    let avg_bbox_height = track.history.iter().map(|o| o.bbox.2).sum::<f32>() / n;

    Some(Transit {
        track_id: track.track_id,
        sensor_id: track.sensor_id.clone(),
        t_start_ns,
        t_end_ns,
        length_m,
        avg_speed_mps: avg_speed,
        p50_speed_mps: percentile(&speeds, 0.50),
        p85_speed_mps: percentile(&speeds, 0.85),
        p95_speed_mps: percentile(&speeds, 0.95),
        max_speed_mps: *speeds.last().unwrap(),
        min_speed_mps: *speeds.first().unwrap(),
        point_count: track.observation_count,
        class: track.class,
        quality_score: score,
        avg_bbox_length_m: avg_bbox_length,
        avg_bbox_width_m: avg_bbox_width,
        avg_bbox_height_m: avg_bbox_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::{ConstantVelocityModel, NoiseParams};
    use crate::tracker::{TrackObs, TrackStatus};
    use std::collections::VecDeque;

    fn track_with_history(obs: Vec<TrackObs>) -> Track {
        let mut history = VecDeque::new();
        for o in obs {
            history.push_back(o);
        }
        Track {
            track_id: Ulid::new(),
            sensor_id: "lidar-0".to_string(),
            filter: ConstantVelocityModel::new(0.0, 0.0, None, NoiseParams::default()),
            last_t_ns: history.back().map(|o| o.t_ns).unwrap_or(0),
            observation_count: history.len() as u64,
            misses: 0,
            status: TrackStatus::Retired,
            class: TrackClass::Vehicle,
            history,
            consecutive_stopped_frames: 0,
        }
    }

    fn obs(t_ns: u64, x: f32, speed: f32) -> TrackObs {
        TrackObs {
            t_ns,
            x,
            y: 0.0,
            vx: speed,
            vy: 0.0,
            speed_mps: speed,
            bbox: (2.0, 1.0, 1.0),
            height_p95: 1.0,
            heading_deg: 0.0,
        }
    }

    #[test]
    fn short_track_is_rejected_by_min_obs() {
        let track = track_with_history(vec![obs(0, 0.0, 5.0), obs(100_000_000, 1.0, 5.0)]);
        let params = TransitParams::default();
        assert!(promote(&track, &params).is_none());
    }

    #[test]
    fn good_track_is_promoted_with_speed_percentiles() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(obs(i as u64 * 100_000_000, i as f32 * 0.5, 5.0));
        }
        let track = track_with_history(history);
        let params = TransitParams {
            min_obs: 5,
            min_duration_ms: 100,
            min_length_m: 0.5,
            quality_threshold: 0.0,
            ..TransitParams::default()
        };
        let transit = promote(&track, &params).expect("should promote");
        assert!((transit.avg_speed_mps - 5.0).abs() < 1e-3);
        assert!((transit.p50_speed_mps - 5.0).abs() < 1e-3);
    }

    #[test]
    fn short_duration_is_rejected() {
        let track = track_with_history(vec![obs(0, 0.0, 5.0), obs(10_000_000, 0.1, 5.0)]);
        let params = TransitParams {
            min_obs: 1,
            ..TransitParams::default()
        };
        assert!(promote(&track, &params).is_none());
    }

    #[test]
    fn quality_weights_need_not_sum_to_one() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(obs(i as u64 * 100_000_000, i as f32 * 0.5, 5.0));
        }
        let track = track_with_history(history);
        let params = TransitParams {
            min_obs: 5,
            min_duration_ms: 100,
            min_length_m: 0.5,
            quality_threshold: 0.0,
            quality_weight_density: 2.0,
            quality_weight_smoothness: 0.0,
            quality_weight_stability: 0.0,
            ..TransitParams::default()
        };
        let transit = promote(&track, &params).expect("should promote");
        assert!(transit.quality_score >= 0.0 && transit.quality_score <= 1.0);
    }
}
