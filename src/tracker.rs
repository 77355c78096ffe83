// SPDX-License-Identifier: Apache-2.0

//! Multi-object tracker (C6b): Mahalanobis-gated Hungarian assignment of
//! clusters to Kalman-filtered tracks.

use std::collections::VecDeque;

use lapjv::{lapjv, Matrix};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::cluster::WorldCluster;
use crate::kalman::{ConstantVelocityModel, NoiseParams};

const INVALID_MATCH: f32 = 1.0e9;

/// Track lifecycle status (§3 Track).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Observed fewer than `confirmation_threshold` times, no gap over
    /// `coast_max`.
    Tentative,
    /// Crossed the confirmation threshold.
    Confirmed,
    /// Missed the most recent frame(s) but not yet retired.
    Coasting,
    /// Exceeded `max_misses`; handed to the transit promoter.
    Retired,
}

/// Coarse object classification, assigned at retirement (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackClass {
    /// Not yet classified (only assigned at retirement).
    Unknown,
    Pedestrian,
    Vehicle,
    Other,
}

/// One update of a track's state, appended to its bounded history (§3
/// TrackObs).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackObs {
    /// Sensor timestamp this observation corresponds to.
    pub t_ns: u64,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// `sqrt(vx^2 + vy^2)`.
    pub speed_mps: f32,
    /// `(length, width, height)`, taken from the matched cluster's bbox.
    pub bbox: (f32, f32, f32),
    /// 95th percentile of member Z, taken from the matched cluster
    /// (`WorldCluster::height_p95`), carried forward unchanged while
    /// coasting.
    pub height_p95: f32,
    /// `atan2(vy, vx)` in degrees, `0` if stationary.
    pub heading_deg: f32,
}

/// A tracked object (§3 Track).
#[derive(Debug, Clone)]
pub struct Track {
    /// Lexicographically sortable, monotonic-by-creation-time id.
    pub track_id: Ulid,
    /// Sensor that produced this track.
    pub sensor_id: String,
    /// Kalman filter state.
    pub filter: ConstantVelocityModel,
    /// Timestamp of the last update (hit or coast decision).
    pub last_t_ns: u64,
    /// Number of hits (non-coast updates).
    pub observation_count: u64,
    /// Consecutive missed frames since the last hit.
    pub misses: u32,
    /// Current lifecycle status.
    pub status: TrackStatus,
    /// Assigned at retirement; `Unknown` until then.
    pub class: TrackClass,
    /// Bounded ring of recent observations, most recent last.
    pub history: VecDeque<TrackObs>,
    pub(crate) consecutive_stopped_frames: u32,
}

impl Track {
    fn push_history(&mut self, obs: TrackObs, capacity: usize) {
        if self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(obs);
    }

    /// Total path length over the track's history, meters.
    pub fn path_length_m(&self) -> f32 {
        let mut total = 0.0;
        let mut prev: Option<&TrackObs> = None;
        for obs in &self.history {
            if let Some(p) = prev {
                total += ((obs.x - p.x).powi(2) + (obs.y - p.y).powi(2)).sqrt();
            }
            prev = Some(obs);
        }
        total
    }
}

/// Tunable parameters for the tracker (§6.2 `tracker.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrackerParams {
    /// Squared Mahalanobis distance above which a (cluster, track) pair is
    /// gated out.
    pub gating_distance_squared: f32,
    /// Kalman process noise, position component.
    pub process_noise_pos: f32,
    /// Kalman process noise, velocity component.
    pub process_noise_vel: f32,
    /// Kalman measurement noise.
    pub measurement_noise: f32,
    /// Consecutive misses before a track is retired.
    pub max_misses: u32,
    /// Hits required for `Tentative` to become `Confirmed`.
    pub confirmation_threshold: u64,
    /// Hard cap on simultaneously active tracks per sensor.
    pub max_tracks: usize,
    /// Speed, m/s, below which a confirmed track counts as "stopped" for
    /// the doubled-coasting special case.
    pub stopped_threshold_mps: f32,
    /// Consecutive stopped frames before `max_misses` is doubled.
    pub stopped_window_frames: u32,
    /// Bounded history length kept per track.
    pub history_capacity: usize,
}

impl Default for TrackerParams {
    fn default() -> Self {
        TrackerParams {
            gating_distance_squared: 25.0,
            process_noise_pos: 0.1,
            process_noise_vel: 1.0,
            measurement_noise: 0.25,
            max_misses: 3,
            confirmation_threshold: 3,
            max_tracks: 100,
            stopped_threshold_mps: 0.3,
            stopped_window_frames: 5,
            history_capacity: 600,
        }
    }
}

impl TrackerParams {
    fn noise(&self) -> NoiseParams {
        NoiseParams {
            process_noise_pos: self.process_noise_pos,
            process_noise_vel: self.process_noise_vel,
            measurement_noise: self.measurement_noise,
        }
    }
}

/// Result of one tracker step (§4.5): observations for every track updated
/// this frame, plus any tracks that were retired and must flow to the
/// transit promoter (C7).
#[derive(Debug, Default)]
pub struct StepResult {
    /// `(track_id, observation)` for every non-retired track touched this
    /// frame (§4.5 step 8).
    pub observations: Vec<(Ulid, TrackObs)>,
    /// Tracks that crossed `max_misses` this frame.
    pub retired: Vec<Track>,
}

/// Per-sensor track table (§4.5).
pub struct Tracker {
    sensor_id: String,
    tracks: Vec<Track>,
    params: TrackerParams,
    /// Centroids of clusters that matched no track last frame, kept to seed
    /// new tracks' velocity from frame-over-frame displacement (§4.5 step
    /// 6) if the same object reappears unmatched in the next frame too.
    prev_unmatched: Vec<(f32, f32)>,
}

impl Tracker {
    /// Create an empty tracker for `sensor_id`.
    pub fn new(sensor_id: impl Into<String>, params: TrackerParams) -> Self {
        Tracker {
            sensor_id: sensor_id.into(),
            tracks: Vec::new(),
            params,
            prev_unmatched: Vec::new(),
        }
    }

    /// Replace tuning parameters at a frame boundary.
    pub fn reload_params(&mut self, params: TrackerParams) {
        self.params = params;
    }

    /// Currently active (non-retired) tracks.
    pub fn active_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Run one full per-frame cycle (§4.5 steps 1-8).
    ///
    /// `grid_ready` gates opening of *confirmed* tracks during warmup: new
    /// tracks still open as `Tentative`, but `Tentative → Confirmed`
    /// promotion is withheld while the grid is not ready, per §4.2/§4.7.
    pub fn step(&mut self, clusters: &[WorldCluster], t_ns: u64, dt_s: f32, grid_ready: bool) -> StepResult {
        let dt_s = dt_s.max(0.0);

        for track in &mut self.tracks {
            track.filter.predict(dt_s);
        }

        let (cluster_to_track, track_to_cluster) = self.assign(clusters);

        let mut result = StepResult::default();

        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            if let Some(track_idx) = cluster_to_track[cluster_idx] {
                self.update_matched(track_idx, cluster, t_ns, &mut result);
            }
        }

        for track_idx in 0..self.tracks.len() {
            if track_to_cluster[track_idx].is_none() {
                self.coast(track_idx, t_ns, &mut result);
            }
        }

        let mut newly_unmatched = Vec::new();
        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            if cluster_to_track[cluster_idx].is_none() {
                if self.tracks.len() < self.params.max_tracks {
                    let initial_velocity = self.seed_velocity(cluster, dt_s);
                    self.open_new_track(cluster, t_ns, initial_velocity);
                }
                newly_unmatched.push((cluster.centroid.0, cluster.centroid.1));
            }
        }
        self.prev_unmatched = newly_unmatched;

        self.promote_tentative(grid_ready);

        let retired_ids: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TrackStatus::Retired)
            .map(|(i, _)| i)
            .collect();
        for idx in retired_ids.into_iter().rev() {
            let mut track = self.tracks.swap_remove(idx);
            track.class = classify(&track);
            result.retired.push(track);
        }

        result
    }

    /// `(cluster_idx -> track_idx, track_idx -> cluster_idx)`, both `None`
    /// for unmatched, computed by a single Hungarian assignment over the
    /// gated Mahalanobis cost matrix (§4.5 steps 2-3).
    fn assign(&self, clusters: &[WorldCluster]) -> (Vec<Option<usize>>, Vec<Option<usize>>) {
        let mut cluster_to_track = vec![None; clusters.len()];
        let mut track_to_cluster = vec![None; self.tracks.len()];

        if clusters.is_empty() || self.tracks.is_empty() {
            return (cluster_to_track, track_to_cluster);
        }

        let dims = clusters.len().max(self.tracks.len());
        let gating = self.params.gating_distance_squared;
        let costs = Matrix::from_shape_fn((dims, dims), |(c, t)| {
            if c < clusters.len() && t < self.tracks.len() {
                let measurement = Vector2::new(clusters[c].centroid.0, clusters[c].centroid.1);
                let m2 = self.tracks[t].filter.mahalanobis_sq(measurement);
                if m2 > gating {
                    INVALID_MATCH
                } else {
                    m2
                }
            } else {
                0.0
            }
        });

        let (row_to_col, _col_to_row) = match lapjv(&costs) {
            Ok(ans) => ans,
            Err(_) => return (cluster_to_track, track_to_cluster),
        };

        for c in 0..clusters.len() {
            let t = row_to_col[c];
            if t < self.tracks.len() && costs[(c, t)] < INVALID_MATCH {
                cluster_to_track[c] = Some(t);
                track_to_cluster[t] = Some(c);
            }
        }

        (cluster_to_track, track_to_cluster)
    }

    fn update_matched(&mut self, track_idx: usize, cluster: &WorldCluster, t_ns: u64, result: &mut StepResult) {
        let track = &mut self.tracks[track_idx];
        track.filter.update(Vector2::new(cluster.centroid.0, cluster.centroid.1));
        track.last_t_ns = t_ns;
        track.observation_count += 1;
        track.misses = 0;
        if track.status == TrackStatus::Coasting {
            track.status = TrackStatus::Tentative;
        }

        let speed = (track.filter.mean[2].powi(2) + track.filter.mean[3].powi(2)).sqrt();
        if speed < self.params.stopped_threshold_mps {
            track.consecutive_stopped_frames += 1;
        } else {
            track.consecutive_stopped_frames = 0;
        }

        let obs = TrackObs {
            t_ns,
            x: track.filter.mean[0],
            y: track.filter.mean[1],
            vx: track.filter.mean[2],
            vy: track.filter.mean[3],
            speed_mps: speed,
            bbox: (cluster.bbox_length_m, cluster.bbox_width_m, cluster.bbox_height_m),
            height_p95: cluster.height_p95,
            heading_deg: if speed > 0.0 {
                track.filter.mean[3].atan2(track.filter.mean[2]).to_degrees()
            } else {
                0.0
            },
        };
        track.push_history(obs, self.params.history_capacity);
        result.observations.push((track.track_id, obs));
    }

    fn coast(&mut self, track_idx: usize, t_ns: u64, result: &mut StepResult) {
        let effective_max_misses = {
            let track = &self.tracks[track_idx];
            if track.status == TrackStatus::Confirmed
                && track.consecutive_stopped_frames >= self.params.stopped_window_frames
            {
                self.params.max_misses * 2
            } else {
                self.params.max_misses
            }
        };

        let track = &mut self.tracks[track_idx];
        track.misses += 1;
        track.last_t_ns = t_ns;
        if track.misses >= effective_max_misses {
            track.status = TrackStatus::Retired;
            return;
        }
        track.status = TrackStatus::Coasting;

        if let Some(&last) = track.history.back() {
            let obs = TrackObs {
                t_ns,
                x: track.filter.mean[0],
                y: track.filter.mean[1],
                vx: track.filter.mean[2],
                vy: track.filter.mean[3],
                speed_mps: last.speed_mps,
                bbox: last.bbox,
                height_p95: last.height_p95,
                heading_deg: last.heading_deg,
            };
            result.observations.push((track.track_id, obs));
        }
    }

    /// Match `cluster`'s centroid against last frame's unmatched clusters by
    /// nearest neighbor, returning a displacement-derived `(vx, vy)` if one
    /// lies within a plausible single-frame displacement (§4.5 step 6).
    fn seed_velocity(&self, cluster: &WorldCluster, dt_s: f32) -> Option<(f32, f32)> {
        const MAX_DISPLACEMENT_M: f32 = 5.0;
        if dt_s <= 0.0 {
            return None;
        }
        let (cx, cy) = (cluster.centroid.0, cluster.centroid.1);
        self.prev_unmatched
            .iter()
            .map(|&(px, py)| (cx - px, cy - py))
            .map(|(dx, dy)| (dx, dy, (dx * dx + dy * dy).sqrt()))
            .filter(|&(_, _, dist)| dist <= MAX_DISPLACEMENT_M)
            .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(dx, dy, _)| (dx / dt_s, dy / dt_s))
    }

    fn open_new_track(&mut self, cluster: &WorldCluster, t_ns: u64, initial_velocity: Option<(f32, f32)>) {
        let filter = ConstantVelocityModel::new(
            cluster.centroid.0,
            cluster.centroid.1,
            initial_velocity,
            self.params.noise(),
        );
        let track = Track {
            track_id: Ulid::new(),
            sensor_id: self.sensor_id.clone(),
            filter,
            last_t_ns: t_ns,
            observation_count: 1,
            misses: 0,
            status: TrackStatus::Tentative,
            class: TrackClass::Unknown,
            history: VecDeque::new(),
            consecutive_stopped_frames: 0,
        };
        self.tracks.push(track);
    }

    /// Force-retire every active track immediately, bypassing `max_misses`.
    /// Used on pipeline shutdown to flush in-flight tracks through C7
    /// before the process exits (§5 cancellation).
    pub fn retire_all(&mut self) -> Vec<Track> {
        self.tracks
            .drain(..)
            .map(|mut track| {
                track.status = TrackStatus::Retired;
                track.class = classify(&track);
                track
            })
            .collect()
    }

    fn promote_tentative(&mut self, grid_ready: bool) {
        if !grid_ready {
            return;
        }
        for track in &mut self.tracks {
            if track.status == TrackStatus::Tentative
                && track.observation_count >= self.params.confirmation_threshold
            {
                track.status = TrackStatus::Confirmed;
            }
        }
    }
}

/// Classify a retiring track by the decision tree in §4.5.
fn classify(track: &Track) -> TrackClass {
    if track.history.is_empty() {
        return TrackClass::Other;
    }
    let avg_speed: f32 =
        track.history.iter().map(|o| o.speed_mps).sum::<f32>() / track.history.len() as f32;
    let height_p95: f32 =
        track.history.iter().map(|o| o.height_p95).sum::<f32>() / track.history.len() as f32;
    let bbox_length = track
        .history
        .iter()
        .map(|o| o.bbox.0)
        .fold(0.0f32, f32::max);

    if height_p95 < 1.2 && avg_speed < 3.0 {
        TrackClass::Pedestrian
    } else if avg_speed >= 3.0 && bbox_length >= 1.5 {
        TrackClass::Vehicle
    } else {
        TrackClass::Other
    }
}
