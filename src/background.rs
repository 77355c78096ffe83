// SPDX-License-Identifier: Apache-2.0

//! Background grid (C3): a polar (ring x azimuth-bin) model of the static
//! scene, used to classify incoming points as foreground or background.

use serde::{Deserialize, Serialize};

use crate::polar::PolarFrame;

/// Per-cell lifecycle state (§3 BackgroundCell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    /// Never observed.
    Empty,
    /// Accumulating observations, not yet settled.
    Learning,
    /// Enough stable observations to be trusted for classification.
    ObsStable,
    /// Temporarily refusing EMA updates after a divergence burst.
    Frozen,
    /// Settled and promoted by the lifecycle controller; behaves like
    /// `ObsStable` for classification but no longer re-enters `Learning`.
    Locked,
}

/// One (ring, azimuth-bin) cell of the background grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackgroundCell {
    /// Running mean range, meters.
    pub range_mean: f32,
    /// Running variance of range, meters squared. Never negative.
    pub range_variance: f32,
    /// Number of background observations folded into this cell.
    pub observation_count: u64,
    /// Timestamp of the last EMA update.
    pub last_update_ns: u64,
    /// Current lifecycle state.
    pub state: CellState,
    /// While `state == Frozen`, no EMA update occurs until `last_update_ns`
    /// (updated on arrival, not on freeze) passes this deadline.
    pub freeze_until_ns: u64,
    consecutive_foreground: u32,
}

impl Default for BackgroundCell {
    fn default() -> Self {
        BackgroundCell {
            range_mean: 0.0,
            range_variance: 0.0,
            observation_count: 0,
            last_update_ns: 0,
            state: CellState::Empty,
            freeze_until_ns: 0,
            consecutive_foreground: 0,
        }
    }
}

const VARIANCE_FLOOR: f32 = 1.0e-4;

/// Tunable parameters for the background grid (§6.2 `background.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BackgroundParams {
    /// EMA rate applied on each background observation, `(0, 1]`.
    pub update_fraction: f32,
    /// EMA rate applied while a cell is frozen but still receiving
    /// background observations, `(0, update_fraction]`.
    pub frozen_update_fraction: f32,
    /// Scales the closeness threshold by the cell's mean range.
    pub noise_relative: f32,
    /// Scales the standard-deviation term of the closeness threshold.
    pub closeness_multiplier: f32,
    /// Absolute floor added to the closeness threshold, meters.
    pub safety_margin_m: f32,
    /// How many same-ring neighbor bins (each side) are consulted for
    /// neighbor confirmation.
    pub neighbor_radius_bins: u32,
    /// Neighbors required to confirm background when the cell's own test
    /// fails.
    pub neighbor_confirmation_count: u32,
    /// Consecutive foreground classifications that trigger a freeze.
    pub divergence_trigger: u32,
    /// Duration of a triggered freeze, milliseconds.
    pub freeze_duration_ms: u64,
    /// Minimum frames since pipeline start before warmup can complete.
    pub warmup_min_frames: u64,
    /// Fraction of cells that must reach `ObsStable`/`Locked` before warmup
    /// completes.
    pub warmup_fraction: f32,
    /// Observations required before a cell leaves `Learning`.
    pub stable_observation_count: u64,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        BackgroundParams {
            update_fraction: 0.02,
            frozen_update_fraction: 0.002,
            noise_relative: 0.01,
            closeness_multiplier: 3.0,
            safety_margin_m: 0.05,
            neighbor_radius_bins: 2,
            neighbor_confirmation_count: 2,
            divergence_trigger: 8,
            freeze_duration_ms: 30_000,
            warmup_min_frames: 50,
            warmup_fraction: 0.8,
            stable_observation_count: 30,
        }
    }
}

/// Point-in-time, serializable copy of the grid, suitable for `bincode`
/// encoding by a [`crate::sinks::BackgroundSnapshotSink`] (§4.2 snapshot
/// contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundSnapshot {
    /// Number of rings this snapshot was taken with.
    pub rings: u8,
    /// Number of azimuth bins this snapshot was taken with.
    pub azimuth_bins: u32,
    /// Row-major `rings * azimuth_bins` cell array.
    pub cells: Vec<BackgroundCell>,
}

/// Polar background model: `rings * azimuth_bins` cells, single writer.
pub struct BackgroundGrid {
    rings: u8,
    azimuth_bins: u32,
    cells: Vec<BackgroundCell>,
    params: BackgroundParams,
    frames_seen: u64,
}

impl BackgroundGrid {
    /// Create an empty grid with the given geometry.
    pub fn new(rings: u8, azimuth_bins: u32, params: BackgroundParams) -> Self {
        BackgroundGrid {
            rings,
            azimuth_bins,
            cells: vec![BackgroundCell::default(); rings as usize * azimuth_bins as usize],
            params,
            frames_seen: 0,
        }
    }

    /// Replace the live tuning parameters. Callers apply this at a frame
    /// boundary, per §4.2's "reloads on frame boundaries" contract.
    pub fn reload_params(&mut self, params: BackgroundParams) {
        self.params = params;
    }

    /// Number of frames classified since construction (or since the last
    /// restore from a snapshot with a different geometry).
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Fraction of cells in `ObsStable` or `Locked` (warmup gate, §4.2).
    pub fn fraction_settled(&self) -> f32 {
        if self.cells.is_empty() {
            return 0.0;
        }
        let settled = self
            .cells
            .iter()
            .filter(|c| matches!(c.state, CellState::ObsStable | CellState::Locked))
            .count();
        settled as f32 / self.cells.len() as f32
    }

    /// True once warmup has completed (§4.2 warmup policy): enough frames
    /// have been seen and enough cells have settled.
    pub fn is_warmed_up(&self) -> bool {
        self.frames_seen >= self.params.warmup_min_frames
            && self.fraction_settled() >= self.params.warmup_fraction
    }

    fn bin_of(&self, azimuth_deg: f32) -> u32 {
        let normalized = azimuth_deg.rem_euclid(360.0);
        let bin = (normalized / 360.0 * self.azimuth_bins as f32) as u32;
        bin.min(self.azimuth_bins - 1)
    }

    fn index(&self, ring: u8, bin: u32) -> usize {
        ring as usize * self.azimuth_bins as usize + bin as usize
    }

    /// The flat `(ring, azimuth-bin)` cell index a point with this azimuth
    /// falls into on `ring`, for callers (e.g. the lifecycle controller)
    /// that need to key state per cell rather than per ring.
    pub fn cell_index(&self, ring: u8, azimuth_deg: f32) -> u32 {
        self.index(ring, self.bin_of(azimuth_deg)) as u32
    }

    fn closeness_threshold(&self, cell: &BackgroundCell) -> f32 {
        let p = &self.params;
        p.closeness_multiplier * (cell.range_variance.max(0.0).sqrt() + p.noise_relative * cell.range_mean + VARIANCE_FLOOR)
            + p.safety_margin_m
    }

    /// Classify every point in `frame` as foreground (`true`) or background
    /// (`false`), updating background cells in place (§4.2 steps 1-8).
    ///
    /// Returns a mask the same length as `frame.points`, in the same order.
    pub fn classify_and_update(&mut self, frame: &PolarFrame) -> Vec<bool> {
        self.frames_seen += 1;
        let mut mask = Vec::with_capacity(frame.points.len());

        for point in &frame.points {
            if point.is_malformed() || point.ring >= self.rings {
                mask.push(false);
                continue;
            }

            let bin = self.bin_of(point.azimuth_deg);
            let idx = self.index(point.ring, bin);
            let cell_diff = (point.distance_m - self.cells[idx].range_mean).abs();
            let threshold = self.closeness_threshold(&self.cells[idx]);
            // A never-observed cell has no mean to compare against (it
            // starts at 0), so its closeness test is meaningless until it
            // has been seeded once. Treat that single first touch as
            // background so the cell has something real to discriminate
            // against afterward, same as `update_cell`'s direct-seed path.
            let never_observed = self.cells[idx].state == CellState::Empty;
            let is_cell_background = never_observed || cell_diff <= threshold;

            let neighbor_confirm = if is_cell_background {
                0
            } else {
                self.count_confirming_neighbors(point.ring, bin, point.distance_m)
            };

            let is_background =
                is_cell_background || neighbor_confirm >= self.params.neighbor_confirmation_count;

            if is_background {
                self.update_cell(idx, point.distance_m, point.t_ns);
                mask.push(false);
            } else {
                self.mark_foreground(idx, point.t_ns);
                mask.push(true);
            }
        }

        mask
    }

    fn count_confirming_neighbors(&self, ring: u8, bin: u32, distance_m: f32) -> u32 {
        let radius = self.params.neighbor_radius_bins as i64;
        let bins = self.azimuth_bins as i64;
        let mut count = 0;
        for delta in -radius..=radius {
            if delta == 0 {
                continue;
            }
            let neighbor_bin = (bin as i64 + delta).rem_euclid(bins) as u32;
            let neighbor_idx = self.index(ring, neighbor_bin);
            let neighbor = &self.cells[neighbor_idx];
            let diff = (distance_m - neighbor.range_mean).abs();
            if diff <= self.closeness_threshold(neighbor) {
                count += 1;
            }
        }
        count
    }

    fn update_cell(&mut self, idx: usize, distance_m: f32, t_ns: u64) {
        let cell = &mut self.cells[idx];

        if cell.state == CellState::Frozen {
            if cell.last_update_ns < cell.freeze_until_ns {
                let rate = self.params.frozen_update_fraction;
                apply_ema(cell, distance_m, rate);
                cell.last_update_ns = t_ns;
                return;
            }
            cell.state = CellState::ObsStable;
        }

        if cell.state == CellState::Empty {
            // First-ever observation: seed directly rather than EMA-ing in
            // from a meaningless `range_mean == 0.0`, which would otherwise
            // take many frames to converge and would misreport a huge
            // variance in the meantime (the step from 0 to any real range).
            cell.range_mean = distance_m;
            cell.range_variance = VARIANCE_FLOOR;
        } else {
            let rate = self.params.update_fraction;
            apply_ema(cell, distance_m, rate);
        }
        cell.observation_count += 1;
        cell.last_update_ns = t_ns;
        cell.consecutive_foreground = 0;

        if cell.state == CellState::Empty || cell.state == CellState::Learning {
            cell.state = if cell.observation_count >= self.params.stable_observation_count {
                CellState::ObsStable
            } else {
                CellState::Learning
            };
        }
    }

    fn mark_foreground(&mut self, idx: usize, t_ns: u64) {
        let cell = &mut self.cells[idx];
        if cell.state == CellState::Frozen {
            return;
        }
        cell.consecutive_foreground += 1;
        if cell.consecutive_foreground >= self.params.divergence_trigger {
            cell.state = CellState::Frozen;
            cell.freeze_until_ns = t_ns + self.params.freeze_duration_ms * 1_000_000;
            cell.consecutive_foreground = 0;
        }
    }

    /// Take an atomic, point-in-time copy of the grid for persistence.
    pub fn snapshot(&self) -> BackgroundSnapshot {
        BackgroundSnapshot {
            rings: self.rings,
            azimuth_bins: self.azimuth_bins,
            cells: self.cells.clone(),
        }
    }

    /// Restore from a previously taken snapshot. Returns `false` (and
    /// leaves the grid untouched) if the snapshot's geometry does not match
    /// this grid's, per §3's "seeded ... if its sensor/geometry tags
    /// match" contract.
    pub fn restore(&mut self, snapshot: &BackgroundSnapshot) -> bool {
        if snapshot.rings != self.rings || snapshot.azimuth_bins != self.azimuth_bins {
            return false;
        }
        self.cells = snapshot.cells.clone();
        true
    }

    /// Lock a cell permanently settled, called by the lifecycle controller
    /// (C8) once grid-wide warmup has completed for this cell's region.
    pub fn lock_cell(&mut self, ring: u8, bin: u32) {
        if ring >= self.rings || bin >= self.azimuth_bins {
            return;
        }
        let idx = self.index(ring, bin);
        if self.cells[idx].state == CellState::ObsStable {
            self.cells[idx].state = CellState::Locked;
        }
    }
}

fn apply_ema(cell: &mut BackgroundCell, distance_m: f32, rate: f32) {
    let delta = distance_m - cell.range_mean;
    cell.range_mean += rate * delta;
    let variance_sample = delta * delta;
    cell.range_variance = ((1.0 - rate) * cell.range_variance + rate * variance_sample).max(VARIANCE_FLOOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polar::PolarPoint;

    fn frame_with(points: Vec<PolarPoint>) -> PolarFrame {
        PolarFrame {
            sensor_id: "lidar-0".to_string(),
            t_start_ns: 0,
            t_end_ns: 1,
            points,
            rotation_index: 1,
        }
    }

    fn point(ring: u8, azimuth_deg: f32, distance_m: f32, t_ns: u64) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_deg,
            elevation_deg: 0.0,
            distance_m,
            intensity: 50,
            t_ns,
        }
    }

    #[test]
    fn learns_then_classifies_same_range_as_background() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        for t in 0..40 {
            let f = frame_with(vec![point(0, 10.0, 20.0, t)]);
            grid.classify_and_update(&f);
        }
        let f = frame_with(vec![point(0, 10.0, 20.05, 41)]);
        let mask = grid.classify_and_update(&f);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn sudden_close_return_is_foreground() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        for t in 0..40 {
            let f = frame_with(vec![point(0, 10.0, 20.0, t)]);
            grid.classify_and_update(&f);
        }
        let f = frame_with(vec![point(0, 10.0, 3.0, 41)]);
        let mask = grid.classify_and_update(&f);
        assert_eq!(mask, vec![true]);
    }

    #[test]
    fn repeated_foreground_freezes_cell() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        for t in 0..40 {
            let f = frame_with(vec![point(0, 10.0, 20.0, t)]);
            grid.classify_and_update(&f);
        }
        for t in 40..60 {
            let f = frame_with(vec![point(0, 10.0, 3.0, t)]);
            grid.classify_and_update(&f);
        }
        let idx = grid.index(0, grid.bin_of(10.0));
        assert_eq!(grid.cells[idx].state, CellState::Frozen);
    }

    #[test]
    fn malformed_point_is_never_classified_foreground_or_panics() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        let f = frame_with(vec![point(0, 10.0, f32::NAN, 1)]);
        let mask = grid.classify_and_update(&f);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn azimuth_wraparound_neighbors_work_at_bin_zero() {
        let mut grid = BackgroundGrid::new(1, 360, BackgroundParams::default());
        for t in 0..40 {
            let f = frame_with(vec![
                point(0, 358.5, 20.0, t),
                point(0, 0.5, 20.0, t),
                point(0, 1.5, 20.0, t),
            ]);
            grid.classify_and_update(&f);
        }
        let f = frame_with(vec![point(0, 0.5, 20.05, 41)]);
        let mask = grid.classify_and_update(&f);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn snapshot_roundtrip_preserves_state() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        for t in 0..40 {
            let f = frame_with(vec![point(0, 10.0, 20.0, t)]);
            grid.classify_and_update(&f);
        }
        let snap = grid.snapshot();
        let mut fresh = BackgroundGrid::new(4, 360, BackgroundParams::default());
        assert!(fresh.restore(&snap));
        assert_eq!(fresh.fraction_settled(), grid.fraction_settled());
    }

    #[test]
    fn restore_rejects_mismatched_geometry() {
        let grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        let snap = grid.snapshot();
        let mut other = BackgroundGrid::new(8, 360, BackgroundParams::default());
        assert!(!other.restore(&snap));
    }

    #[test]
    fn restored_grid_classifies_next_frame_identically_to_original() {
        let mut grid = BackgroundGrid::new(4, 360, BackgroundParams::default());
        for t in 0..500 {
            let f = frame_with(vec![point(0, 10.0, 20.0, t), point(1, 50.0, 8.0, t)]);
            grid.classify_and_update(&f);
        }
        let snap = grid.snapshot();
        let mut restored = BackgroundGrid::new(4, 360, BackgroundParams::default());
        assert!(restored.restore(&snap));

        let next = frame_with(vec![
            point(0, 10.0, 20.02, 500),
            point(1, 50.0, 3.0, 500),
            point(2, 80.0, 12.0, 500),
        ]);
        let mask_original = grid.classify_and_update(&next);
        let mask_restored = restored.classify_and_update(&next);
        assert_eq!(mask_original, mask_restored);
    }
}
