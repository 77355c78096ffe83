// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller (C8): shared warmup/freeze/lock state machine that
//! gates C3 and C6 until enough observations have accumulated.

use std::collections::HashMap;
use std::time::Duration;

/// Grid-wide lifecycle state, mirroring [`crate::background::CellState`] at
/// the granularity the tracker (C6) cares about: "is it safe to trust this
/// region of the grid yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No observations yet for this spatial key.
    Empty,
    /// Accumulating observations.
    Learning,
    /// Enough observations to trust classification and confirm tracks.
    ObsStable,
    /// Promoted: behaves like `ObsStable` but does not regress.
    Locked,
}

/// A transient overlay independent of `Stage`: a region can be frozen while
/// in any non-`Empty` stage, and thaws back to its prior stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    /// Not frozen.
    Thawed,
    /// Frozen until the given deadline (nanoseconds, sensor clock).
    Frozen(u64),
}

/// Identifies one region this controller tracks: a sensor and a spatial key
/// within it, chosen by the caller. The pipeline keys this by flat
/// (ring, azimuth-bin) cell index to match §4.2's warmup gate granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    /// Sensor this region belongs to.
    pub sensor_id: String,
    /// Caller-defined spatial key, opaque to this module.
    pub spatial_key: u32,
}

struct RegionState {
    stage: Stage,
    freeze: FreezeState,
    observation_count: u64,
}

impl Default for RegionState {
    fn default() -> Self {
        RegionState {
            stage: Stage::Empty,
            freeze: FreezeState::Thawed,
            observation_count: 0,
        }
    }
}

/// Tuning knobs for stage transitions, shared with the analogous fields in
/// [`crate::background::BackgroundParams`] so the two stay consistent.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleParams {
    /// Observations required to leave `Learning` for `ObsStable`.
    pub stable_observation_count: u64,
    /// Minimum frames since pipeline start before grid-wide warmup can
    /// complete.
    pub warmup_min_frames: u64,
    /// Fraction of regions that must reach `ObsStable`/`Locked` before
    /// grid-wide warmup completes.
    pub warmup_fraction: f32,
}

impl Default for LifecycleParams {
    fn default() -> Self {
        LifecycleParams {
            stable_observation_count: 30,
            warmup_min_frames: 50,
            warmup_fraction: 0.8,
        }
    }
}

/// Shared state machine governing grid-wide warmup and per-region
/// freeze/lock lifecycle (§4.7).
///
/// Both the background grid (C3) and the tracker (C6) read
/// [`LifecycleController::is_grid_ready`]; C6 must not confirm new tracks
/// while the grid is not yet ready.
pub struct LifecycleController {
    params: LifecycleParams,
    regions: HashMap<RegionKey, RegionState>,
    frames_seen: u64,
}

impl LifecycleController {
    /// Create a controller with the given tuning parameters.
    pub fn new(params: LifecycleParams) -> Self {
        LifecycleController {
            params,
            regions: HashMap::new(),
            frames_seen: 0,
        }
    }

    /// Replace tuning parameters at a frame boundary.
    pub fn reload_params(&mut self, params: LifecycleParams) {
        self.params = params;
    }

    /// Record that one more frame has been processed, advancing the
    /// grid-wide frame counter used by the warmup timeout gate.
    pub fn tick_frame(&mut self) {
        self.frames_seen += 1;
    }

    /// Record a background observation for `key`, advancing its stage.
    pub fn observe(&mut self, key: RegionKey) {
        let region = self.regions.entry(key).or_default();
        if matches!(region.freeze, FreezeState::Frozen(_)) {
            return;
        }
        region.observation_count += 1;
        if region.stage == Stage::Empty || region.stage == Stage::Learning {
            region.stage = if region.observation_count >= self.params.stable_observation_count {
                Stage::ObsStable
            } else {
                Stage::Learning
            };
        }
    }

    /// Freeze `key` until `now_ns + duration`.
    pub fn freeze(&mut self, key: RegionKey, now_ns: u64, duration: Duration) {
        let region = self.regions.entry(key).or_default();
        region.freeze = FreezeState::Frozen(now_ns + duration.as_nanos() as u64);
    }

    /// Thaw any region whose freeze deadline has passed as of `now_ns`.
    pub fn thaw_expired(&mut self, now_ns: u64) {
        for region in self.regions.values_mut() {
            if let FreezeState::Frozen(until) = region.freeze {
                if now_ns >= until {
                    region.freeze = FreezeState::Thawed;
                }
            }
        }
    }

    /// Promote an `ObsStable` region to `Locked`. No-op for any other
    /// stage, matching §3's monotonic-until-reset invariant.
    pub fn lock(&mut self, key: RegionKey) {
        if let Some(region) = self.regions.get_mut(&key) {
            if region.stage == Stage::ObsStable {
                region.stage = Stage::Locked;
            }
        }
    }

    /// Current stage for `key`, or `Empty` if never observed.
    pub fn stage(&self, key: &RegionKey) -> Stage {
        self.regions.get(key).map(|r| r.stage).unwrap_or(Stage::Empty)
    }

    /// Current freeze state for `key`.
    pub fn freeze_state(&self, key: &RegionKey) -> FreezeState {
        self.regions
            .get(key)
            .map(|r| r.freeze)
            .unwrap_or(FreezeState::Thawed)
    }

    /// Fraction of known regions in `ObsStable` or `Locked`.
    pub fn fraction_settled(&self) -> f32 {
        if self.regions.is_empty() {
            return 0.0;
        }
        let settled = self
            .regions
            .values()
            .filter(|r| matches!(r.stage, Stage::ObsStable | Stage::Locked))
            .count();
        settled as f32 / self.regions.len() as f32
    }

    /// Whether the grid as a whole is ready for C6 to confirm new tracks
    /// (§4.2 warmup policy, §4.7).
    pub fn is_grid_ready(&self) -> bool {
        self.frames_seen >= self.params.warmup_min_frames
            && self.fraction_settled() >= self.params.warmup_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(spatial: u32) -> RegionKey {
        RegionKey {
            sensor_id: "lidar-0".to_string(),
            spatial_key: spatial,
        }
    }

    #[test]
    fn region_progresses_from_empty_to_obs_stable() {
        let mut ctl = LifecycleController::new(LifecycleParams {
            stable_observation_count: 3,
            ..LifecycleParams::default()
        });
        let k = key(0);
        assert_eq!(ctl.stage(&k), Stage::Empty);
        ctl.observe(k.clone());
        assert_eq!(ctl.stage(&k), Stage::Learning);
        ctl.observe(k.clone());
        ctl.observe(k.clone());
        assert_eq!(ctl.stage(&k), Stage::ObsStable);
    }

    #[test]
    fn frozen_region_does_not_advance_on_observe() {
        let mut ctl = LifecycleController::new(LifecycleParams::default());
        let k = key(0);
        ctl.freeze(k.clone(), 0, Duration::from_secs(1));
        ctl.observe(k.clone());
        assert_eq!(ctl.stage(&k), Stage::Empty);
    }

    #[test]
    fn thaw_expired_clears_past_deadline_only() {
        let mut ctl = LifecycleController::new(LifecycleParams::default());
        let k = key(0);
        ctl.freeze(k.clone(), 0, Duration::from_nanos(100));
        ctl.thaw_expired(50);
        assert_eq!(ctl.freeze_state(&k), FreezeState::Frozen(100));
        ctl.thaw_expired(100);
        assert_eq!(ctl.freeze_state(&k), FreezeState::Thawed);
    }

    #[test]
    fn lock_only_promotes_from_obs_stable() {
        let mut ctl = LifecycleController::new(LifecycleParams {
            stable_observation_count: 1,
            ..LifecycleParams::default()
        });
        let k = key(0);
        ctl.lock(k.clone());
        assert_eq!(ctl.stage(&k), Stage::Empty);
        ctl.observe(k.clone());
        assert_eq!(ctl.stage(&k), Stage::ObsStable);
        ctl.lock(k.clone());
        assert_eq!(ctl.stage(&k), Stage::Locked);
    }

    #[test]
    fn grid_ready_requires_both_frame_count_and_fraction() {
        let mut ctl = LifecycleController::new(LifecycleParams {
            stable_observation_count: 1,
            warmup_min_frames: 2,
            warmup_fraction: 1.0,
        });
        ctl.observe(key(0));
        assert!(!ctl.is_grid_ready());
        ctl.tick_frame();
        ctl.tick_frame();
        assert!(ctl.is_grid_ready());
    }
}
