// SPDX-License-Identifier: Apache-2.0

//! Diagnostic surface (§6.4, §3.1): plain, `serde`-serializable snapshots
//! of pipeline state. The core's obligation ends at producing these
//! structures through read-only accessors; it does not serve them over any
//! transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::tracker::{TrackClass, TrackStatus};

/// Monotonic counters for the error taxonomy in §7.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub malformed_packets: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub sink_failures: AtomicU64,
    pub sink_retries: AtomicU64,
    pub sink_drops: AtomicU64,
    pub snapshot_writes: AtomicU64,
    pub snapshot_drops: AtomicU64,
}

impl PipelineCounters {
    /// Take a point-in-time, plain-value copy for serialization.
    pub fn snapshot(&self) -> PipelineCountersSnapshot {
        PipelineCountersSnapshot {
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            sink_drops: self.sink_drops.load(Ordering::Relaxed),
            snapshot_writes: self.snapshot_writes.load(Ordering::Relaxed),
            snapshot_drops: self.snapshot_drops.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`PipelineCounters`] at one instant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineCountersSnapshot {
    pub malformed_packets: u64,
    pub dropped_frames: u64,
    pub sink_failures: u64,
    pub sink_retries: u64,
    pub sink_drops: u64,
    pub snapshot_writes: u64,
    pub snapshot_drops: u64,
}

/// Grid-wide health summary (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub uptime_s: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub last_snapshot_taken_at_ns: Option<u64>,
    pub grid_ready: bool,
    pub counters: PipelineCountersSnapshot,
}

/// Per-frame diagnostic counters (§6.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FrameStats {
    pub points_total: usize,
    pub foreground_count: usize,
    pub foreground_fraction: f32,
    pub clusters_produced: usize,
    pub tracks_active: usize,
    pub assignments_made: usize,
}

impl FrameStats {
    /// Build from raw counts, computing the derived foreground fraction.
    pub fn new(
        points_total: usize,
        foreground_count: usize,
        clusters_produced: usize,
        tracks_active: usize,
        assignments_made: usize,
    ) -> Self {
        let foreground_fraction = if points_total == 0 {
            0.0
        } else {
            foreground_count as f32 / points_total as f32
        };
        FrameStats {
            points_total,
            foreground_count,
            foreground_fraction,
            clusters_produced,
            tracks_active,
            assignments_made,
        }
    }
}

/// Per-cell background grid stats (§6.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GridStats {
    pub total_cells: usize,
    pub empty_cells: usize,
    pub learning_cells: usize,
    pub obs_stable_cells: usize,
    pub frozen_cells: usize,
    pub locked_cells: usize,
    pub fraction_settled: f32,
}

/// A single track's current state, for the diagnostic track list (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub track_id: Ulid,
    pub sensor_id: String,
    pub status: TrackStatus,
    pub class: TrackClass,
    pub x: f32,
    pub y: f32,
    pub speed_mps: f32,
    pub observation_count: u64,
}

/// Tracks process uptime for [`HealthSummary`].
pub struct UptimeClock {
    started: std::time::Instant,
}

impl UptimeClock {
    /// Start the clock now.
    pub fn start() -> Self {
        UptimeClock {
            started: std::time::Instant::now(),
        }
    }

    /// Elapsed time since [`UptimeClock::start`].
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stats_computes_fraction() {
        let stats = FrameStats::new(100, 25, 3, 5, 4);
        assert!((stats.foreground_fraction - 0.25).abs() < 1e-6);
    }

    #[test]
    fn frame_stats_handles_zero_points() {
        let stats = FrameStats::new(0, 0, 0, 0, 0);
        assert_eq!(stats.foreground_fraction, 0.0);
    }

    #[test]
    fn counters_snapshot_reflects_updates() {
        let counters = PipelineCounters::default();
        counters.malformed_packets.fetch_add(3, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.malformed_packets, 3);
    }
}
