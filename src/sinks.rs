// SPDX-License-Identifier: Apache-2.0

//! Output sink traits (§6.3): the entire boundary toward the external
//! embedded database this crate feeds. This crate defines and calls these
//! traits; it does not implement an on-disk sink itself.

use std::fmt;

use crate::background::BackgroundSnapshot;
use crate::tracker::{Track, TrackObs};
use crate::transit::Transit;
use ulid::Ulid;

/// A sink call failed transiently (timeout, write error). The caller in
/// `pipeline.rs` retries with backoff before counting a drop (§7); this
/// type carries just enough for logging, not a cause chain, since a sink
/// implementation is free to wrap any underlying error it likes behind it.
#[derive(Debug, Clone)]
pub struct SinkError {
    /// Human-readable description of what failed.
    pub reason: String,
}

impl SinkError {
    /// Build a `SinkError` from a displayable cause.
    pub fn new(reason: impl Into<String>) -> Self {
        SinkError { reason: reason.into() }
    }
}

impl std::error::Error for SinkError {}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sink error: {}", self.reason)
    }
}

/// Receives per-frame track observations and retirements.
///
/// None of these calls are in the hot path: the pipeline calls them from a
/// dedicated task and must not block the frame processor on them (§6.3).
/// A `Err` return is treated as transient by the caller, which retries with
/// exponential backoff before giving up and counting a drop (§7).
pub trait TrackSink: Send + Sync {
    /// Append one observation for an active track.
    fn append_observation(&self, track_id: Ulid, obs: TrackObs) -> Result<(), SinkError>;
    /// Record a track's final state at retirement.
    fn record_retirement(&self, track: &Track) -> Result<(), SinkError>;
}

/// Receives completed transit records.
pub trait TransitSink: Send + Sync {
    /// Insert one completed transit.
    fn insert(&self, transit: Transit) -> Result<(), SinkError>;
}

/// Receives periodic background-grid snapshots.
pub trait BackgroundSnapshotSink: Send + Sync {
    /// Persist one snapshot. `taken_at_ns` is the sensor-clock time the
    /// snapshot was taken, not wall-clock time.
    fn persist(&self, snapshot: &BackgroundSnapshot, sensor_id: &str, taken_at_ns: u64) -> Result<(), SinkError>;
}

/// In-memory sink implementations for local development and tooling
/// (§6.3). Not gated by `#[cfg(test)]`: these back the diagnostic binary
/// and any example that wants a runnable pipeline without an external
/// database.
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    /// `Vec`/`HashMap`-backed [`TrackSink`].
    #[derive(Default)]
    pub struct MemoryTrackSink {
        observations: Mutex<Vec<(Ulid, TrackObs)>>,
        retirements: Mutex<Vec<Ulid>>,
    }

    impl MemoryTrackSink {
        /// Create an empty sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of all observations recorded so far.
        pub fn observations(&self) -> Vec<(Ulid, TrackObs)> {
            self.observations.lock().expect("lock poisoned").clone()
        }

        /// Ids of all tracks retired so far.
        pub fn retired_ids(&self) -> Vec<Ulid> {
            self.retirements.lock().expect("lock poisoned").clone()
        }
    }

    impl TrackSink for MemoryTrackSink {
        fn append_observation(&self, track_id: Ulid, obs: TrackObs) -> Result<(), SinkError> {
            self.observations
                .lock()
                .expect("lock poisoned")
                .push((track_id, obs));
            Ok(())
        }

        fn record_retirement(&self, track: &Track) -> Result<(), SinkError> {
            self.retirements.lock().expect("lock poisoned").push(track.track_id);
            Ok(())
        }
    }

    /// `Vec`-backed [`TransitSink`].
    #[derive(Default)]
    pub struct MemoryTransitSink {
        transits: Mutex<Vec<Transit>>,
    }

    impl MemoryTransitSink {
        /// Create an empty sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// All transits recorded so far, in insertion order.
        pub fn transits(&self) -> Vec<Transit> {
            self.transits.lock().expect("lock poisoned").clone()
        }
    }

    impl TransitSink for MemoryTransitSink {
        fn insert(&self, transit: Transit) -> Result<(), SinkError> {
            self.transits.lock().expect("lock poisoned").push(transit);
            Ok(())
        }
    }

    /// `HashMap`-backed [`BackgroundSnapshotSink`], keyed by sensor id,
    /// keeping only the most recent snapshot per sensor.
    #[derive(Default)]
    pub struct MemorySnapshotSink {
        latest: Mutex<std::collections::HashMap<String, (BackgroundSnapshot, u64)>>,
    }

    impl MemorySnapshotSink {
        /// Create an empty sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// The most recently persisted snapshot for `sensor_id`, if any.
        pub fn latest_for(&self, sensor_id: &str) -> Option<(BackgroundSnapshot, u64)> {
            self.latest.lock().expect("lock poisoned").get(sensor_id).cloned()
        }
    }

    impl BackgroundSnapshotSink for MemorySnapshotSink {
        fn persist(&self, snapshot: &BackgroundSnapshot, sensor_id: &str, taken_at_ns: u64) -> Result<(), SinkError> {
            self.latest
                .lock()
                .expect("lock poisoned")
                .insert(sensor_id.to_string(), (snapshot.clone(), taken_at_ns));
            Ok(())
        }
    }
}

/// File-backed [`BackgroundSnapshotSink`] (§3 "restored from the latest
/// valid snapshot"): one `bincode`-encoded file per sensor under a
/// configured directory, overwritten on each persist so the file on disk
/// is always the latest.
pub mod file {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::*;

    /// Writes periodic snapshots to `{dir}/{sensor_id}.snapshot`.
    pub struct FileSnapshotSink {
        dir: PathBuf,
    }

    impl FileSnapshotSink {
        /// Create a sink writing into `dir`, creating it if missing.
        pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
            let dir = dir.into();
            fs::create_dir_all(&dir)?;
            Ok(FileSnapshotSink { dir })
        }

        fn path_for(dir: &Path, sensor_id: &str) -> PathBuf {
            dir.join(format!("{sensor_id}.snapshot"))
        }

        /// Read the most recently persisted snapshot for `sensor_id` from
        /// `dir`, if a snapshot file exists there. Used at startup, before
        /// any [`FileSnapshotSink`] is constructed, so it takes `dir`
        /// directly rather than `&self`.
        pub fn load_latest(dir: &Path, sensor_id: &str) -> std::io::Result<Option<BackgroundSnapshot>> {
            let path = Self::path_for(dir, sensor_id);
            if !path.exists() {
                return Ok(None);
            }
            let bytes = fs::read(&path)?;
            let snapshot = bincode::deserialize(&bytes)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
            Ok(Some(snapshot))
        }
    }

    impl BackgroundSnapshotSink for FileSnapshotSink {
        fn persist(&self, snapshot: &BackgroundSnapshot, sensor_id: &str, _taken_at_ns: u64) -> Result<(), SinkError> {
            let bytes = bincode::serialize(snapshot).map_err(|err| SinkError::new(err.to_string()))?;
            fs::write(Self::path_for(&self.dir, sensor_id), bytes).map_err(|err| SinkError::new(err.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn persisted_snapshot_round_trips_through_load_latest() {
            let dir = test_dir("round-trip");
            let sink = FileSnapshotSink::new(&dir).unwrap();
            let snap = crate::background::BackgroundGrid::new(
                4,
                360,
                crate::background::BackgroundParams::default(),
            )
            .snapshot();
            sink.persist(&snap, "lidar-0", 42).unwrap();

            let loaded = FileSnapshotSink::load_latest(&dir, "lidar-0").unwrap().unwrap();
            assert_eq!(loaded.rings, snap.rings);
            assert_eq!(loaded.azimuth_bins, snap.azimuth_bins);
            assert_eq!(loaded.cells.len(), snap.cells.len());

            fs::remove_dir_all(&dir).ok();
        }

        #[test]
        fn load_latest_returns_none_when_no_file_exists() {
            let dir = test_dir("missing");
            assert!(FileSnapshotSink::load_latest(&dir, "lidar-0").unwrap().is_none());
        }

        fn test_dir(label: &str) -> PathBuf {
            std::env::temp_dir().join(format!("lidarfusion-sink-test-{label}-{}", std::process::id()))
        }
    }
}

#[cfg(test)]
pub mod testutil {
    //! Thin re-export of [`memory`] for test call sites that want the
    //! historical `testutil::` spelling used elsewhere in this crate's
    //! test suites.
    pub use super::memory::{MemorySnapshotSink, MemoryTrackSink, MemoryTransitSink};
}

#[cfg(test)]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::kalman::{ConstantVelocityModel, NoiseParams};
    use crate::tracker::TrackStatus;
    use std::collections::VecDeque;

    #[test]
    fn memory_track_sink_records_observations_and_retirements() {
        let sink = MemoryTrackSink::new();
        let id = Ulid::new();
        let obs = TrackObs {
            t_ns: 1,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            speed_mps: 0.0,
            bbox: (1.0, 1.0, 1.0),
            height_p95: 1.0,
            heading_deg: 0.0,
        };
        sink.append_observation(id, obs).unwrap();
        assert_eq!(sink.observations().len(), 1);

        let track = Track {
            track_id: id,
            sensor_id: "lidar-0".to_string(),
            filter: ConstantVelocityModel::new(0.0, 0.0, None, NoiseParams::default()),
            last_t_ns: 1,
            observation_count: 1,
            misses: 0,
            status: TrackStatus::Retired,
            class: crate::tracker::TrackClass::Unknown,
            history: VecDeque::new(),
            consecutive_stopped_frames: 0,
        };
        sink.record_retirement(&track).unwrap();
        assert_eq!(sink.retired_ids(), vec![id]);
    }

    #[test]
    fn memory_snapshot_sink_keeps_latest_per_sensor() {
        let sink = MemorySnapshotSink::new();
        let snap = crate::background::BackgroundGrid::new(
            4,
            360,
            crate::background::BackgroundParams::default(),
        )
        .snapshot();
        sink.persist(&snap, "lidar-0", 10).unwrap();
        sink.persist(&snap, "lidar-0", 20).unwrap();
        let (_, taken_at) = sink.latest_for("lidar-0").unwrap();
        assert_eq!(taken_at, 20);
        assert!(sink.latest_for("lidar-1").is_none());
    }
}
