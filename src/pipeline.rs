// SPDX-License-Identifier: Apache-2.0

//! Per-sensor pipeline orchestration: wires C1 through C8 together, the
//! way `radarpub.rs` wires its `port5`/`port63`/`cluster`/`cube` tasks
//! onto dedicated named OS threads, each driving its own single-threaded
//! `tokio` runtime (§5).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::args::SensorSpec;
use crate::background::BackgroundGrid;
use crate::config::ParameterSet;
use crate::diagnostics::{FrameStats, GridStats, HealthSummary, PipelineCounters, TrackSummary, UptimeClock};
use crate::extractor::extract_foreground;
use crate::frame::{FrameBuilder, ROTATION_TIMEOUT};
use crate::lifecycle::{LifecycleController, LifecycleParams, RegionKey};
use crate::polar::PolarFrame;
use crate::sinks::{BackgroundSnapshotSink, TrackSink, TransitSink};
use crate::tracker::{Track, TrackObs, Tracker};
use crate::transit::{promote, Transit};
use crate::world::Pose;

/// One unit of work for the sink-writer task (§6.3, §5): the frame
/// processor only ever enqueues these, never calls a sink itself.
enum SinkWork {
    Observation(Ulid, TrackObs),
    Retirement(Track),
    Transit(Transit),
    Snapshot(crate::background::BackgroundSnapshot, String, u64),
}

/// Call a fallible sink operation, retrying with exponential backoff
/// before counting a drop (§7: "retried with exponential backoff... not
/// inside the sink trait itself").
async fn call_with_retry(label: &str, counters: &PipelineCounters, mut op: impl FnMut() -> Result<(), crate::sinks::SinkError>) {
    const MAX_ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_millis(50);
    for attempt in 1..=MAX_ATTEMPTS {
        match op() {
            Ok(()) => return,
            Err(err) => {
                counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                if attempt == MAX_ATTEMPTS {
                    counters.sink_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, %label, attempt, "sink call exhausted retries, dropping");
                    return;
                }
                counters.sink_retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

async fn run_sink_writer(sinks: Arc<PipelineSinks>, rx: kanal::AsyncReceiver<SinkWork>, counters: Arc<PipelineCounters>) {
    while let Ok(work) = rx.recv().await {
        match work {
            SinkWork::Observation(track_id, obs) => {
                call_with_retry("observation", &counters, || sinks.tracks.append_observation(track_id, obs)).await;
            }
            SinkWork::Retirement(track) => {
                call_with_retry("retirement", &counters, || sinks.tracks.record_retirement(&track)).await;
            }
            SinkWork::Transit(transit) => {
                call_with_retry("transit", &counters, || sinks.transits.insert(transit.clone())).await;
            }
            SinkWork::Snapshot(snapshot, sensor_id, taken_at_ns) => {
                call_with_retry("snapshot", &counters, || sinks.snapshots.persist(&snapshot, &sensor_id, taken_at_ns)).await;
            }
        }
    }
}

/// Enqueue `work` without blocking; count a drop if the queue is full or
/// the sink-writer task is gone (§5, §7 "pipeline overload").
fn offer(sink_tx: &kanal::AsyncSender<SinkWork>, work: SinkWork, counters: &PipelineCounters) {
    match sink_tx.try_send(work) {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            counters.sink_drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Hand everything one [`ProcessOutcome`] produced to the sink-writer task.
fn dispatch_outcome(outcome: ProcessOutcome, sink_tx: &kanal::AsyncSender<SinkWork>, counters: &PipelineCounters) {
    debug!(
        points = outcome.stats.points_total,
        foreground = outcome.stats.foreground_count,
        clusters = outcome.stats.clusters_produced,
        tracks_active = outcome.stats.tracks_active,
        "frame processed"
    );
    for (track_id, obs) in outcome.observations {
        offer(sink_tx, SinkWork::Observation(track_id, obs), counters);
    }
    for transit in outcome.transits {
        offer(sink_tx, SinkWork::Transit(transit), counters);
    }
    for track in outcome.retired {
        offer(sink_tx, SinkWork::Retirement(track), counters);
    }
}

/// Everything one sensor's pipeline needs that does not change at runtime.
pub struct PipelineConfig {
    pub sensor: SensorSpec,
    pub rings: u8,
    pub azimuth_bins: u32,
    pub pose: Pose,
    pub frame_queue_capacity: usize,
    pub snapshot_interval: Duration,
    /// A snapshot to seed the background grid with at startup, if one was
    /// found and matches this config's geometry (§3 recovery contract).
    pub initial_snapshot: Option<crate::background::BackgroundSnapshot>,
}

/// Externally injected collaborators (§6.3): this crate never implements
/// these itself.
pub struct PipelineSinks {
    pub tracks: Arc<dyn TrackSink>,
    pub transits: Arc<dyn TransitSink>,
    pub snapshots: Arc<dyn BackgroundSnapshotSink>,
}

/// Everything one call to [`FrameProcessor::process`] produces for the
/// sink-writer task to dispatch. Kept separate from the hot path itself:
/// `process` never touches a sink directly (§6.3, §5).
struct ProcessOutcome {
    stats: FrameStats,
    observations: Vec<(Ulid, TrackObs)>,
    retired: Vec<crate::tracker::Track>,
    transits: Vec<crate::transit::Transit>,
}

/// Single-threaded frame-processing state, C3 through C7 (§5: "single
/// writer", lock-free on the hot path).
struct FrameProcessor {
    sensor_id: String,
    grid: BackgroundGrid,
    lifecycle: LifecycleController,
    tracker: Tracker,
    pose: Pose,
    prev_frame: Option<PolarFrame>,
    last_t_ns: Option<u64>,
}

impl FrameProcessor {
    #[instrument(level = "debug", skip(self, frame), fields(sensor = %self.sensor_id, rotation = frame.rotation_index))]
    fn process(&mut self, frame: PolarFrame, params: &ParameterSet) -> ProcessOutcome {
        self.lifecycle.tick_frame();
        let now_ns = frame.t_end_ns;
        self.lifecycle.thaw_expired(now_ns);

        let background_mask = self.grid.classify_and_update(&frame);
        for (point, &is_fg) in frame.points.iter().zip(background_mask.iter()) {
            if !is_fg {
                // Per (ring, azimuth-bin) cell, matching §4.2's
                // `fraction_cells_in(OBS_STABLE|LOCKED)` warmup gate
                // granularity, not a coarser per-ring approximation.
                self.lifecycle.observe(RegionKey {
                    sensor_id: self.sensor_id.clone(),
                    spatial_key: self.grid.cell_index(point.ring, point.azimuth_deg),
                });
            }
        }

        let foreground = extract_foreground(&frame, &background_mask, self.prev_frame.as_ref(), &params.extractor);
        let world_points = self.pose.apply_all(&foreground);
        let clusters = crate::cluster::cluster_points(&world_points, &params.cluster);

        let dt_s = match self.last_t_ns {
            Some(last) => (now_ns.saturating_sub(last)) as f32 / 1.0e9,
            None => 0.1,
        };
        self.last_t_ns = Some(now_ns);

        let grid_ready = self.lifecycle.is_grid_ready();
        let step = self.tracker.step(&clusters, now_ns, dt_s, grid_ready);

        let transits = step
            .retired
            .iter()
            .filter_map(|retired| promote(retired, &params.transit))
            .collect();

        let stats = FrameStats::new(
            frame.points.len(),
            foreground.len(),
            clusters.len(),
            self.tracker.active_tracks().len(),
            step.observations.len(),
        );

        self.prev_frame = Some(frame);
        ProcessOutcome {
            stats,
            observations: step.observations,
            retired: step.retired,
            transits,
        }
    }

    fn grid_stats(&self) -> GridStats {
        let snapshot = self.grid.snapshot();
        let mut stats = GridStats {
            total_cells: snapshot.cells.len(),
            ..GridStats::default()
        };
        for cell in &snapshot.cells {
            match cell.state {
                crate::background::CellState::Empty => stats.empty_cells += 1,
                crate::background::CellState::Learning => stats.learning_cells += 1,
                crate::background::CellState::ObsStable => stats.obs_stable_cells += 1,
                crate::background::CellState::Frozen => stats.frozen_cells += 1,
                crate::background::CellState::Locked => stats.locked_cells += 1,
            }
        }
        stats.fraction_settled = self.grid.fraction_settled();
        stats
    }

    fn track_summaries(&self) -> Vec<TrackSummary> {
        self.tracker
            .active_tracks()
            .iter()
            .map(|t| TrackSummary {
                track_id: t.track_id,
                sensor_id: t.sensor_id.clone(),
                status: t.status,
                class: t.class,
                x: t.filter.mean[0],
                y: t.filter.mean[1],
                speed_mps: (t.filter.mean[2].powi(2) + t.filter.mean[3].powi(2)).sqrt(),
                observation_count: t.observation_count,
            })
            .collect()
    }
}

/// A live handle into a running sensor pipeline: read-only diagnostic
/// accessors plus the shutdown trigger (§6.4, §5).
pub struct PipelineHandle {
    counters: Arc<PipelineCounters>,
    uptime: UptimeClock,
    frames_processed: Arc<std::sync::atomic::AtomicU64>,
    shutdown: tokio::sync::watch::Sender<bool>,
    grid_stats: Arc<Mutex<GridStats>>,
    track_summaries: Arc<Mutex<Vec<TrackSummary>>>,
    grid_ready: Arc<std::sync::atomic::AtomicBool>,
}

impl PipelineHandle {
    /// Produce a [`HealthSummary`] from the current counters.
    pub fn health(&self) -> HealthSummary {
        HealthSummary {
            uptime_s: self.uptime.elapsed().as_secs(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped_frames.load(Ordering::Relaxed),
            last_snapshot_taken_at_ns: None,
            grid_ready: self.grid_ready.load(Ordering::Relaxed),
            counters: self.counters.snapshot(),
        }
    }

    /// Most recently computed per-cell background grid stats (§6.4).
    pub fn grid_stats(&self) -> GridStats {
        *self.grid_stats.lock().expect("lock poisoned")
    }

    /// Currently active tracks, for diagnostic listing (§6.4).
    pub fn track_summaries(&self) -> Vec<TrackSummary> {
        self.track_summaries.lock().expect("lock poisoned").clone()
    }

    /// Signal the pipeline to drain, flush, snapshot and stop (§5
    /// cancellation).
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn a complete pipeline for one sensor: a reader OS thread and a
/// frame-processor OS thread, each with its own single-threaded `tokio`
/// runtime, communicating over a bounded `kanal` channel (§5).
pub fn spawn_sensor_pipeline(
    config: PipelineConfig,
    params: Arc<RwLock<ParameterSet>>,
    sinks: Arc<PipelineSinks>,
) -> std::io::Result<PipelineHandle> {
    let sensor_id = config.sensor.sensor_id.clone();
    let bind_addr = config.sensor.bind_addr.clone();
    let (tx, rx) = kanal::bounded_async(config.frame_queue_capacity.max(1));
    let counters = Arc::new(PipelineCounters::default());
    let frames_processed = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let grid_stats = Arc::new(Mutex::new(GridStats::default()));
    let track_summaries = Arc::new(Mutex::new(Vec::new()));
    let grid_ready_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let (sink_tx, sink_rx) = kanal::bounded_async::<SinkWork>(config.frame_queue_capacity.max(1) * 4);

    let writer_sinks = sinks;
    let writer_counters = counters.clone();
    let writer_sensor_id = sensor_id.clone();
    thread::Builder::new()
        .name(format!("lidar-{writer_sensor_id}-sink"))
        .spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build sink-writer runtime")
                .block_on(run_sink_writer(writer_sinks, sink_rx, writer_counters));
        })?;

    let reader_counters = counters.clone();
    let reader_bind_addr = bind_addr.clone();
    let reader_sensor_id = sensor_id.clone();
    let mut reader_shutdown = shutdown_rx.clone();
    thread::Builder::new()
        .name(format!("lidar-{reader_sensor_id}-reader"))
        .spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build reader runtime")
                .block_on(async move {
                    tokio::select! {
                        _ = crate::net::receive_packets(&reader_bind_addr, tx) => {}
                        _ = reader_shutdown.changed() => {
                            debug!(sensor = %reader_sensor_id, "reader thread shutting down");
                        }
                    }
                });
            let _ = &reader_counters;
        })?;

    let processor_sensor_id = sensor_id.clone();
    let processor_counters = counters.clone();
    let processor_frames_processed = frames_processed.clone();
    let processor_grid_stats = grid_stats.clone();
    let processor_track_summaries = track_summaries.clone();
    let processor_grid_ready = grid_ready_flag.clone();
    let processor_sink_tx = sink_tx.clone();
    let mut processor_shutdown = shutdown_rx.clone();
    thread::Builder::new()
        .name(format!("lidar-{processor_sensor_id}-processor"))
        .spawn(move || {
            let snapshot_interval = config.snapshot_interval;
            let snapshot_sink_sensor_id = processor_sensor_id.clone();
            let snapshot_sink_tx = processor_sink_tx.clone();
            let snapshot_counters = processor_counters.clone();
            let mut grid = BackgroundGrid::new(config.rings, config.azimuth_bins, params.read().expect("params lock").background);
            if let Some(snapshot) = &config.initial_snapshot {
                if grid.restore(snapshot) {
                    info!(sensor = %processor_sensor_id, "restored background grid from startup snapshot");
                } else {
                    warn!(sensor = %processor_sensor_id, "startup snapshot geometry mismatch, starting grid empty");
                }
            }
            let mut processor = FrameProcessor {
                sensor_id: processor_sensor_id.clone(),
                grid,
                lifecycle: LifecycleController::new(LifecycleParams::default()),
                tracker: Tracker::new(processor_sensor_id.clone(), params.read().expect("params lock").tracker),
                pose: config.pose,
                prev_frame: None,
                last_t_ns: None,
            };
            let mut builder = FrameBuilder::new(processor_sensor_id.clone());

            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build processor runtime")
                .block_on(async move {
                    let mut timeout_tick = tokio::time::interval(ROTATION_TIMEOUT);
                    let mut snapshot_tick = tokio::time::interval(snapshot_interval.max(Duration::from_secs(1)));
                    snapshot_tick.tick().await;
                    loop {
                        tokio::select! {
                            _ = snapshot_tick.tick() => {
                                let snap = processor.grid.snapshot();
                                let work = SinkWork::Snapshot(snap, snapshot_sink_sensor_id.clone(), processor.last_t_ns.unwrap_or(0));
                                match snapshot_sink_tx.try_send(work) {
                                    Ok(true) => { snapshot_counters.snapshot_writes.fetch_add(1, Ordering::Relaxed); }
                                    Ok(false) | Err(_) => { snapshot_counters.snapshot_drops.fetch_add(1, Ordering::Relaxed); }
                                }
                            }
                            datagram = rx.recv() => {
                                match datagram {
                                    Ok(datagram) => {
                                        if let Some(frame) = builder.push(&datagram) {
                                            let snapshot = params.read().expect("params lock").clone();
                                            processor.grid.reload_params(snapshot.background);
                                            processor.tracker.reload_params(snapshot.tracker);
                                            processor.lifecycle.reload_params(LifecycleParams {
                                                stable_observation_count: snapshot.background.stable_observation_count,
                                                warmup_min_frames: snapshot.background.warmup_min_frames,
                                                warmup_fraction: snapshot.background.warmup_fraction,
                                            });
                                            let outcome = processor.process(frame, &snapshot);
                                            dispatch_outcome(outcome, &processor_sink_tx, &processor_counters);
                                            processor_frames_processed.fetch_add(1, Ordering::Relaxed);
                                            publish_diagnostics(&processor, &processor_grid_stats, &processor_track_summaries, &processor_grid_ready);
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            _ = timeout_tick.tick() => {
                                if let Some(frame) = builder.emit_on_timeout() {
                                    warn!(sensor = %processor_sensor_id, "rotation timed out, emitting partial frame");
                                    let snapshot = params.read().expect("params lock").clone();
                                    let outcome = processor.process(frame, &snapshot);
                                    dispatch_outcome(outcome, &processor_sink_tx, &processor_counters);
                                    processor_frames_processed.fetch_add(1, Ordering::Relaxed);
                                    publish_diagnostics(&processor, &processor_grid_stats, &processor_track_summaries, &processor_grid_ready);
                                }
                            }
                            _ = processor_shutdown.changed() => {
                                info!(sensor = %processor_sensor_id, "processor thread draining before shutdown");
                                while let Ok(Some(datagram)) = rx.try_recv() {
                                    if let Some(frame) = builder.push(&datagram) {
                                        let snapshot = params.read().expect("params lock").clone();
                                        let outcome = processor.process(frame, &snapshot);
                                        dispatch_outcome(outcome, &processor_sink_tx, &processor_counters);
                                        processor_frames_processed.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                                let transit_params = params.read().expect("params lock").transit;
                                for track in processor.tracker.retire_all() {
                                    let transit = promote(&track, &transit_params);
                                    offer(&processor_sink_tx, SinkWork::Retirement(track), &processor_counters);
                                    if let Some(transit) = transit {
                                        offer(&processor_sink_tx, SinkWork::Transit(transit), &processor_counters);
                                    }
                                }
                                let final_snapshot = processor.grid.snapshot();
                                let _ = processor_sink_tx.try_send(SinkWork::Snapshot(final_snapshot, processor_sensor_id.clone(), processor.last_t_ns.unwrap_or(0)));
                                break;
                            }
                        }
                        processor_counters
                            .malformed_packets
                            .store(builder.malformed_packets(), Ordering::Relaxed);
                    }
                });
        })?;

    Ok(PipelineHandle {
        counters,
        uptime: UptimeClock::start(),
        frames_processed,
        shutdown: shutdown_tx,
        grid_stats,
        track_summaries,
        grid_ready: grid_ready_flag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundParams;
    use crate::cluster::ClusterParams;
    use crate::polar::PolarPoint;
    use crate::tracker::{TrackClass, TrackStatus, TrackerParams};
    use crate::transit::TransitParams;

    const FRAME_DT_NS: u64 = 100_000_000;

    fn processor(sensor_id: &str) -> FrameProcessor {
        FrameProcessor {
            sensor_id: sensor_id.to_string(),
            grid: BackgroundGrid::new(4, 360, BackgroundParams::default()),
            lifecycle: LifecycleController::new(LifecycleParams {
                stable_observation_count: 5,
                warmup_min_frames: 15,
                warmup_fraction: 1.0,
            }),
            tracker: Tracker::new(sensor_id.to_string(), TrackerParams::default()),
            pose: Pose::identity(sensor_id.to_string()),
            prev_frame: None,
            last_t_ns: None,
        }
    }

    /// Invert the identity pose's spherical-to-Cartesian map to place a
    /// point at a chosen world coordinate (§4.4 Transform).
    fn point_at(x: f32, y: f32, z: f32, ring: u8, t_ns: u64) -> PolarPoint {
        let r = (x * x + y * y + z * z).sqrt();
        let elevation_deg = if r > 0.0 { (z / r).asin().to_degrees() } else { 0.0 };
        let azimuth_deg = y.atan2(x).to_degrees().rem_euclid(360.0);
        PolarPoint {
            ring,
            azimuth_deg,
            elevation_deg,
            distance_m: r,
            intensity: 60,
            t_ns,
        }
    }

    fn background_point(t_ns: u64) -> PolarPoint {
        point_at(15.0, 0.0, 0.0, 3, t_ns)
    }

    fn vehicle_cluster_at(cx: f32, t_ns: u64) -> Vec<PolarPoint> {
        let mut points = Vec::new();
        for &dx in &[-0.75f32, -0.45, -0.15, 0.15, 0.45, 0.75] {
            for &dy in &[-0.1f32, 0.1] {
                points.push(point_at(cx + dx, dy, 1.0, 0, t_ns));
            }
        }
        points
    }

    fn frame_of(points: Vec<PolarPoint>, t_ns: u64, rotation_index: u64) -> PolarFrame {
        PolarFrame {
            sensor_id: "lidar-0".to_string(),
            t_start_ns: t_ns,
            t_end_ns: t_ns,
            points,
            rotation_index,
        }
    }

    fn params_for_scenario() -> ParameterSet {
        ParameterSet {
            background: BackgroundParams::default(),
            cluster: ClusterParams {
                eps_m: 2.0,
                min_points: 10,
            },
            tracker: TrackerParams::default(),
            transit: TransitParams::default(),
            ..ParameterSet::default()
        }
    }

    #[test]
    fn s1_single_vehicle_straight_line_tracks_and_promotes_transit() {
        let mut proc = processor("lidar-0");
        let params = params_for_scenario();
        let mut t_ns = 0u64;
        let mut rotation = 0u64;

        // Warmup: background point only, object absent.
        for _ in 0..20 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let frame = frame_of(vec![background_point(t_ns)], t_ns, rotation);
            proc.process(frame, &params);
        }
        assert!(proc.lifecycle.is_grid_ready());

        // 30 frames translating at 1 m/frame = 10 m/s.
        let mut last_summary_at_25 = Vec::new();
        for i in 0..30 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let mut points = vehicle_cluster_at(i as f32, t_ns);
            points.push(background_point(t_ns));
            let frame = frame_of(points, t_ns, rotation);
            proc.process(frame, &params);
            if i == 24 {
                last_summary_at_25 = proc.track_summaries();
            }
        }

        assert_eq!(proc.tracker.active_tracks().len(), 1);
        assert_eq!(last_summary_at_25.len(), 1);
        assert_eq!(last_summary_at_25[0].status, TrackStatus::Confirmed);
        assert!((last_summary_at_25[0].speed_mps - 10.0).abs() < 1.0);

        // Let the track coast out and retire.
        let mut transits = Vec::new();
        for _ in 0..6 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let frame = frame_of(vec![background_point(t_ns)], t_ns, rotation);
            let outcome = proc.process(frame, &params);
            transits.extend(outcome.transits);
        }

        assert_eq!(transits.len(), 1);
        let transit = &transits[0];
        assert_eq!(transit.class, TrackClass::Vehicle);
        assert!(transit.length_m >= 25.0, "length_m = {}", transit.length_m);
        assert!(
            (9.0..=11.0).contains(&transit.avg_speed_mps),
            "avg_speed_mps = {}",
            transit.avg_speed_mps
        );
    }

    #[test]
    fn s3_occlusion_recovery_resumes_same_track_id() {
        let mut proc = processor("lidar-0");
        let params = params_for_scenario();
        let mut t_ns = 0u64;
        let mut rotation = 0u64;

        for _ in 0..20 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let frame = frame_of(vec![background_point(t_ns)], t_ns, rotation);
            proc.process(frame, &params);
        }

        // Pre-roll: the vehicle's earliest positions sweep through grid
        // cells the background has never seen, so a handful of its points
        // get absorbed into those cells on first touch (§4.2 cold start).
        // Run that part of the trajectory unasserted before the cells it
        // settles into for the rest of the approach are fully seeded.
        for i in 0..7 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let mut points = vehicle_cluster_at(i as f32, t_ns);
            points.push(background_point(t_ns));
            proc.process(frame_of(points, t_ns, rotation), &params);
        }

        for i in 7..12 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let mut points = vehicle_cluster_at(i as f32, t_ns);
            points.push(background_point(t_ns));
            proc.process(frame_of(points, t_ns, rotation), &params);
        }
        let track_id_before = proc.tracker.active_tracks()[0].track_id;

        // Two frames with no matching cluster (occluded).
        let mut all_transits = Vec::new();
        for _ in 0..2 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let outcome = proc.process(frame_of(vec![background_point(t_ns)], t_ns, rotation), &params);
            all_transits.extend(outcome.transits);
        }
        assert_eq!(proc.tracker.active_tracks().len(), 1);
        assert!(proc.tracker.active_tracks()[0].misses > 0);

        // Reappears along the predicted trajectory: the vehicle kept moving
        // at 1 m/frame through the two occluded frames too, so the next
        // visible position picks back up three frames past the last one
        // seen (cx = 11 + 1 occluded + 1 occluded + 1 this frame = 14).
        for i in 14..17 {
            rotation += 1;
            t_ns += FRAME_DT_NS;
            let mut points = vehicle_cluster_at(i as f32, t_ns);
            points.push(background_point(t_ns));
            let outcome = proc.process(frame_of(points, t_ns, rotation), &params);
            all_transits.extend(outcome.transits);
        }

        assert_eq!(proc.tracker.active_tracks().len(), 1);
        assert_eq!(proc.tracker.active_tracks()[0].track_id, track_id_before);
        assert_eq!(proc.tracker.active_tracks()[0].misses, 0);
        assert!(all_transits.is_empty(), "no transit should have been emitted yet");
    }
}

fn publish_diagnostics(
    processor: &FrameProcessor,
    grid_stats: &Mutex<GridStats>,
    track_summaries: &Mutex<Vec<TrackSummary>>,
    grid_ready: &std::sync::atomic::AtomicBool,
) {
    *grid_stats.lock().expect("lock poisoned") = processor.grid_stats();
    *track_summaries.lock().expect("lock poisoned") = processor.track_summaries();
    grid_ready.store(processor.lifecycle.is_grid_ready(), Ordering::Relaxed);
}
