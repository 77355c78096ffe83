// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use clap::Parser;
use lidarfusion::args::Args;
use lidarfusion::background::BackgroundSnapshot;
use lidarfusion::config::ParameterSet;
use lidarfusion::pipeline::{spawn_sensor_pipeline, PipelineConfig, PipelineSinks};
use lidarfusion::sinks::file::FileSnapshotSink;
use lidarfusion::sinks::memory::{MemorySnapshotSink, MemoryTrackSink, MemoryTransitSink};
use lidarfusion::sinks::BackgroundSnapshotSink;
use lidarfusion::world::Pose;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.log_level_filter()?);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.journald_log_level_filter()?)),
        Err(_) => None,
    };

    let subscriber = Registry::default().with(stdout_log).with(journald);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    tracing_log::LogTracer::init()?;

    let params = load_params(&args)?;
    let params = Arc::new(RwLock::new(params));

    let snapshot_sink: Arc<dyn BackgroundSnapshotSink> = match &args.snapshot_dir {
        Some(dir) => Arc::new(FileSnapshotSink::new(dir)?),
        None => Arc::new(MemorySnapshotSink::new()),
    };
    let sinks = Arc::new(PipelineSinks {
        tracks: Arc::new(MemoryTrackSink::new()),
        transits: Arc::new(MemoryTransitSink::new()),
        snapshots: snapshot_sink,
    });

    let mut handles = Vec::new();
    for sensor in &args.sensor {
        info!(sensor = %sensor.sensor_id, bind_addr = %sensor.bind_addr, "starting sensor pipeline");
        let initial_snapshot = load_initial_snapshot(&args, &sensor.sensor_id);
        let config = PipelineConfig {
            sensor: sensor.clone(),
            rings: args.rings,
            azimuth_bins: args.azimuth_bins,
            pose: Pose::identity(sensor.sensor_id.clone()),
            frame_queue_capacity: args.frame_queue_capacity,
            snapshot_interval: Duration::from_secs(args.snapshot_interval_s),
            initial_snapshot,
        };
        let handle = spawn_sensor_pipeline(config, params.clone(), sinks.clone())?;
        handles.push((sensor.sensor_id.clone(), handle));
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, draining sensor pipelines");
    for (sensor_id, handle) in &handles {
        info!(sensor = %sensor_id, "signaling shutdown");
        handle.shutdown();
    }

    Ok(())
}

/// Read `sensor_id`'s most recent snapshot from `--snapshot-dir`, if one was
/// configured and a file for this sensor exists there (§3 recovery
/// contract). A read failure is logged and treated as "no snapshot", not a
/// startup error: the grid still starts (empty) and warms up normally.
fn load_initial_snapshot(args: &Args, sensor_id: &str) -> Option<BackgroundSnapshot> {
    let dir = args.snapshot_dir.as_ref()?;
    match FileSnapshotSink::load_latest(dir, sensor_id) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(sensor = %sensor_id, %err, "failed to read startup snapshot, starting grid empty");
            None
        }
    }
}

fn load_params(args: &Args) -> Result<ParameterSet, Box<dyn std::error::Error>> {
    let Some(path) = &args.params_file else {
        return Ok(ParameterSet::default());
    };
    let contents = fs::read_to_string(path)?;
    let updates: serde_json::Value = serde_json::from_str(&contents)?;
    let mut params = ParameterSet::default();
    if let Err(err) = params.apply_update(&updates) {
        error!(%err, path = %path.display(), "rejecting invalid parameter file");
        return Err(Box::new(err));
    }
    Ok(params)
}
