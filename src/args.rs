// SPDX-License-Identifier: Apache-2.0

//! Static process configuration (§1.1): ports, sensor geometry and
//! tuning defaults, read once at startup from flags and environment
//! variables. The live-reloadable tuning knobs live in [`crate::config`]
//! instead.

use std::{fmt, io};

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Errors constructing process configuration from parsed arguments.
#[derive(Debug)]
pub enum Error {
    /// Failed to read a file named by an argument (e.g. a snapshot or
    /// pose file).
    Io(io::Error),
    /// `--log-level` did not name a recognized level.
    InvalidLogLevel(String),
    /// `--sensor` entries did not parse as `id@host:port`.
    InvalidSensorSpec(String),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::InvalidLogLevel(value) => write!(f, "invalid log level: {value}"),
            Error::InvalidSensorSpec(value) => {
                write!(f, "invalid sensor spec (want id@bind_addr): {value}")
            }
        }
    }
}

/// One configured sensor: its id and the UDP address to bind for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSpec {
    /// Sensor id, used to tag frames and tracks.
    pub sensor_id: String,
    /// UDP bind address, e.g. `"0.0.0.0:2368"`.
    pub bind_addr: String,
}

impl std::str::FromStr for SensorSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| Error::InvalidSensorSpec(s.to_string()))?;
        if id.is_empty() || addr.is_empty() {
            return Err(Error::InvalidSensorSpec(s.to_string()));
        }
        Ok(SensorSpec {
            sensor_id: id.to_string(),
            bind_addr: addr.to_string(),
        })
    }
}

/// Static process configuration for the `lidarfusion` pipeline binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "lidarfusion", version, about = "LIDAR perception pipeline for traffic monitoring")]
pub struct Args {
    /// One or more sensors to run a pipeline for, as `id@bind_addr`
    /// (e.g. `north@0.0.0.0:2368`). Repeatable.
    #[arg(long, env = "LIDARFUSION_SENSOR", required = true)]
    pub sensor: Vec<SensorSpec>,

    /// Number of laser rings the background grid and decoder expect.
    #[arg(long, env = "LIDARFUSION_RINGS", default_value_t = 40)]
    pub rings: u8,

    /// Number of azimuth bins in the background grid.
    #[arg(long, env = "LIDARFUSION_AZIMUTH_BINS", default_value_t = 1800)]
    pub azimuth_bins: u32,

    /// Path to a JSON file with the initial live-tunable parameter set
    /// (§6.2). If omitted, compiled-in defaults are used.
    #[arg(long, env = "LIDARFUSION_PARAMS_FILE")]
    pub params_file: Option<std::path::PathBuf>,

    /// Directory to read the most recent background-grid snapshot from at
    /// startup, and to write periodic snapshots to.
    #[arg(long, env = "LIDARFUSION_SNAPSHOT_DIR")]
    pub snapshot_dir: Option<std::path::PathBuf>,

    /// Interval between background-grid snapshots, seconds.
    #[arg(long, env = "LIDARFUSION_SNAPSHOT_INTERVAL_S", default_value_t = 300)]
    pub snapshot_interval_s: u64,

    /// Capacity of the bounded frame queue between the packet reader and
    /// the frame processor, per sensor.
    #[arg(long, env = "LIDARFUSION_FRAME_QUEUE_CAPACITY", default_value_t = 8)]
    pub frame_queue_capacity: usize,

    /// Minimum level for the stdout logging layer.
    #[arg(long, env = "LIDARFUSION_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Minimum level for the journald logging layer (Linux only).
    #[arg(long, env = "LIDARFUSION_JOURNALD_LOG_LEVEL", default_value = "warn")]
    pub journald_log_level: String,
}

impl Args {
    /// Parse `--log-level` into a [`LevelFilter`].
    pub fn log_level_filter(&self) -> Result<LevelFilter, Error> {
        self.log_level
            .parse()
            .map_err(|_| Error::InvalidLogLevel(self.log_level.clone()))
    }

    /// Parse `--journald-log-level` into a [`LevelFilter`].
    pub fn journald_log_level_filter(&self) -> Result<LevelFilter, Error> {
        self.journald_log_level
            .parse()
            .map_err(|_| Error::InvalidLogLevel(self.journald_log_level.clone()))
    }
}

/// Static configuration for the `lidarfusionctl` diagnostic binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "lidarfusionctl", version, about = "Offline inspection and control for a running lidarfusion pipeline")]
pub struct CtlArgs {
    /// Print current health summary and exit.
    #[arg(long)]
    pub status: bool,

    /// Path to a background-grid snapshot file to inspect.
    #[arg(long)]
    pub inspect_snapshot: Option<std::path::PathBuf>,

    /// Path to a JSON parameter-update document to validate and print the
    /// resulting parameter set for, without applying it to a live
    /// process.
    #[arg(long)]
    pub dry_run_params: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn sensor_spec_parses_id_and_addr() {
        let spec = SensorSpec::from_str("north@0.0.0.0:2368").unwrap();
        assert_eq!(spec.sensor_id, "north");
        assert_eq!(spec.bind_addr, "0.0.0.0:2368");
    }

    #[test]
    fn sensor_spec_rejects_missing_separator() {
        assert!(SensorSpec::from_str("north-0.0.0.0:2368").is_err());
    }

    #[test]
    fn sensor_spec_rejects_empty_id() {
        assert!(SensorSpec::from_str("@0.0.0.0:2368").is_err());
    }
}
