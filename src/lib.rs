// SPDX-License-Identifier: Apache-2.0

//! `lidarfusion`: a LIDAR perception pipeline for traffic monitoring.
//!
//! Raw UDP packets from one or more fixed LIDAR sensors are decoded,
//! assembled into rotations, classified against a per-cell background
//! model, clustered into candidate objects and tracked across frames with
//! a constant-velocity Kalman filter and Hungarian assignment. Completed
//! tracks that look like a real transit of the scene are promoted and
//! handed to caller-supplied sinks (§6.3); this crate never opens a
//! database connection itself.
//!
//! The pipeline stages, in order:
//!
//! - [`decode`] / [`frame`] (C1/C2): wire decoding and rotation assembly.
//! - [`background`] (C3): the polar background grid.
//! - [`extractor`] (C4): background/velocity/hybrid foreground extraction.
//! - [`world`] / [`cluster`] (C5): world-frame transform and DBSCAN.
//! - [`kalman`] / [`tracker`] (C6): per-object Kalman filters and
//!   Mahalanobis-gated Hungarian assignment.
//! - [`transit`] (C7): retired-track quality scoring and promotion.
//! - [`lifecycle`] (C8): shared warmup/freeze/lock state machine.
//!
//! [`pipeline`] wires these into a runnable per-sensor task; [`config`] is
//! the live-reloadable tuning surface; [`sinks`] is the output boundary;
//! [`diagnostics`] is the read-only health/inspection surface.

#![warn(missing_docs)]

/// Static process configuration: CLI flags and environment variables.
pub mod args;

/// Polar background grid (C3).
pub mod background;

/// Density clustering of world-frame points (C5b).
pub mod cluster;

/// Real-time scheduling and socket-buffer posture helpers.
pub mod common;

/// Live-tunable pipeline parameters (§6.2).
pub mod config;

/// LIDAR UDP packet decoder (C1).
pub mod decode;

/// Diagnostic snapshots (§6.4).
pub mod diagnostics;

/// Distance-adaptive foreground extraction (C4).
pub mod extractor;

/// Rotation assembly from decoded packets (C2).
pub mod frame;

/// Constant-velocity Kalman filter (C6a).
pub mod kalman;

/// Grid-wide warmup/freeze/lock state machine (C8).
pub mod lifecycle;

/// UDP packet reception.
pub mod net;

/// Per-sensor pipeline orchestration.
pub mod pipeline;

/// Polar point and frame types shared across C1-C4.
pub mod polar;

/// Output sink traits and in-memory reference implementations (§6.3).
pub mod sinks;

/// Multi-object tracker: Hungarian assignment over Kalman filters (C6b).
pub mod tracker;

/// Retired-track quality scoring and transit promotion (C7).
pub mod transit;

/// Sensor pose and the sensor-to-world coordinate transform (C5a).
pub mod world;
