// SPDX-License-Identifier: Apache-2.0

//! Polar point and frame types produced by the packet decoder and frame
//! builder (C1/C2).

/// A single laser return in sensor-native polar coordinates.
///
/// Owned by the [`PolarFrame`] that contains it; never shared across frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarPoint {
    /// Laser ring index, `0..ring_count`.
    pub ring: u8,
    /// Horizontal angle in degrees, `[0, 360)`.
    pub azimuth_deg: f32,
    /// Fixed elevation angle for this ring, in degrees.
    pub elevation_deg: f32,
    /// Range in meters.
    pub distance_m: f32,
    /// Return intensity, 0-255.
    pub intensity: u8,
    /// Capture time in nanoseconds, sensor clock.
    pub t_ns: u64,
}

impl PolarPoint {
    /// True if any field is non-finite and the point must be dropped before
    /// reaching the background grid (§4.2 edge cases).
    pub fn is_malformed(&self) -> bool {
        !self.distance_m.is_finite()
            || !self.azimuth_deg.is_finite()
            || !self.elevation_deg.is_finite()
            || self.distance_m < 0.0
    }
}

/// One full 360 degree rotation's worth of returns.
///
/// Produced once by the frame builder (C2), consumed once by C3/C4, then
/// dropped.
#[derive(Debug, Clone)]
pub struct PolarFrame {
    /// Identifies which physical sensor produced this frame.
    pub sensor_id: String,
    /// Timestamp of the first packet contributing to this frame.
    pub t_start_ns: u64,
    /// Timestamp of the last packet contributing to this frame.
    pub t_end_ns: u64,
    /// Returns in insertion order.
    pub points: Vec<PolarPoint>,
    /// Monotonically increasing per sensor.
    pub rotation_index: u64,
}

impl PolarFrame {
    /// Number of points in this frame.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if this frame carries no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
