// SPDX-License-Identifier: Apache-2.0

//! Frame builder (C2): accumulates decoded packets into full rotations.

use std::time::Duration;

use crate::decode::decode_packet;
use crate::polar::{PolarFrame, PolarPoint};

/// Hard timeout before an incomplete rotation is emitted anyway (§4.1).
pub const ROTATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Azimuth decrease threshold used to detect a rotation wrap.
const DEFAULT_ROTATION_SPLIT_DEG: f32 = 180.0;

/// Accumulates per-ring returns across packets until a full rotation is
/// assembled, then emits one [`PolarFrame`].
///
/// Single writer per sensor; owns all points until they are handed to the
/// caller inside an emitted frame.
pub struct FrameBuilder {
    sensor_id: String,
    rotation_split_deg: f32,
    points: Vec<PolarPoint>,
    last_azimuth_deg: Option<f32>,
    t_start_ns: Option<u64>,
    t_end_ns: u64,
    rotation_index: u64,
    malformed_packets: u64,
    timed_out_rotations: u64,
}

impl FrameBuilder {
    /// Create a new builder for `sensor_id`, with `rotation_index` starting
    /// at zero (the first emitted frame carries index 1).
    pub fn new(sensor_id: impl Into<String>) -> Self {
        FrameBuilder {
            sensor_id: sensor_id.into(),
            rotation_split_deg: DEFAULT_ROTATION_SPLIT_DEG,
            points: Vec::new(),
            last_azimuth_deg: None,
            t_start_ns: None,
            t_end_ns: 0,
            rotation_index: 0,
            malformed_packets: 0,
            timed_out_rotations: 0,
        }
    }

    /// Override the azimuth-decrease threshold used to detect a wrap.
    pub fn with_rotation_split_deg(mut self, deg: f32) -> Self {
        self.rotation_split_deg = deg;
        self
    }

    /// Number of packets dropped for failing to decode.
    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets
    }

    /// Number of rotations emitted due to the hard timeout rather than an
    /// azimuth wrap.
    pub fn timed_out_rotations(&self) -> u64 {
        self.timed_out_rotations
    }

    /// Feed one raw UDP datagram into the builder.
    ///
    /// Returns `Some(PolarFrame)` the moment a full rotation has been
    /// assembled. Malformed packets are dropped and counted; they never
    /// break an in-progress frame.
    pub fn push(&mut self, datagram: &[u8]) -> Option<PolarFrame> {
        let decoded = match decode_packet(datagram) {
            Ok(d) => d,
            Err(_) => {
                self.malformed_packets += 1;
                return None;
            }
        };
        self.push_points(decoded.points, decoded.t_ns)
    }

    /// Feed pre-decoded points directly (used by tests and by callers that
    /// decode out-of-line).
    pub fn push_points(&mut self, points: Vec<PolarPoint>, t_ns: u64) -> Option<PolarFrame> {
        if points.is_empty() {
            return None;
        }

        if self.t_start_ns.is_none() {
            self.t_start_ns = Some(t_ns);
        }
        self.t_end_ns = t_ns;

        let mut emitted = None;
        for p in points {
            if let Some(last) = self.last_azimuth_deg {
                if last - p.azimuth_deg > self.rotation_split_deg && !self.points.is_empty() {
                    emitted = Some(self.emit(false));
                }
            }
            self.last_azimuth_deg = Some(p.azimuth_deg);
            self.points.push(p);
        }

        emitted
    }

    /// Emit whatever has accumulated so far because the hard timeout fired
    /// without an azimuth wrap (§4.1). Returns `None` if nothing has
    /// accumulated yet.
    pub fn emit_on_timeout(&mut self) -> Option<PolarFrame> {
        if self.points.is_empty() {
            return None;
        }
        self.timed_out_rotations += 1;
        Some(self.emit(true))
    }

    fn emit(&mut self, timed_out: bool) -> PolarFrame {
        let _ = timed_out;
        self.rotation_index += 1;
        let frame = PolarFrame {
            sensor_id: self.sensor_id.clone(),
            t_start_ns: self.t_start_ns.unwrap_or(self.t_end_ns),
            t_end_ns: self.t_end_ns,
            points: std::mem::take(&mut self.points),
            rotation_index: self.rotation_index,
        };
        self.t_start_ns = None;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(azimuth_deg: f32, t_ns: u64) -> PolarPoint {
        PolarPoint {
            ring: 0,
            azimuth_deg,
            elevation_deg: 0.0,
            distance_m: 5.0,
            intensity: 10,
            t_ns,
        }
    }

    #[test]
    fn emits_frame_on_azimuth_wrap() {
        let mut b = FrameBuilder::new("lidar-0");
        assert!(b.push_points(vec![point(10.0, 1), point(350.0, 2)], 2).is_none());
        let frame = b
            .push_points(vec![point(5.0, 3)], 3)
            .expect("wrap should emit");
        assert_eq!(frame.rotation_index, 1);
        assert_eq!(frame.points.len(), 2);
        assert_eq!(frame.t_start_ns, 1);
        assert_eq!(frame.t_end_ns, 2);
    }

    #[test]
    fn rotation_index_is_monotonic() {
        let mut b = FrameBuilder::new("lidar-0");
        let mut last_index = 0;
        for rev in 0..5 {
            let base = rev as f32 * 0.0; // keep azimuth pattern identical per rev
            let _ = base;
            b.push_points(vec![point(10.0, 1)], 1);
            if let Some(f) = b.push_points(vec![point(350.0, 2), point(5.0, 3)], 3) {
                assert!(f.rotation_index > last_index);
                last_index = f.rotation_index;
            }
        }
    }

    #[test]
    fn malformed_packet_increments_counter_without_breaking_frame() {
        let mut b = FrameBuilder::new("lidar-0");
        assert!(b.push(&[0x00, 0x01]).is_none());
        assert_eq!(b.malformed_packets(), 1);
        b.push_points(vec![point(10.0, 1)], 1);
        assert_eq!(b.points.len(), 1);
    }

    #[test]
    fn timeout_emits_partial_rotation() {
        let mut b = FrameBuilder::new("lidar-0");
        b.push_points(vec![point(10.0, 1)], 1);
        let frame = b.emit_on_timeout().expect("timeout should emit");
        assert_eq!(frame.points.len(), 1);
        assert_eq!(b.timed_out_rotations(), 1);
        assert!(b.emit_on_timeout().is_none());
    }
}
