// SPDX-License-Identifier: Apache-2.0

//! World transform (C5a): applies the sensor [`Pose`] to polar points,
//! producing Cartesian [`WorldPoint`]s for the clusterer.

use nalgebra::{Matrix4, Point3, Vector4};

use crate::polar::PolarPoint;

/// A point in world (vehicle/site) frame, transient and owned by the
/// clustering step (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPoint {
    /// World-frame X, meters.
    pub x: f32,
    /// World-frame Y, meters.
    pub y: f32,
    /// World-frame Z, meters.
    pub z: f32,
    /// Carried through from the source point.
    pub intensity: u8,
    /// Carried through from the source point.
    pub t_ns: u64,
    /// Index of the source point within its frame, for traceability.
    pub src_idx: usize,
}

/// Sensor pose: a rigid (or affine) transform from sensor frame to world
/// frame, plus a tag identifying the frame it maps into. Process-wide
/// configuration; rebinding forces a background-grid reset (§3).
#[derive(Debug, Clone)]
pub struct Pose {
    /// 4x4 affine transform, sensor frame to world frame.
    pub transform: Matrix4<f32>,
    /// Identifies the world frame this pose maps into.
    pub frame_tag: String,
}

impl Pose {
    /// The identity pose: sensor frame equals world frame.
    pub fn identity(frame_tag: impl Into<String>) -> Self {
        Pose {
            transform: Matrix4::identity(),
            frame_tag: frame_tag.into(),
        }
    }

    /// Build a pose from a translation and a rotation given as Euler
    /// angles (roll, pitch, yaw), in radians, applied roll-pitch-yaw.
    pub fn from_translation_euler(
        frame_tag: impl Into<String>,
        translation: (f32, f32, f32),
        roll_pitch_yaw: (f32, f32, f32),
    ) -> Self {
        use nalgebra::{Rotation3, Translation3};
        let (roll, pitch, yaw) = roll_pitch_yaw;
        let rotation = Rotation3::from_euler_angles(roll, pitch, yaw);
        let translation = Translation3::new(translation.0, translation.1, translation.2);
        let iso = translation * rotation;
        Pose {
            transform: iso.to_homogeneous(),
            frame_tag: frame_tag.into(),
        }
    }

    /// Apply this pose to one polar point, producing a world-frame point.
    ///
    /// Spherical to Cartesian first (sensor frame), then affine multiply
    /// (§4.4 Transform).
    pub fn apply(&self, point: &PolarPoint, src_idx: usize) -> WorldPoint {
        let az = point.azimuth_deg.to_radians();
        let el = point.elevation_deg.to_radians();
        let r = point.distance_m;

        let sx = r * el.cos() * az.cos();
        let sy = r * el.cos() * az.sin();
        let sz = r * el.sin();

        let sensor = Point3::new(sx, sy, sz);
        let homogeneous = Vector4::new(sensor.x, sensor.y, sensor.z, 1.0);
        let world = self.transform * homogeneous;

        WorldPoint {
            x: world.x,
            y: world.y,
            z: world.z,
            intensity: point.intensity,
            t_ns: point.t_ns,
            src_idx,
        }
    }

    /// Apply this pose to every point in `points`, in order.
    pub fn apply_all(&self, points: &[PolarPoint]) -> Vec<WorldPoint> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| self.apply(p, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_pose_matches_spherical_to_cartesian() {
        let pose = Pose::identity("site");
        let p = PolarPoint {
            ring: 0,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            distance_m: 10.0,
            intensity: 1,
            t_ns: 0,
        };
        let w = pose.apply(&p, 0);
        assert!((w.x - 10.0).abs() < 1e-4);
        assert!(w.y.abs() < 1e-4);
        assert!(w.z.abs() < 1e-4);
    }

    #[test]
    fn ninety_degree_azimuth_maps_to_y_axis() {
        let pose = Pose::identity("site");
        let p = PolarPoint {
            ring: 0,
            azimuth_deg: 90.0,
            elevation_deg: 0.0,
            distance_m: 5.0,
            intensity: 1,
            t_ns: 0,
        };
        let w = pose.apply(&p, 0);
        assert!(w.x.abs() < 1e-3);
        assert!((w.y - 5.0).abs() < 1e-3);
    }

    #[test]
    fn translation_offsets_every_point() {
        let pose = Pose::from_translation_euler("site", (1.0, 2.0, 3.0), (0.0, 0.0, 0.0));
        let p = PolarPoint {
            ring: 0,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            distance_m: 0.0,
            intensity: 1,
            t_ns: 0,
        };
        let w = pose.apply(&p, 0);
        assert!((w.x - 1.0).abs() < 1e-4);
        assert!((w.y - 2.0).abs() < 1e-4);
        assert!((w.z - 3.0).abs() < 1e-4);
    }

    #[test]
    fn apply_all_preserves_order_and_indices() {
        let pose = Pose::identity("site");
        let points = vec![
            PolarPoint { ring: 0, azimuth_deg: 0.0, elevation_deg: 0.0, distance_m: 1.0, intensity: 0, t_ns: 1 },
            PolarPoint { ring: 1, azimuth_deg: 10.0, elevation_deg: 0.0, distance_m: 2.0, intensity: 0, t_ns: 2 },
        ];
        let world = pose.apply_all(&points);
        assert_eq!(world[0].src_idx, 0);
        assert_eq!(world[1].src_idx, 1);
        assert_eq!(world[1].t_ns, 2);
    }
}
