// SPDX-License-Identifier: Apache-2.0

//! Constant-velocity Kalman filter (C6a) over state `(x, y, vx, vy)`.
//!
//! Adapted from the 8-dimensional XYAH filter used for box tracking: same
//! predict/project/update shape (motion matrix, diagonal process noise,
//! Cholesky-based update), narrowed to the 4-dimensional point-track state
//! this system needs and parameterized by `dt` instead of a single fixed
//! `update_factor`, since LIDAR frames do not arrive at a fixed rate.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Process/measurement noise tuning (§4.5, §6.2 `tracker.*`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    /// Process noise on position, applied per second of `dt`.
    pub process_noise_pos: f32,
    /// Process noise on velocity, applied per second of `dt`.
    pub process_noise_vel: f32,
    /// Measurement noise on the (x, y) centroid observation.
    pub measurement_noise: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        NoiseParams {
            process_noise_pos: 0.1,
            process_noise_vel: 1.0,
            measurement_noise: 0.25,
        }
    }
}

/// A single track's Kalman state: `(x, y, vx, vy)` mean and 4x4 covariance.
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel {
    /// State mean: `[x, y, vx, vy]`.
    pub mean: Vector4<f32>,
    /// State covariance, kept symmetric positive semi-definite.
    pub covariance: Matrix4<f32>,
    noise: NoiseParams,
}

fn measurement_matrix() -> Matrix2x4<f32> {
    Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0)
}

fn motion_matrix(dt: f32) -> Matrix4<f32> {
    #[rustfmt::skip]
    let m = Matrix4::new(
        1.0, 0.0, dt,  0.0,
        0.0, 1.0, 0.0, dt,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    m
}

impl ConstantVelocityModel {
    /// Seed a new track from an initial `(x, y)` measurement and an
    /// optional initial velocity estimate (frame-over-frame displacement,
    /// per §4.5 step 6). Covariance is seeded large, as the spec requires
    /// for newly opened tracks.
    pub fn new(x: f32, y: f32, initial_velocity: Option<(f32, f32)>, noise: NoiseParams) -> Self {
        let (vx, vy) = initial_velocity.unwrap_or((0.0, 0.0));
        let mean = Vector4::new(x, y, vx, vy);
        let large = 1000.0f32;
        let covariance = Matrix4::from_diagonal(&Vector4::new(large, large, large, large));
        ConstantVelocityModel {
            mean,
            covariance,
            noise,
        }
    }

    /// Replace noise tuning, effective from the next predict/update.
    pub fn reload_noise(&mut self, noise: NoiseParams) {
        self.noise = noise;
    }

    /// Predict the state forward by `dt` seconds (§4.5 step 1).
    pub fn predict(&mut self, dt: f32) {
        let f = motion_matrix(dt);
        let q = Matrix4::from_diagonal(&Vector4::new(
            self.noise.process_noise_pos * dt,
            self.noise.process_noise_pos * dt,
            self.noise.process_noise_vel * dt,
            self.noise.process_noise_vel * dt,
        ));
        self.mean = f * self.mean;
        self.covariance = f * self.covariance * f.transpose() + q;
        symmetrize(&mut self.covariance);
    }

    /// Project state into measurement space, returning `(Hx, S)` where
    /// `S = H P H^T + R`.
    pub fn project(&self) -> (Vector2<f32>, Matrix2<f32>) {
        let h = measurement_matrix();
        let r = Matrix2::from_diagonal(&Vector2::new(
            self.noise.measurement_noise,
            self.noise.measurement_noise,
        ));
        let mean = h * self.mean;
        let cov = h * self.covariance * h.transpose() + r;
        (mean, cov)
    }

    /// Squared Mahalanobis distance from this track's projected state to
    /// `measurement` (§4.5 step 2). Returns `f32::INFINITY` if the
    /// innovation covariance is not invertible.
    pub fn mahalanobis_sq(&self, measurement: Vector2<f32>) -> f32 {
        let (mean, cov) = self.project();
        let innovation = measurement - mean;
        match cov.try_inverse() {
            Some(inv) => (innovation.transpose() * inv * innovation)[(0, 0)],
            None => f32::INFINITY,
        }
    }

    /// Kalman update given a centroid measurement `(x, y)` (§4.5 step 4).
    pub fn update(&mut self, measurement: Vector2<f32>) {
        let h = measurement_matrix();
        let (projected_mean, projected_cov) = self.project();
        let cho = match projected_cov.cholesky() {
            Some(c) => c,
            None => return,
        };
        let pht = self.covariance * h.transpose();
        let kalman_gain = cho.solve(&pht.transpose()).transpose();
        let innovation = measurement - projected_mean;
        self.mean += kalman_gain * innovation;
        self.covariance -= kalman_gain * projected_cov * kalman_gain.transpose();
        symmetrize(&mut self.covariance);
    }
}

fn symmetrize(m: &mut Matrix4<f32>) {
    *m = (*m + m.transpose()) * 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_advances_position_by_velocity() {
        let mut model = ConstantVelocityModel::new(0.0, 0.0, Some((1.0, 2.0)), NoiseParams::default());
        model.predict(1.0);
        assert!((model.mean[0] - 1.0).abs() < 1e-5);
        assert!((model.mean[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn update_pulls_state_toward_measurement() {
        let mut model = ConstantVelocityModel::new(0.0, 0.0, None, NoiseParams::default());
        model.predict(0.1);
        model.update(Vector2::new(1.0, 0.0));
        assert!(model.mean[0] > 0.0 && model.mean[0] < 1.0);
    }

    #[test]
    fn covariance_stays_symmetric_after_updates() {
        let mut model = ConstantVelocityModel::new(0.0, 0.0, None, NoiseParams::default());
        for i in 0..10 {
            model.predict(0.1);
            model.update(Vector2::new(i as f32 * 0.1, 0.0));
        }
        let diff = model.covariance - model.covariance.transpose();
        assert!(diff.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn mahalanobis_distance_grows_with_offset() {
        let model = ConstantVelocityModel::new(0.0, 0.0, None, NoiseParams::default());
        let near = model.mahalanobis_sq(Vector2::new(0.1, 0.0));
        let far = model.mahalanobis_sq(Vector2::new(5.0, 0.0));
        assert!(far > near);
    }
}
