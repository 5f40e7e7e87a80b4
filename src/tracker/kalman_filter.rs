//! Constant-velocity Kalman filter in XYAH space for the ByteTrack-style tracker.
//!
//! State: `[x, y, a, h, vx, vy, va, vh]`. Process and measurement noise are
//! proportional to the box height.

use ndarray::{Array1, Array2};

use crate::error::TrackError;

/// Heights below this are treated as this value when scaling noise.
const MIN_HEIGHT: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn noise_height(h: f64) -> f64 {
    if h.is_finite() { h.max(MIN_HEIGHT) } else { MIN_HEIGHT }
}

fn diagonal(std: &[f64]) -> Array2<f64> {
    let mut cov = Array2::zeros((std.len(), std.len()));
    for (i, s) in std.iter().enumerate() {
        cov[[i, i]] = s * s;
    }
    cov
}

fn ensure_finite(
    stage: &'static str,
    mean: Array1<f64>,
    covariance: Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), TrackError> {
    if mean.iter().chain(covariance.iter()).all(|v| v.is_finite()) {
        Ok((mean, covariance))
    } else {
        Err(TrackError::NonFinite(stage))
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let ndim = 4;
        let mut motion_mat = Array2::eye(2 * ndim);
        for i in 0..ndim {
            motion_mat[[i, ndim + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((ndim, 2 * ndim));
        for i in 0..ndim {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Create a track state from an unassociated XYAH measurement.
    ///
    /// Velocities start at zero; variances scale with the measured height.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(8);
        for i in 0..4 {
            mean[i] = measurement[i];
        }

        let h = noise_height(measurement[3]);
        let std = [
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * h,
            1e-2,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * h,
            1e-5,
            10.0 * self.std_weight_velocity * h,
        ];

        (mean, diagonal(&std))
    }

    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> Result<(Array1<f64>, Array2<f64>), TrackError> {
        let h = noise_height(mean[3]);
        let std = [
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-2,
            self.std_weight_position * h,
            self.std_weight_velocity * h,
            self.std_weight_velocity * h,
            1e-5,
            self.std_weight_velocity * h,
        ];

        let mut new_mean = self.motion_mat.dot(mean);
        // A shrinking box must not predict through zero height.
        if new_mean[3] <= 0.0 {
            new_mean[3] = mean[3].max(MIN_HEIGHT);
            new_mean[7] = 0.0;
        }
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + diagonal(&std);

        ensure_finite("predict", new_mean, new_covariance)
    }

    /// Map a state distribution into XYAH measurement space.
    pub fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = noise_height(mean[3]);
        let std = [
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-1,
            self.std_weight_position * h,
        ];

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + diagonal(&std);

        (mean_proj, covariance_proj)
    }

    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Result<(Array1<f64>, Array2<f64>), TrackError> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1, with H = [I 0] so P * H^T is the first 4 columns of P.
        let s_inv = invert_4x4(&projected_cov)?;
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let new_covariance = covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        ensure_finite("update", new_mean, new_covariance)
    }
}

/// Invert a 4x4 matrix through nalgebra (pure Rust, no LAPACK).
fn invert_4x4(m: &Array2<f64>) -> Result<Array2<f64>, TrackError> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse().ok_or(TrackError::SingularCovariance)?;
    Ok(Array2::from_shape_fn((4, 4), |(i, j)| inv[(i, j)]))
}
