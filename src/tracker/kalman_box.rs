//! Kalman filter in XYSR space for the OC-SORT-style tracker.
//!
//! State: `[x, y, s, r, vx, vy, vs]` where `s` is the box area and `r` the
//! aspect ratio. The transition is the identity: velocities are carried in
//! the state but do not move the position, because fish change heading too
//! often for extrapolation to help. The filter itself leaves the velocity
//! rows alone; [`KalmanBoxTracker`](super::KalmanBoxTracker) writes them from
//! the filtered position change on each update. Updates use the Joseph form
//! so the covariance stays symmetric positive semi-definite.

use nalgebra::{SMatrix, SVector};

use crate::error::TrackError;

pub type BoxMean = SVector<f64, 7>;
pub type BoxCovariance = SMatrix<f64, 7, 7>;
pub type BoxMeasurement = SVector<f64, 4>;

type ObservationMatrix = SMatrix<f64, 4, 7>;

/// Smallest area the filter will predict from.
const MIN_SCALE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct KalmanBoxFilter {
    motion_mat: BoxCovariance,
    update_mat: ObservationMatrix,
    measurement_cov: SMatrix<f64, 4, 4>,
    process_cov: BoxCovariance,
}

impl Default for KalmanBoxFilter {
    fn default() -> Self {
        Self::new(
            [1e-4, 1e-4, 1e-5, 1e-2],
            [4e-4, 4e-4, 4e-5, 1e-3, 1e-6, 1e-6, 1e-8],
        )
    }
}

impl KalmanBoxFilter {
    /// `measurement_var` is the diagonal of R over `(x, y, s, r)`,
    /// `process_var` the diagonal of Q over the full state.
    pub fn new(measurement_var: [f64; 4], process_var: [f64; 7]) -> Self {
        Self {
            motion_mat: BoxCovariance::identity(),
            update_mat: ObservationMatrix::identity(),
            measurement_cov: SMatrix::from_diagonal(&SVector::from(measurement_var)),
            process_cov: BoxCovariance::from_diagonal(&BoxMean::from(process_var)),
        }
    }

    pub fn initiate(&self, measurement: [f64; 4]) -> (BoxMean, BoxCovariance) {
        let mean = BoxMean::from([
            measurement[0],
            measurement[1],
            measurement[2],
            measurement[3],
            0.0,
            0.0,
            0.0,
        ]);
        // Position terms start at 10x the measurement noise, velocities are
        // unknown.
        let mut cov = BoxCovariance::zeros();
        for i in 0..4 {
            cov[(i, i)] = 10.0 * self.measurement_cov[(i, i)];
        }
        for i in 4..7 {
            cov[(i, i)] = 1e4 * self.process_cov[(i, i)];
        }
        (mean, cov)
    }

    pub fn predict(
        &self,
        mean: &BoxMean,
        covariance: &BoxCovariance,
    ) -> Result<(BoxMean, BoxCovariance), TrackError> {
        let mut mean = *mean;
        if mean[2] + mean[6] <= 0.0 {
            mean[6] = 0.0;
        }
        if mean[2] <= 0.0 {
            mean[2] = MIN_SCALE;
        }

        let new_mean = self.motion_mat * mean;
        let new_cov = self.motion_mat * covariance * self.motion_mat.transpose() + self.process_cov;

        if new_mean.iter().chain(new_cov.iter()).all(|v| v.is_finite()) {
            Ok((new_mean, new_cov))
        } else {
            Err(TrackError::NonFinite("predict"))
        }
    }

    pub fn project(
        &self,
        mean: &BoxMean,
        covariance: &BoxCovariance,
    ) -> (BoxMeasurement, SMatrix<f64, 4, 4>) {
        let projected_mean = self.update_mat * mean;
        let projected_cov =
            self.update_mat * covariance * self.update_mat.transpose() + self.measurement_cov;
        (projected_mean, projected_cov)
    }

    pub fn update(
        &self,
        mean: &BoxMean,
        covariance: &BoxCovariance,
        measurement: [f64; 4],
    ) -> Result<(BoxMean, BoxCovariance), TrackError> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let s_inv = projected_cov
            .try_inverse()
            .ok_or(TrackError::SingularCovariance)?;

        let kalman_gain = covariance * self.update_mat.transpose() * s_inv;
        let innovation = BoxMeasurement::from(measurement) - projected_mean;
        let new_mean = mean + kalman_gain * innovation;

        // Joseph form: P = (I - KH) P (I - KH)' + K R K'
        let i_kh = BoxCovariance::identity() - kalman_gain * self.update_mat;
        let new_cov = i_kh * covariance * i_kh.transpose()
            + kalman_gain * self.measurement_cov * kalman_gain.transpose();

        if new_mean.iter().chain(new_cov.iter()).all(|v| v.is_finite()) {
            Ok((new_mean, new_cov))
        } else {
            Err(TrackError::NonFinite("update"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_initiate_then_project_returns_measurement() {
        let kf = KalmanBoxFilter::default();
        let z = [0.5, 0.5, 0.01, 2.0];
        let (mean, cov) = kf.initiate(z);
        let (projected, _) = kf.project(&mean, &cov);
        for i in 0..4 {
            assert_abs_diff_eq!(projected[i], z[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_predict_keeps_position() {
        let kf = KalmanBoxFilter::default();
        let (mut mean, cov) = kf.initiate([0.3, 0.4, 0.01, 1.0]);
        mean[4] = 0.1;
        let (predicted, predicted_cov) = kf.predict(&mean, &cov).unwrap();
        assert_eq!(predicted[0], 0.3);
        assert!(predicted_cov[(0, 0)] > cov[(0, 0)]);
    }

    #[test]
    fn test_negative_scale_is_clamped() {
        let kf = KalmanBoxFilter::default();
        let (mut mean, cov) = kf.initiate([0.3, 0.4, 0.01, 1.0]);
        mean[2] = -0.5;
        mean[6] = -0.1;
        let (predicted, _) = kf.predict(&mean, &cov).unwrap();
        assert!(predicted[2] > 0.0);
        assert_eq!(predicted[6], 0.0);
    }

    #[test]
    fn test_repeated_updates_keep_covariance_symmetric() {
        let kf = KalmanBoxFilter::default();
        let (mut mean, mut cov) = kf.initiate([0.5, 0.5, 0.01, 1.5]);
        for step in 0..200 {
            (mean, cov) = kf.predict(&mean, &cov).unwrap();
            let wobble = if step % 2 == 0 { 0.01 } else { -0.01 };
            (mean, cov) = kf.update(&mean, &cov, [0.5 + wobble, 0.5, 0.01, 1.5]).unwrap();
        }
        for i in 0..7 {
            assert!(cov[(i, i)] >= 0.0);
            for j in 0..7 {
                assert_abs_diff_eq!(cov[(i, j)], cov[(j, i)], epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(mean[0], 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_static_input_keeps_velocity_at_zero() {
        let kf = KalmanBoxFilter::default();
        let z = [0.2, 0.7, 0.004, 0.8];
        let (mut mean, mut cov) = kf.initiate(z);
        for _ in 0..50 {
            (mean, cov) = kf.predict(&mean, &cov).unwrap();
            (mean, cov) = kf.update(&mean, &cov, z).unwrap();
        }
        assert_abs_diff_eq!(mean[4], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(mean[5], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(mean[1], 0.7, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_measurement_is_reported() {
        let kf = KalmanBoxFilter::default();
        let (mean, cov) = kf.initiate([0.2, 0.7, 0.004, 0.8]);
        let err = kf.update(&mean, &cov, [f64::NAN, 0.7, 0.004, 0.8]).unwrap_err();
        assert_eq!(err, TrackError::NonFinite("update"));
    }
}
