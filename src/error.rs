//! Error types for filter numerics and configuration loading.

use thiserror::Error;

/// Numerical faults raised by the Kalman filters.
///
/// The trackers never return these to callers: a track whose filter fails is
/// dropped and the error is logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackError {
    /// The innovation covariance could not be inverted.
    #[error("innovation covariance is singular")]
    SingularCovariance,

    /// A filter step produced NaN or infinite values.
    #[error("non-finite filter state after {0}")]
    NonFinite(&'static str),
}

/// Errors that can occur while loading a tracking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON for [`crate::TrackingConfig`].
    #[error("invalid tracking config: {0}")]
    Parse(#[from] serde_json::Error),
}
