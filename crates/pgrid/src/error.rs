use pgrid_core::HomographyError;

use crate::mode::CalibrationMode;

/// Bad indices passed to grid editing operations. Nothing is mutated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("invalid corner index {0} (expected 0..4)")]
    InvalidCorner(usize),
    #[error("invalid reference point index {index} ({len} points)")]
    InvalidReferencePoint { index: usize, len: usize },
}

/// Why the grid has no usable scene ↔ world transform.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("{mode} calibration needs at least 4 correspondences, got {got}")]
    NotEnoughCorrespondences { mode: CalibrationMode, got: usize },
    #[error("homography estimation failed: {0}")]
    Estimation(#[from] HomographyError),
    #[error("estimated transform is ill-conditioned (condition number {condition:.3e})")]
    IllConditioned { condition: f64 },
    #[error("calibration changed since the transform was last computed")]
    Stale,
    #[error("{0} calibration has no planar transform")]
    NoPlanarTransform(CalibrationMode),
}

/// Errors raised by camera-profile operations.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("camera intrinsic matrix is singular")]
    SingularIntrinsics,
    #[error("intrinsic calibration failed: {0}")]
    Calibrator(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while projecting captured points.
#[derive(thiserror::Error, Debug)]
pub enum ProjectionError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("markerless projection needs a loaded image")]
    NoImage,
    #[error("markerless projection needs a camera profile and pose")]
    NoCamera,
}
