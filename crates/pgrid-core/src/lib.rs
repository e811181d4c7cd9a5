//! Core geometry for perspective-grid digitizing.
//!
//! This crate is intentionally small and purely geometric: projective maps,
//! robust estimation from point correspondences, and the coordinate spaces
//! shared by the rest of the workspace. It knows nothing about calibration
//! modes or captured points.

mod coords;
mod homography;
mod logger;
mod ransac;

pub use coords::{internal_to_metric, metric_to_internal, ImageFrame, SCENE_SCALE};
pub use homography::{estimate_homography, homography_from_4pt, Homography, HomographyError};
pub use ransac::{
    find_homography_robust, ransac, Correspondence, Estimator, HomographyEstimator,
    RansacHomographyConfig, RansacResult,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, level_from_env, LOG_ENV};
