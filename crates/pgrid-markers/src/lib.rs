//! Fiducial-marker correspondences for perspective-grid calibration.
//!
//! This crate does **not** detect markers. It takes the output of an
//! external detector (marker id plus four image-space quad corners), looks
//! up each marker's world anchor, and synthesises the scene ↔ world point
//! pairs that the calibration grid feeds to its homography estimator.

mod correspondence;
mod index;

pub use correspondence::{
    build_correspondences, scene_quad, world_quad, MarkerCorrespondences, MarkerDetection,
    DEFAULT_MARKER_SIZE,
};
pub use index::{MarkerIndex, MarkerIndexError, MarkerLookup};
