//! Perspective-grid digitizer.
//!
//! Calibrate the ground plane seen in a photograph, capture points on it,
//! and project them to metric world coordinates.
//!
//! ## Quickstart
//!
//! ```
//! use pgrid::{Session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // default grid: an 8.5 × 15 m rectangle with corners around the scene origin
//! let mut session = Session::new(SessionConfig::default());
//! let far = session.grid().corners()[2];
//! session.capture_mut().capture_clicked(far.x, far.y);
//!
//! let world = session.project_for_export()?;
//! let p = world[0].expect("inside the grid");
//! assert!((p.x - 8.5).abs() < 1e-9 && (p.y - 15.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```
//!
//! ## Calibration modes
//! - [`CalibrationMode::CornerRect`]: four hand-placed corners of a rectangle of known size.
//! - [`CalibrationMode::ReferenceHomography`]: robust homography from clicked reference points.
//! - [`CalibrationMode::MarkerHomography`]: robust homography from detected fiducial markers.
//! - [`CalibrationMode::Markerless`]: ray/ground intersection from a calibrated camera pose.
//!
//! ## Coordinate spaces
//! - *scene*: origin at the image centre, y up; world positions here are metres ×100.
//! - *uv*: image pixels, origin top-left, y down.
//! - *world*: metres; only [`Session::project_for_export`] and
//!   [`Session::measurements`] produce it.
//!
//! ## API map
//! - `pgrid::core`: homographies, robust estimation, coordinate spaces, logging.
//! - `pgrid::markers`: marker index files and marker correspondences.

pub use pgrid_core as core;
pub use pgrid_markers as markers;

mod capture;
mod config;
mod error;
mod grid;
mod input;
mod mode;
mod profile;
mod reference;
mod session;

pub use capture::{PointCapture, ProjectionContext};
pub use config::{
    CaptureConfig, ConfigError, CornerControlConfig, EstimationConfig, GridConfig,
    MeasurementConfig, SessionConfig, DEFAULT_CORNERS, GRAB_RADIUS,
};
pub use error::{CalibrationError, GridError, ProfileError, ProjectionError};
pub use grid::{CalibrationGrid, GridTransforms};
pub use input::{CameraInput, InputError, MarkersInput, ReferenceInput, SessionInput};
pub use mode::{CalibrationMode, ParseModeError};
pub use profile::{
    CalibrationProfile, CameraPose, CheckerboardSize, Distortion, IntrinsicCalibrator,
    IntrinsicEstimate,
};
pub use reference::ReferencePoint;
pub use session::Session;
