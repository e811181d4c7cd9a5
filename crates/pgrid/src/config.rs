//! Session configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON file only
//! needs the fields it overrides.

use std::path::Path;

use nalgebra::Point2;
use pgrid_core::RansacHomographyConfig;
use pgrid_markers::DEFAULT_MARKER_SIZE;
use serde::{Deserialize, Serialize};

use crate::mode::CalibrationMode;

/// Scene positions of the four grid corners in a fresh session.
pub const DEFAULT_CORNERS: [[f64; 2]; 4] = [
    [-100.0, -100.0],
    [-100.0, 100.0],
    [100.0, 100.0],
    [100.0, -100.0],
];

/// Radius (scene units) within which a corner can be grabbed.
pub const GRAB_RADIUS: f64 = 100.0;

/// Physical rectangle described by the calibration grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Rectangle width in metres (world x).
    pub width: f64,
    /// Rectangle height in metres (world y).
    pub height: f64,
    /// Division lines drawn along x.
    pub divs_x: u32,
    /// Division lines drawn along y.
    pub divs_y: u32,
    /// World spacing of one grid step in x, used by reference points placed by grid cell.
    pub grid_interval_x: f64,
    pub grid_interval_y: f64,
    pub corners: [[f64; 2]; 4],
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 8.5,
            height: 15.0,
            divs_x: 17,
            divs_y: 30,
            grid_interval_x: 0.5,
            grid_interval_y: 0.5,
            corners: DEFAULT_CORNERS,
        }
    }
}

impl GridConfig {
    pub fn corner_points(&self) -> [Point2<f64>; 4] {
        self.corners.map(|[x, y]| Point2::new(x, y))
    }
}

/// Axis flips and origin offset applied to final measurements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub flip_x: bool,
    pub flip_y: bool,
    /// Origin offset in metres.
    pub x_offset: f64,
    pub y_offset: f64,
}

impl MeasurementConfig {
    #[inline]
    pub fn sign_x(&self) -> f64 {
        if self.flip_x {
            -1.0
        } else {
            1.0
        }
    }

    #[inline]
    pub fn sign_y(&self) -> f64 {
        if self.flip_y {
            -1.0
        } else {
            1.0
        }
    }

    /// Adjust an exported metric point: `flip · (p − offset)`.
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.sign_x() * (p.x - self.x_offset),
            self.sign_y() * (p.y - self.y_offset),
        )
    }
}

/// Point capture settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Eraser radius in scene units.
    pub erase_radius: f64,
    /// Drag events skipped between captured points.
    pub density_interval: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            erase_radius: 10.0,
            density_interval: 10,
        }
    }
}

/// Fine corner control: mouse deltas are scaled by `sensitivity / scaler`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerControlConfig {
    pub sensitivity: f64,
    pub scaler: f64,
}

impl Default for CornerControlConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            scaler: 256.0,
        }
    }
}

/// Homography estimation and validity checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub ransac: RansacHomographyConfig,
    /// Estimated transforms with a larger condition number are rejected.
    pub max_condition: f64,
    /// Printed marker side length in metres.
    pub marker_size: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            ransac: RansacHomographyConfig::default(),
            max_condition: 1e12,
            marker_size: DEFAULT_MARKER_SIZE,
        }
    }
}

/// Everything a [`crate::Session`] is built from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: CalibrationMode,
    pub grid: GridConfig,
    pub measurement: MeasurementConfig,
    pub capture: CaptureConfig,
    pub corner_control: CornerControlConfig,
    pub estimation: EstimationConfig,
}

/// Errors returned while loading configuration files.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SessionConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}
