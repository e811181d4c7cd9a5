//! JSON description of a complete session, as consumed by the `pgrid` CLI.
//!
//! ```json
//! {
//!   "config": { "mode": "corner_rect" },
//!   "corners": [[-100, -100], [-100, 100], [100, 100], [100, -100]],
//!   "points": [[0, 0], [50, 20]]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nalgebra::Point2;
use pgrid_core::ImageFrame;
use pgrid_markers::{MarkerDetection, MarkerIndex, MarkerIndexError};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::{GridError, ProjectionError};
use crate::profile::{CalibrationProfile, CameraPose};
use crate::session::Session;

#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("failed to read session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid session description: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    MarkerIndex(#[from] MarkerIndexError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraInput {
    pub profile: CalibrationProfile,
    #[serde(default)]
    pub pose: CameraPose,
}

/// A reference point: where it was clicked, and where it is in the world.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceInput {
    pub scene: [f64; 2],
    #[serde(default)]
    pub world: Option<[f64; 2]>,
    /// Grid cell, used when `world` is absent.
    #[serde(default)]
    pub grid: Option<[i32; 2]>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkersInput {
    /// Marker index file (`id`, `x`, `y` records); relative to the session file.
    pub index: Option<PathBuf>,
    /// Inline world anchors by marker id, merged over the index file.
    pub anchors: HashMap<u32, [f64; 2]>,
    pub detections: Vec<MarkerDetection>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInput {
    pub config: SessionConfig,
    /// Overrides `config.grid.corners`.
    pub corners: Option<[[f64; 2]; 4]>,
    pub image: Option<ImageFrame>,
    pub camera: Option<CameraInput>,
    pub references: Vec<ReferenceInput>,
    pub markers: Option<MarkersInput>,
    /// Captured scene points, recorded as clicks.
    pub points: Vec<[f64; 2]>,
}

impl SessionInput {
    pub fn from_json_str(text: &str) -> Result<Self, InputError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Build a session. Relative marker index paths resolve against `base_dir`.
    pub fn into_session(self, base_dir: Option<&Path>) -> Result<Session, InputError> {
        let mut session = Session::new(self.config);

        if let Some(corners) = self.corners {
            for (i, [x, y]) in corners.into_iter().enumerate() {
                session.grid_mut().move_corner(i, x, y)?;
            }
        }
        if let Some(image) = self.image {
            session.set_image(image);
        }
        if let Some(camera) = self.camera {
            session.set_camera(camera.profile, camera.pose);
        }

        // computed lazily once every world coordinate is in place
        for r in &self.references {
            let [x, y] = r.scene;
            let i = session.grid_mut().push_reference_point(x, y);
            match (r.world, r.grid) {
                (Some([wx, wy]), _) => session.grid_mut().set_reference_world(i, wx, wy)?,
                (None, Some([gi, gj])) => session.grid_mut().set_reference_grid_coords(i, gi, gj)?,
                (None, None) => log::warn!("reference point {i} has no world coordinate"),
            }
        }

        if let Some(markers) = self.markers {
            let mut index = match &markers.index {
                Some(path) => {
                    let path = match base_dir {
                        Some(dir) if path.is_relative() => dir.join(path),
                        _ => path.clone(),
                    };
                    MarkerIndex::from_path(path)?
                }
                None => MarkerIndex::new(),
            };
            for (id, [x, y]) in markers.anchors {
                index.insert(id, Point2::new(x, y));
            }
            session.apply_marker_detections(&markers.detections, &index)?;
        }

        for [x, y] in self.points {
            session.capture_mut().capture_clicked(x, y);
        }
        Ok(session)
    }
}
