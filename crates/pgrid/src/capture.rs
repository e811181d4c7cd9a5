//! Captured scene points and their projection to plan view and world units.

use nalgebra::Point2;
use pgrid_core::{ImageFrame, SCENE_SCALE};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{CaptureConfig, MeasurementConfig};
use crate::error::{CalibrationError, ProjectionError};
use crate::grid::{CalibrationGrid, GridTransforms};
use crate::mode::CalibrationMode;
use crate::profile::{CalibrationProfile, CameraPose};

/// Everything a projection needs besides the points themselves.
///
/// The grid must be up to date; call [`CalibrationGrid::ensure_transform`]
/// first (the [`crate::Session`] does this for you).
#[derive(Clone, Copy, Debug)]
pub struct ProjectionContext<'a> {
    pub grid: &'a CalibrationGrid,
    pub measurement: &'a MeasurementConfig,
    pub camera: Option<(&'a CalibrationProfile, &'a CameraPose)>,
    pub image: Option<&'a ImageFrame>,
}

impl<'a> ProjectionContext<'a> {
    pub fn new(grid: &'a CalibrationGrid, measurement: &'a MeasurementConfig) -> Self {
        Self {
            grid,
            measurement,
            camera: None,
            image: None,
        }
    }

    pub fn with_camera(mut self, profile: &'a CalibrationProfile, pose: &'a CameraPose) -> Self {
        self.camera = Some((profile, pose));
        self
    }

    pub fn with_image(mut self, image: &'a ImageFrame) -> Self {
        self.image = Some(image);
        self
    }

    fn planar(&self) -> Result<&'a GridTransforms, CalibrationError> {
        if let Some(t) = self.grid.transforms() {
            return Ok(t);
        }
        if self.grid.is_dirty() {
            return Err(CalibrationError::Stale);
        }
        Err(self
            .grid
            .last_error()
            .cloned()
            .unwrap_or(CalibrationError::NoPlanarTransform(self.grid.mode())))
    }

    /// Ground intersection in internal units, via the image's pixel grid.
    fn ground(&self, pts: &[Point2<f64>]) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        let image = self.image.ok_or(ProjectionError::NoImage)?;
        let (profile, pose) = self.camera.ok_or(ProjectionError::NoCamera)?;
        let uv = image.scene_to_uv_all(pts);
        Ok(profile.ground_plane_project(&uv, pose)?)
    }
}

/// Captured scene-space points with density-gated insertion for drags.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCapture {
    points: Vec<Point2<f64>>,
    density_counter: u32,
    density_interval: u32,
    erase_radius: f64,
}

impl PointCapture {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            points: Vec::new(),
            density_counter: 0,
            density_interval: config.density_interval,
            erase_radius: config.erase_radius,
        }
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn density_counter(&self) -> u32 {
        self.density_counter
    }

    pub fn density_interval(&self) -> u32 {
        self.density_interval
    }

    /// Change the drag interval; the counter restarts.
    pub fn set_density_interval(&mut self, interval: u32) {
        self.density_interval = interval;
        self.density_counter = 0;
    }

    /// Record a drag sample. Only every `interval + 1`-th call appends.
    ///
    /// Returns whether the point was kept.
    pub fn capture_dragged(&mut self, x: f64, y: f64) -> bool {
        if self.density_counter >= self.density_interval {
            self.points.push(Point2::new(x, y));
            self.density_counter = 0;
            true
        } else {
            self.density_counter += 1;
            false
        }
    }

    pub fn capture_clicked(&mut self, x: f64, y: f64) {
        self.points.push(Point2::new(x, y));
    }

    /// Remove every point within `radius` (inclusive) of `(x, y)`.
    /// Returns how many were removed.
    pub fn erase_near(&mut self, x: f64, y: f64, radius: f64) -> usize {
        let q = Point2::new(x, y);
        let before = self.points.len();
        self.points.retain(|p| (p - q).norm() > radius);
        before - self.points.len()
    }

    /// [`Self::erase_near`] with the configured eraser radius.
    pub fn erase_at(&mut self, x: f64, y: f64) -> usize {
        self.erase_near(x, y, self.erase_radius)
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Plan-view coordinates: world positions still in internal ×100 units.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(n = self.points.len()))
    )]
    pub fn project_for_display(
        &self,
        ctx: &ProjectionContext<'_>,
    ) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        let mode = ctx.grid.mode();
        match mode {
            CalibrationMode::CornerRect => {
                let t = ctx.planar()?;
                let c0 = ctx.grid.corners()[0];
                let m = ctx.measurement;
                Ok(self
                    .points
                    .iter()
                    .map(|&p| {
                        t.inverse.try_apply(p).map(|w| {
                            Point2::new(
                                m.sign_x() * (w.x - c0.x) - m.x_offset * SCENE_SCALE,
                                m.sign_y() * (w.y - c0.y) - m.y_offset * SCENE_SCALE,
                            )
                        })
                    })
                    .collect())
            }
            CalibrationMode::ReferenceHomography | CalibrationMode::MarkerHomography => {
                let t = ctx.planar()?;
                Ok(self.points.iter().map(|&p| t.inverse.try_apply(p)).collect())
            }
            CalibrationMode::Markerless => ctx.ground(&self.points),
        }
    }

    /// World coordinates in metres.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(n = self.points.len()))
    )]
    pub fn project_for_export(
        &self,
        ctx: &ProjectionContext<'_>,
    ) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        let unscale = |p: Point2<f64>| p / SCENE_SCALE;
        let out: Vec<_> = match ctx.grid.mode() {
            CalibrationMode::CornerRect => {
                let t = ctx.planar()?;
                let c0 = ctx.grid.corners()[0];
                self.points
                    .iter()
                    .map(|&p| {
                        t.inverse
                            .try_apply(p)
                            .map(|w| unscale(Point2::from(w - c0)))
                    })
                    .collect()
            }
            CalibrationMode::ReferenceHomography | CalibrationMode::MarkerHomography => {
                let t = ctx.planar()?;
                self.points
                    .iter()
                    .map(|&p| t.inverse.try_apply(p).map(unscale))
                    .collect()
            }
            CalibrationMode::Markerless => ctx
                .ground(&self.points)?
                .into_iter()
                .map(|p| p.map(unscale))
                .collect(),
        };
        log::debug!(
            "exported {} of {} points",
            out.iter().flatten().count(),
            out.len()
        );
        Ok(out)
    }
}
