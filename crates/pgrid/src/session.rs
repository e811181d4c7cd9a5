use nalgebra::Point2;
use pgrid_core::ImageFrame;
use pgrid_markers::{build_correspondences, MarkerDetection, MarkerLookup};

use crate::capture::{PointCapture, ProjectionContext};
use crate::config::{MeasurementConfig, SessionConfig};
use crate::error::{GridError, ProjectionError};
use crate::grid::CalibrationGrid;
use crate::mode::CalibrationMode;
use crate::profile::{CalibrationProfile, CameraPose};

/// One digitizing session: the grid, the captured points and whatever
/// image and camera they were taken from.
///
/// Projections always run against an up-to-date calibration.
#[derive(Clone, Debug)]
pub struct Session {
    config: SessionConfig,
    grid: CalibrationGrid,
    capture: PointCapture,
    camera: Option<(CalibrationProfile, CameraPose)>,
    image: Option<ImageFrame>,
    detections: Vec<MarkerDetection>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let grid = CalibrationGrid::new(&config.grid, config.mode, config.estimation.clone());
        let capture = PointCapture::new(&config.capture);
        Self {
            config,
            grid,
            capture,
            camera: None,
            image: None,
            detections: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn grid(&self) -> &CalibrationGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut CalibrationGrid {
        &mut self.grid
    }

    pub fn capture(&self) -> &PointCapture {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut PointCapture {
        &mut self.capture
    }

    pub fn mode(&self) -> CalibrationMode {
        self.grid.mode()
    }

    pub fn set_mode(&mut self, mode: CalibrationMode) {
        self.config.mode = mode;
        self.grid.set_mode(mode);
    }

    pub fn measurement(&self) -> &MeasurementConfig {
        &self.config.measurement
    }

    pub fn set_measurement(&mut self, measurement: MeasurementConfig) {
        self.config.measurement = measurement;
    }

    pub fn image(&self) -> Option<&ImageFrame> {
        self.image.as_ref()
    }

    /// Load a new image. Marker quads from the previous image no longer apply.
    pub fn set_image(&mut self, image: ImageFrame) {
        log::info!("image {}x{}", image.width, image.height);
        self.image = Some(image);
        if !self.detections.is_empty() {
            self.detections.clear();
            self.grid.set_marker_correspondences(Default::default());
        }
    }

    pub fn camera(&self) -> Option<(&CalibrationProfile, &CameraPose)> {
        self.camera.as_ref().map(|(p, c)| (p, c))
    }

    pub fn set_camera(&mut self, profile: CalibrationProfile, pose: CameraPose) {
        self.camera = Some((profile, pose));
    }

    pub fn detections(&self) -> &[MarkerDetection] {
        &self.detections
    }

    /// Turn detector output for the current image into grid correspondences.
    ///
    /// Returns the number of markers that were found in the lookup.
    pub fn apply_marker_detections<L: MarkerLookup + ?Sized>(
        &mut self,
        detections: &[MarkerDetection],
        lookup: &L,
    ) -> Result<usize, ProjectionError> {
        let image = self.image.ok_or(ProjectionError::NoImage)?;
        let markers = build_correspondences(
            detections,
            &image,
            lookup,
            self.config.estimation.marker_size,
        );
        let used = markers.used_ids.len();
        if used == 0 {
            log::warn!("none of {} detected markers are indexed", detections.len());
        }
        self.detections = detections.to_vec();
        self.grid.set_marker_correspondences(markers);
        Ok(used)
    }

    /// Fine corner adjustment from raw mouse deltas (screen y grows down).
    pub fn nudge_corner_by_mouse(&mut self, i: usize, dx: f64, dy: f64) -> Result<(), GridError> {
        let cc = &self.config.corner_control;
        let k = cc.sensitivity / cc.scaler;
        self.grid.nudge_corner(i, dx * k, -dy * k)
    }

    fn context(&self) -> ProjectionContext<'_> {
        let mut ctx = ProjectionContext::new(&self.grid, &self.config.measurement);
        if let Some((profile, pose)) = &self.camera {
            ctx = ctx.with_camera(profile, pose);
        }
        if let Some(image) = &self.image {
            ctx = ctx.with_image(image);
        }
        ctx
    }

    fn refresh(&mut self) -> Result<(), ProjectionError> {
        if self.grid.mode().uses_homography() {
            self.grid.ensure_transform()?;
        }
        Ok(())
    }

    pub fn project_for_display(&mut self) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        self.refresh()?;
        self.capture.project_for_display(&self.context())
    }

    pub fn project_for_export(&mut self) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        self.refresh()?;
        self.capture.project_for_export(&self.context())
    }

    /// Exported points with the configured axis flips and origin offset.
    pub fn measurements(&mut self) -> Result<Vec<Option<Point2<f64>>>, ProjectionError> {
        let m = self.config.measurement.clone();
        Ok(self
            .project_for_export()?
            .into_iter()
            .map(|p| p.map(|p| m.apply(p)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn mouse_nudge_is_scaled_and_y_flipped() {
        let mut s = Session::new(SessionConfig::default());
        s.nudge_corner_by_mouse(0, 256.0, 512.0).unwrap();
        assert_eq!(s.grid().corners()[0], Point2::new(-99.0, -102.0));
        assert_eq!(
            s.nudge_corner_by_mouse(4, 1.0, 1.0),
            Err(GridError::InvalidCorner(4))
        );
    }

    #[test]
    fn projection_recomputes_after_edits() {
        let mut s = Session::new(SessionConfig::default());
        s.capture_mut().capture_clicked(-100.0, -100.0);
        assert_eq!(s.project_for_export().unwrap()[0], Some(Point2::origin()));

        s.grid_mut().move_corner(0, -120.0, -100.0).unwrap();
        assert!(s.grid().is_dirty());
        let p = s.project_for_export().unwrap()[0].unwrap();
        assert!(!s.grid().is_dirty());
        // the old corner now lies inside the rectangle
        assert!(p.x > 0.0);
    }

    #[test]
    fn measurements_apply_flip_and_offset() {
        let mut s = Session::new(SessionConfig::default());
        s.set_measurement(MeasurementConfig {
            flip_x: false,
            flip_y: true,
            x_offset: 1.0,
            y_offset: 2.0,
        });
        let c2 = s.grid().corners()[2];
        s.capture_mut().capture_clicked(c2.x, c2.y);
        let m = s.measurements().unwrap()[0].unwrap();
        assert!((m - Point2::new(7.5, -13.0)).norm() < 1e-6);
    }

    #[test]
    fn markers_need_an_image() {
        let mut s = Session::new(SessionConfig::default());
        let lookup: HashMap<u32, Point2<f64>> = HashMap::new();
        assert!(matches!(
            s.apply_marker_detections(&[], &lookup),
            Err(ProjectionError::NoImage)
        ));
    }

    #[test]
    fn new_image_drops_marker_correspondences() {
        let mut s = Session::new(SessionConfig::default());
        s.set_mode(CalibrationMode::MarkerHomography);
        s.set_image(ImageFrame::new(640, 480));
        let lookup: HashMap<u32, Point2<f64>> = [(7, Point2::new(1.0, 1.0))].into();
        let det = MarkerDetection::new(
            7,
            [
                Point2::new(300.0, 200.0),
                Point2::new(340.0, 200.0),
                Point2::new(340.0, 240.0),
                Point2::new(300.0, 240.0),
            ],
        );
        assert_eq!(s.apply_marker_detections(&[det], &lookup).unwrap(), 1);
        assert_eq!(s.grid().marker_correspondences().len(), 4);

        s.set_image(ImageFrame::new(640, 480));
        assert!(s.detections().is_empty());
        assert!(s.grid().marker_correspondences().is_empty());
    }
}
