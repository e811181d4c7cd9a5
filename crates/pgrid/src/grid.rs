//! The calibration grid: four scene-space corners plus the scene ↔ world
//! transform implied by the active calibration mode.
//!
//! All geometry-affecting mutators only mark the grid dirty; the transform is
//! recomputed once, on the next [`CalibrationGrid::ensure_transform`].

use nalgebra::Point2;
use pgrid_core::{
    find_homography_robust, homography_from_4pt, metric_to_internal, Homography, SCENE_SCALE,
};
use pgrid_markers::MarkerCorrespondences;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{EstimationConfig, GridConfig, GRAB_RADIUS};
use crate::error::{CalibrationError, GridError};
use crate::mode::CalibrationMode;
use crate::reference::ReferencePoint;

/// Forward (world → scene) and inverse (scene → world) maps, both in
/// internal ×100 units on the world side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridTransforms {
    pub forward: Homography,
    pub inverse: Homography,
}

#[derive(Clone, Debug)]
pub struct CalibrationGrid {
    corners: [Point2<f64>; 4],
    mode: CalibrationMode,
    width: f64,
    height: f64,
    divs_x: u32,
    divs_y: u32,
    grid_interval: [f64; 2],
    references: Vec<ReferencePoint>,
    markers: MarkerCorrespondences,
    estimation: EstimationConfig,
    transforms: Option<GridTransforms>,
    last_error: Option<CalibrationError>,
    dirty: bool,
}

impl CalibrationGrid {
    pub fn new(grid: &GridConfig, mode: CalibrationMode, estimation: EstimationConfig) -> Self {
        Self {
            corners: grid.corner_points(),
            mode,
            width: grid.width,
            height: grid.height,
            divs_x: grid.divs_x,
            divs_y: grid.divs_y,
            grid_interval: [grid.grid_interval_x, grid.grid_interval_y],
            references: Vec::new(),
            markers: MarkerCorrespondences::default(),
            estimation,
            transforms: None,
            last_error: None,
            dirty: true,
        }
    }

    #[inline]
    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Switch calibration mode. The previous transform is discarded.
    pub fn set_mode(&mut self, mode: CalibrationMode) {
        if mode != self.mode {
            log::info!("calibration mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        self.invalidate();
    }

    #[inline]
    pub fn corners(&self) -> &[Point2<f64>; 4] {
        &self.corners
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.height
    }

    #[inline]
    pub fn divisions(&self) -> (u32, u32) {
        (self.divs_x, self.divs_y)
    }

    pub fn set_dimensions(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
        self.invalidate();
    }

    pub fn set_divisions(&mut self, divs_x: u32, divs_y: u32) {
        self.divs_x = divs_x;
        self.divs_y = divs_y;
        self.invalidate();
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Outcome of the most recent computation, `None` when it succeeded.
    pub fn last_error(&self) -> Option<&CalibrationError> {
        self.last_error.as_ref()
    }

    /// Current transforms, if computed, fresh and valid.
    pub fn transforms(&self) -> Option<&GridTransforms> {
        if self.dirty {
            None
        } else {
            self.transforms.as_ref()
        }
    }

    pub fn forward(&self) -> Option<&Homography> {
        self.transforms().map(|t| &t.forward)
    }

    pub fn inverse(&self) -> Option<&Homography> {
        self.transforms().map(|t| &t.inverse)
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        self.transforms = None;
    }

    /// Index of the first corner within the grab radius of `(x, y)`.
    pub fn grab(&self, x: f64, y: f64) -> Option<usize> {
        let q = Point2::new(x, y);
        self.corners
            .iter()
            .position(|c| (c - q).norm() <= GRAB_RADIUS)
    }

    fn corner_mut(&mut self, i: usize) -> Result<&mut Point2<f64>, GridError> {
        match self.corners.get_mut(i) {
            Some(c) => Ok(c),
            None => {
                log::warn!("invalid corner index {i}");
                Err(GridError::InvalidCorner(i))
            }
        }
    }

    pub fn move_corner(&mut self, i: usize, x: f64, y: f64) -> Result<(), GridError> {
        *self.corner_mut(i)? = Point2::new(x, y);
        self.invalidate();
        Ok(())
    }

    pub fn nudge_corner(&mut self, i: usize, dx: f64, dy: f64) -> Result<(), GridError> {
        let c = self.corner_mut(i)?;
        c.x += dx;
        c.y += dy;
        self.invalidate();
        Ok(())
    }

    pub fn reference_points(&self) -> &[ReferencePoint] {
        &self.references
    }

    /// Append a reference point at a scene position and recompute at once.
    ///
    /// The point is kept even if the recomputation fails; the returned error
    /// only reports the calibration state.
    pub fn add_reference_point(&mut self, x: f64, y: f64) -> Result<(), CalibrationError> {
        self.push_reference_point(x, y);
        self.compute_transform()
    }

    /// Append a reference point without recomputing; returns its index.
    ///
    /// For batch loading, where world coordinates are assigned afterwards.
    pub fn push_reference_point(&mut self, x: f64, y: f64) -> usize {
        let idx = self.references.len();
        self.references
            .push(ReferencePoint::new(Point2::new(x, y), idx));
        self.invalidate();
        idx
    }

    fn reference_mut(&mut self, i: usize) -> Result<&mut ReferencePoint, GridError> {
        let len = self.references.len();
        match self.references.get_mut(i) {
            Some(r) => Ok(r),
            None => {
                log::warn!("invalid reference point index {i} ({len} points)");
                Err(GridError::InvalidReferencePoint { index: i, len })
            }
        }
    }

    /// Assign the world coordinate (metres) of reference point `i`.
    pub fn set_reference_world(&mut self, i: usize, x: f64, y: f64) -> Result<(), GridError> {
        self.reference_mut(i)?.set_world(x, y);
        self.invalidate();
        Ok(())
    }

    /// Assign reference point `i` to grid cell `(gi, gj)`.
    pub fn set_reference_grid_coords(
        &mut self,
        i: usize,
        gi: i32,
        gj: i32,
    ) -> Result<(), GridError> {
        let [ix, iy] = self.grid_interval;
        self.reference_mut(i)?.set_grid_coords(gi, gj, ix, iy);
        self.invalidate();
        Ok(())
    }

    pub fn remove_reference_point(&mut self, i: usize) -> Result<ReferencePoint, GridError> {
        self.reference_mut(i)?;
        let removed = self.references.remove(i);
        for (k, r) in self.references.iter_mut().enumerate().skip(i) {
            r.set_index(k);
        }
        self.invalidate();
        Ok(removed)
    }

    pub fn marker_correspondences(&self) -> &MarkerCorrespondences {
        &self.markers
    }

    pub fn set_marker_correspondences(&mut self, markers: MarkerCorrespondences) {
        self.markers = markers;
        self.invalidate();
    }

    /// Recompute only if something changed since the last computation.
    pub fn ensure_transform(&mut self) -> Result<&GridTransforms, CalibrationError> {
        if self.dirty {
            // the error is kept in `last_error` and re-reported below
            let _ = self.compute_transform();
        }
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        self.transforms
            .as_ref()
            .ok_or(CalibrationError::NoPlanarTransform(self.mode))
    }

    /// Recompute the forward and inverse transforms for the active mode.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(mode = %self.mode))
    )]
    pub fn compute_transform(&mut self) -> Result<(), CalibrationError> {
        let result = match self.mode {
            CalibrationMode::CornerRect => self.solve_corner_rect().map(Some),
            CalibrationMode::ReferenceHomography => {
                let (scene, world): (Vec<_>, Vec<_>) = self
                    .references
                    .iter()
                    .map(|r| (r.scene(), metric_to_internal(r.world())))
                    .unzip();
                self.solve_correspondences(&scene, &world).map(Some)
            }
            CalibrationMode::MarkerHomography => {
                let world: Vec<_> = self
                    .markers
                    .world
                    .iter()
                    .map(|&p| metric_to_internal(p))
                    .collect();
                let scene = self.markers.scene.clone();
                self.solve_correspondences(&scene, &world).map(Some)
            }
            CalibrationMode::Markerless => Ok(None),
        };

        self.dirty = false;
        match result {
            Ok(transforms) => {
                // homography modes redraw the grid from the recovered plane
                if let Some(t) = transforms.filter(|_| self.mode != CalibrationMode::CornerRect) {
                    self.corners = self.canonical_corners(&t.forward);
                }
                self.transforms = transforms;
                self.last_error = None;
                log::debug!("{} calibration updated", self.mode);
                Ok(())
            }
            Err(err) => {
                match &err {
                    CalibrationError::NotEnoughCorrespondences { .. } => log::info!("{err}"),
                    _ => log::warn!("calibration invalid: {err}"),
                }
                self.transforms = None;
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// World rectangle in internal units anchored at corner 0.
    fn anchored_rectangle(&self) -> [Point2<f64>; 4] {
        let o = self.corners[0];
        let w = self.width * SCENE_SCALE;
        let h = self.height * SCENE_SCALE;
        [
            o,
            Point2::new(o.x, o.y + h),
            Point2::new(o.x + w, o.y + h),
            Point2::new(o.x + w, o.y),
        ]
    }

    /// The canonical `W × H` rectangle at the world origin, internal units.
    fn canonical_rectangle(&self) -> [Point2<f64>; 4] {
        let w = self.width * SCENE_SCALE;
        let h = self.height * SCENE_SCALE;
        [
            Point2::new(0.0, 0.0),
            Point2::new(0.0, h),
            Point2::new(w, h),
            Point2::new(w, 0.0),
        ]
    }

    fn canonical_corners(&self, forward: &Homography) -> [Point2<f64>; 4] {
        let rect = self.canonical_rectangle();
        let mut out = self.corners;
        for (dst, p) in out.iter_mut().zip(rect) {
            match forward.try_apply(p) {
                Some(q) => *dst = q,
                None => log::warn!("grid corner {p} maps to infinity, left in place"),
            }
        }
        out
    }

    fn solve_corner_rect(&self) -> Result<GridTransforms, CalibrationError> {
        let scene = self.corners;
        let world = self.anchored_rectangle();
        let forward = self.checked(homography_from_4pt(&world, &scene)?)?;
        let inverse = self.checked(homography_from_4pt(&scene, &world)?)?;
        Ok(GridTransforms { forward, inverse })
    }

    fn solve_correspondences(
        &self,
        scene: &[Point2<f64>],
        world: &[Point2<f64>],
    ) -> Result<GridTransforms, CalibrationError> {
        if scene.len() < 4 {
            return Err(CalibrationError::NotEnoughCorrespondences {
                mode: self.mode,
                got: scene.len(),
            });
        }
        let cfg = &self.estimation.ransac;
        let forward = find_homography_robust(world, scene, cfg)?;
        let inverse = find_homography_robust(scene, world, cfg)?;
        log::debug!(
            "{}: forward {} / inverse {} inliers of {}",
            self.mode,
            forward.inliers.len(),
            inverse.inliers.len(),
            scene.len()
        );
        Ok(GridTransforms {
            forward: self.checked(forward.model)?,
            inverse: self.checked(inverse.model)?,
        })
    }

    fn checked(&self, h: Homography) -> Result<Homography, CalibrationError> {
        let condition = h.condition_number();
        if condition.is_finite() && condition <= self.estimation.max_condition {
            Ok(h)
        } else {
            Err(CalibrationError::IllConditioned { condition })
        }
    }

    /// Scene-space endpoints of the interior division lines.
    ///
    /// Lines are laid out on the world rectangle spanned by the corners and
    /// mapped back through the forward transform. Empty in markerless mode.
    pub fn division_lines(&mut self) -> Result<Vec<[Point2<f64>; 2]>, CalibrationError> {
        if !self.mode.uses_homography() {
            return Ok(Vec::new());
        }
        let t = *self.ensure_transform()?;
        let (Some(o0), Some(o1), Some(o3)) = (
            t.inverse.try_apply(self.corners[0]),
            t.inverse.try_apply(self.corners[1]),
            t.inverse.try_apply(self.corners[3]),
        ) else {
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        let x_step = self.width * SCENE_SCALE / self.divs_x.max(1) as f64;
        for i in 1..self.divs_x {
            let dx = x_step * i as f64;
            let a = Point2::new(o0.x + dx, o0.y);
            let b = Point2::new(o1.x + dx, o1.y);
            if let (Some(a), Some(b)) = (t.forward.try_apply(a), t.forward.try_apply(b)) {
                lines.push([a, b]);
            }
        }
        let y_step = self.height * SCENE_SCALE / self.divs_y.max(1) as f64;
        for j in 1..self.divs_y {
            let dy = y_step * j as f64;
            let a = Point2::new(o0.x, o0.y + dy);
            let b = Point2::new(o3.x, o3.y + dy);
            if let (Some(a), Some(b)) = (t.forward.try_apply(a), t.forward.try_apply(b)) {
                lines.push([a, b]);
            }
        }
        Ok(lines)
    }
}
