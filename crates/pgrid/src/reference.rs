use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A scene-space anchor paired with a user-assigned world coordinate.
///
/// The world coordinate starts at `(0, 0)` and is never validated: duplicate
/// or collinear references only show up later as a degenerate calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    scene: Point2<f64>,
    index: usize,
    /// World x in metres.
    pub ref_x: f64,
    /// World y in metres.
    pub ref_y: f64,
    grid_coords: Option<[i32; 2]>,
}

impl ReferencePoint {
    pub fn new(scene: Point2<f64>, index: usize) -> Self {
        Self {
            scene,
            index,
            ref_x: 0.0,
            ref_y: 0.0,
            grid_coords: None,
        }
    }

    #[inline]
    pub fn scene(&self) -> Point2<f64> {
        self.scene
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn world(&self) -> Point2<f64> {
        Point2::new(self.ref_x, self.ref_y)
    }

    pub fn set_world(&mut self, x: f64, y: f64) {
        self.ref_x = x;
        self.ref_y = y;
        self.grid_coords = None;
    }

    /// Place the reference on grid cell `(i, j)`; the world coordinate
    /// becomes `(interval_x · i, interval_y · j)`.
    pub fn set_grid_coords(&mut self, i: i32, j: i32, interval_x: f64, interval_y: f64) {
        self.ref_x = interval_x * i as f64;
        self.ref_y = interval_y * j as f64;
        self.grid_coords = Some([i, j]);
    }

    /// Grid cell the world coordinate was derived from, if any.
    pub fn grid_coords(&self) -> Option<[i32; 2]> {
        self.grid_coords
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }
}
