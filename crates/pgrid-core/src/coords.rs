//! Coordinate spaces.
//!
//! * **scene**: origin at the image centre, y up. Metric quantities inside
//!   calibration maths are carried ×[`SCENE_SCALE`].
//! * **uv**: raw pixel coordinates, origin top-left, y down.
//! * **world**: ground-plane metres.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Metric → internal scale used by every homography in scene space.
pub const SCENE_SCALE: f64 = 100.0;

/// Scale a metric world point into internal scene units.
#[inline]
pub fn metric_to_internal(p: Point2<f64>) -> Point2<f64> {
    Point2::new(p.x * SCENE_SCALE, p.y * SCENE_SCALE)
}

/// Undo [`metric_to_internal`].
#[inline]
pub fn internal_to_metric(p: Point2<f64>) -> Point2<f64> {
    Point2::new(p.x / SCENE_SCALE, p.y / SCENE_SCALE)
}

/// Pixel dimensions of the loaded image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
}

impl ImageFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Horizontal offset of the scene origin, in whole pixels.
    #[inline]
    fn half_width(&self) -> f64 {
        (self.width / 2) as f64
    }

    #[inline]
    fn half_height(&self) -> f64 {
        (self.height / 2) as f64
    }

    #[inline]
    pub fn scene_to_uv(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(p.x + self.half_width(), self.half_height() - p.y)
    }

    #[inline]
    pub fn uv_to_scene(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(p.x - self.half_width(), self.half_height() - p.y)
    }

    pub fn scene_to_uv_all(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter().map(|&p| self.scene_to_uv(p)).collect()
    }

    pub fn uv_to_scene_all(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter().map(|&p| self.uv_to_scene(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_origin_is_image_centre() {
        let frame = ImageFrame::new(4000, 3000);
        let uv = frame.scene_to_uv(Point2::new(0.0, 0.0));
        assert_eq!(uv, Point2::new(2000.0, 1500.0));
    }

    #[test]
    fn scene_y_points_up() {
        let frame = ImageFrame::new(640, 480);
        let uv = frame.scene_to_uv(Point2::new(-20.0, 100.0));
        assert_eq!(uv, Point2::new(300.0, 140.0));
        assert_eq!(frame.uv_to_scene(uv), Point2::new(-20.0, 100.0));
    }

    #[test]
    fn odd_sizes_halve_in_whole_pixels() {
        let frame = ImageFrame::new(641, 481);
        assert_eq!(frame.scene_to_uv(Point2::new(0.0, 0.0)), Point2::new(320.0, 240.0));
    }

    #[test]
    fn metric_scaling_round_trips() {
        let p = Point2::new(8.5, 15.0);
        let q = metric_to_internal(p);
        assert_eq!(q, Point2::new(850.0, 1500.0));
        assert_eq!(internal_to_metric(q), p);
    }
}
