use nalgebra::Point2;
use pgrid_core::ImageFrame;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::index::MarkerLookup;

/// Physical side length of the printed markers, in metres.
pub const DEFAULT_MARKER_SIZE: f64 = 0.30;

/// One detected fiducial as reported by the external detector.
///
/// `corners` are image pixels (uv) in the detector's winding: top-left,
/// top-right, bottom-right, bottom-left as seen in the upright image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub id: u32,
    pub corners: [Point2<f64>; 4],
}

impl MarkerDetection {
    pub fn new(id: u32, corners: [Point2<f64>; 4]) -> Self {
        Self { id, corners }
    }

    /// Quad corners converted to scene space.
    pub fn scene_corners(&self, frame: &ImageFrame) -> [Point2<f64>; 4] {
        self.corners.map(|p| frame.uv_to_scene(p))
    }
}

/// Scene ↔ world point pairs synthesised from marker detections.
///
/// `world` is metric; the calibration grid applies the internal scale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerCorrespondences {
    pub scene: Vec<Point2<f64>>,
    pub world: Vec<Point2<f64>>,
    /// Marker ids that contributed four pairs each, in input order.
    pub used_ids: Vec<u32>,
    /// Marker ids with no entry in the lookup.
    pub unknown_ids: Vec<u32>,
}

impl MarkerCorrespondences {
    pub fn len(&self) -> usize {
        self.scene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scene.is_empty()
    }
}

/// Quad corners of a marker in world space, anchored at its looked-up
/// position and ordered to pair with [`scene_quad`].
pub fn world_quad(anchor: Point2<f64>, size: f64) -> [Point2<f64>; 4] {
    [
        anchor,
        Point2::new(anchor.x, anchor.y + size),
        Point2::new(anchor.x + size, anchor.y + size),
        Point2::new(anchor.x + size, anchor.y),
    ]
}

/// Reorder detector corners to pair with [`world_quad`]: bottom-left,
/// top-left, top-right, bottom-right.
pub fn scene_quad(scene_corners: &[Point2<f64>; 4]) -> [Point2<f64>; 4] {
    [
        scene_corners[3],
        scene_corners[0],
        scene_corners[1],
        scene_corners[2],
    ]
}

/// Build correspondences for every detection whose id the lookup knows.
///
/// Unknown ids are skipped with a warning and listed in
/// [`MarkerCorrespondences::unknown_ids`].
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(detections, frame, lookup), fields(markers = detections.len()))
)]
pub fn build_correspondences<L: MarkerLookup + ?Sized>(
    detections: &[MarkerDetection],
    frame: &ImageFrame,
    lookup: &L,
    marker_size: f64,
) -> MarkerCorrespondences {
    let mut out = MarkerCorrespondences::default();

    for det in detections {
        let Some(anchor) = lookup.anchor(det.id) else {
            log::warn!("marker {} has no entry in the marker index, skipped", det.id);
            out.unknown_ids.push(det.id);
            continue;
        };
        out.scene.extend(scene_quad(&det.scene_corners(frame)));
        out.world.extend(world_quad(anchor, marker_size));
        out.used_ids.push(det.id);
    }

    log::debug!(
        "marker correspondences: {} markers, {} pairs, {} unknown",
        out.used_ids.len(),
        out.len(),
        out.unknown_ids.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn detection(id: u32) -> MarkerDetection {
        // upright 30 px marker with top-left at (100, 200)
        MarkerDetection::new(
            id,
            [
                Point2::new(100.0, 200.0),
                Point2::new(130.0, 200.0),
                Point2::new(130.0, 230.0),
                Point2::new(100.0, 230.0),
            ],
        )
    }

    #[test]
    fn each_marker_contributes_four_pairs() {
        let frame = ImageFrame::new(400, 400);
        let lookup: HashMap<u32, Point2<f64>> =
            [(3, Point2::new(1.0, 2.0)), (5, Point2::new(0.0, 0.0))].into();

        let c = build_correspondences(
            &[detection(3), detection(5)],
            &frame,
            &lookup,
            DEFAULT_MARKER_SIZE,
        );
        assert_eq!(c.len(), 8);
        assert_eq!(c.world.len(), 8);
        assert_eq!(c.used_ids, vec![3, 5]);
        assert!(c.unknown_ids.is_empty());
    }

    #[test]
    fn scene_and_world_windings_agree() {
        let frame = ImageFrame::new(400, 400);
        let lookup: HashMap<u32, Point2<f64>> = [(3, Point2::new(1.0, 2.0))].into();
        let c = build_correspondences(&[detection(3)], &frame, &lookup, 0.3);

        // bottom-left on screen pairs with the anchor
        assert_eq!(c.scene[0], Point2::new(-100.0, -30.0));
        assert_eq!(c.world[0], Point2::new(1.0, 2.0));
        // top-left pairs with anchor + (0, size)
        assert_eq!(c.scene[1], Point2::new(-100.0, 0.0));
        assert!((c.world[1].y - 2.3).abs() < 1e-12);
        // top-right pairs with anchor + (size, size)
        assert_eq!(c.scene[2], Point2::new(-70.0, 0.0));
        assert!((c.world[2].x - 1.3).abs() < 1e-12);
        assert!((c.world[2].y - 2.3).abs() < 1e-12);
        // bottom-right pairs with anchor + (size, 0)
        assert_eq!(c.scene[3], Point2::new(-70.0, -30.0));
        assert!((c.world[3].x - 1.3).abs() < 1e-12);
    }

    #[test]
    fn detection_reads_detector_json() {
        let d: MarkerDetection = serde_json::from_str(
            r#"{ "id": 3, "corners": [[100, 200], [130, 200], [130, 230], [100, 230]] }"#,
        )
        .unwrap();
        assert_eq!(d, detection(3));
    }

    #[test]
    fn unknown_ids_are_skipped() {
        let frame = ImageFrame::new(400, 400);
        let lookup: HashMap<u32, Point2<f64>> = HashMap::new();
        let c = build_correspondences(&[detection(9)], &frame, &lookup, 0.3);
        assert!(c.is_empty());
        assert_eq!(c.unknown_ids, vec![9]);
    }
}
