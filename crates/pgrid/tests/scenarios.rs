use approx::assert_abs_diff_eq;
use nalgebra::{Matrix3, Point2};
use pgrid::core::{Homography, ImageFrame};
use pgrid::markers::{MarkerDetection, MarkerIndex};
use pgrid::{
    CalibrationError, CalibrationMode, CalibrationProfile, CameraPose, MeasurementConfig,
    ProjectionError, Session, SessionConfig,
};

fn assert_point(actual: Option<Point2<f64>>, x: f64, y: f64) {
    let p = actual.expect("point should project");
    assert_abs_diff_eq!(p.x, x, epsilon = 1e-6);
    assert_abs_diff_eq!(p.y, y, epsilon = 1e-6);
}

/// Ground plane (metres ×100) as seen from a camera looking down the field.
fn ground_to_scene() -> Homography {
    Homography::from_array([
        [0.5, 0.1, -250.0],
        [0.0, 0.3, -280.0],
        [0.0, 0.0003, 1.0],
    ])
}

fn scene_of(world_x: f64, world_y: f64) -> Point2<f64> {
    ground_to_scene().apply(Point2::new(world_x * 100.0, world_y * 100.0))
}

fn session(mode: CalibrationMode) -> Session {
    Session::new(SessionConfig {
        mode,
        ..SessionConfig::default()
    })
}

#[test]
fn corner_rect_corners_export_to_rectangle() {
    let mut s = session(CalibrationMode::CornerRect);
    let corners = [(-100.0, -100.0), (-180.0, 210.0), (160.0, 220.0), (90.0, -120.0)];
    for (i, (x, y)) in corners.into_iter().enumerate() {
        s.grid_mut().move_corner(i, x, y).unwrap();
    }
    for (x, y) in corners {
        s.capture_mut().capture_clicked(x, y);
    }

    let out = s.project_for_export().unwrap();
    assert_point(out[0], 0.0, 0.0);
    assert_point(out[1], 0.0, 15.0);
    assert_point(out[2], 8.5, 15.0);
    assert_point(out[3], 8.5, 0.0);
}

#[test]
fn corner_rect_display_stays_in_scaled_units() {
    let mut s = session(CalibrationMode::CornerRect);
    let c2 = s.grid().corners()[2];
    s.capture_mut().capture_clicked(c2.x, c2.y);

    let display = s.project_for_display().unwrap();
    let export = s.project_for_export().unwrap();
    assert_point(display[0], 850.0, 1500.0);
    assert_point(export[0], 8.5, 15.0);
}

#[test]
fn reference_homography_rejects_a_mistyped_point() {
    let mut s = session(CalibrationMode::ReferenceHomography);
    let world = [
        (0.0, 0.0),
        (8.0, 0.0),
        (8.0, 9.0),
        (0.0, 9.0),
        (3.0, 2.0),
        (5.0, 6.5),
        (1.5, 7.0),
        (6.5, 3.5),
    ];
    for (i, (wx, wy)) in world.into_iter().enumerate() {
        let p = scene_of(wx, wy);
        let _ = s.grid_mut().add_reference_point(p.x, p.y);
        s.grid_mut().set_reference_world(i, wx, wy).unwrap();
    }
    // clicked at (7, 1) but typed in as (3, 3)
    let bad = scene_of(7.0, 1.0);
    let _ = s.grid_mut().add_reference_point(bad.x, bad.y);
    s.grid_mut().set_reference_world(world.len(), 3.0, 3.0).unwrap();

    let probe = scene_of(4.25, 4.75);
    s.capture_mut().capture_clicked(probe.x, probe.y);
    let out = s.project_for_export().unwrap();
    assert_point(out[0], 4.25, 4.75);

    // the grid outline follows the recovered plane
    let c0 = s.grid().corners()[0];
    let expected = scene_of(0.0, 0.0);
    assert_abs_diff_eq!(c0.x, expected.x, epsilon = 1e-6);
    assert_abs_diff_eq!(c0.y, expected.y, epsilon = 1e-6);
}

#[test]
fn reference_homography_reports_missing_points() {
    let mut s = session(CalibrationMode::ReferenceHomography);
    for (x, y) in [(0.0, 0.0), (50.0, 0.0), (0.0, 50.0)] {
        let _ = s.grid_mut().add_reference_point(x, y);
    }
    s.capture_mut().capture_clicked(10.0, 10.0);
    let err = s.project_for_export().unwrap_err();
    assert!(matches!(
        err,
        ProjectionError::Calibration(CalibrationError::NotEnoughCorrespondences { got: 3, .. })
    ));
}

#[test]
fn unassigned_references_are_an_invalid_calibration() {
    let mut s = session(CalibrationMode::ReferenceHomography);
    // world coordinates never typed in: all (0, 0)
    for (x, y) in [(0.0, 0.0), (50.0, 0.0), (0.0, 50.0), (60.0, 70.0)] {
        let _ = s.grid_mut().add_reference_point(x, y);
    }
    s.capture_mut().capture_clicked(10.0, 10.0);
    assert!(matches!(
        s.project_for_export(),
        Err(ProjectionError::Calibration(_))
    ));
}

/// Detector output for a marker anchored at `anchor` (metres), in pixels.
fn detect(id: u32, anchor: (f64, f64), frame: &ImageFrame) -> MarkerDetection {
    let (x, y) = anchor;
    let s = 0.30;
    let px = |wx: f64, wy: f64| frame.scene_to_uv(scene_of(wx, wy));
    // detector winding TL, TR, BR, BL; BL is the anchor
    MarkerDetection::new(
        id,
        [px(x, y + s), px(x + s, y + s), px(x + s, y), px(x, y)],
    )
}

#[test]
fn marker_homography_end_to_end() {
    let frame = ImageFrame::new(1280, 960);
    let anchors = [(0, (0.0, 0.0)), (1, (8.0, 0.0)), (2, (0.0, 8.0)), (3, (8.0, 8.0)), (4, (4.0, 4.0))];
    let mut index = MarkerIndex::new();
    for (id, (x, y)) in anchors {
        index.insert(id, Point2::new(x, y));
    }
    let detections: Vec<_> = anchors
        .iter()
        .map(|&(id, a)| detect(id, a, &frame))
        .chain(std::iter::once(detect(77, (2.0, 2.0), &frame)))
        .collect();

    let mut s = session(CalibrationMode::MarkerHomography);
    s.set_image(frame);
    assert_eq!(s.apply_marker_detections(&detections, &index).unwrap(), 5);
    assert_eq!(s.grid().marker_correspondences().unknown_ids, vec![77]);

    for (wx, wy) in [(1.0, 2.0), (6.0, 7.5)] {
        let p = scene_of(wx, wy);
        s.capture_mut().capture_clicked(p.x, p.y);
    }
    let out = s.project_for_export().unwrap();
    assert_point(out[0], 1.0, 2.0);
    assert_point(out[1], 6.0, 7.5);

    let display = s.project_for_display().unwrap();
    assert_point(display[0], 100.0, 200.0);
}

fn phone_camera() -> (CalibrationProfile, CameraPose) {
    let k = Matrix3::new(1000.0, 0.0, 2000.0, 0.0, 1000.0, 1500.0, 0.0, 0.0, 1.0);
    let pose = CameraPose {
        z_pos: 150.0,
        ..CameraPose::default()
    };
    (CalibrationProfile::new(k, 4.2), pose)
}

#[test]
fn markerless_projects_through_camera_pose() {
    let mut s = session(CalibrationMode::Markerless);
    s.set_image(ImageFrame::new(4000, 3000));
    let (profile, pose) = phone_camera();
    s.set_camera(profile, pose);
    s.set_measurement(MeasurementConfig {
        flip_y: true,
        ..MeasurementConfig::default()
    });

    // uv (2000, 2500) and (3000, 2500); then a point above the horizon
    s.capture_mut().capture_clicked(0.0, -1000.0);
    s.capture_mut().capture_clicked(1000.0, -1000.0);
    s.capture_mut().capture_clicked(0.0, 500.0);

    let out = s.project_for_export().unwrap();
    assert_point(out[0], 0.0, 1.5);
    assert_point(out[1], 1.5, 1.5);
    assert_eq!(out[2], None);

    let m = s.measurements().unwrap();
    assert_point(m[0], 0.0, -1.5);
    assert_eq!(m[2], None);
}

#[test]
fn switching_modes_changes_requirements() {
    let mut s = session(CalibrationMode::CornerRect);
    s.capture_mut().capture_clicked(-100.0, -100.0);
    assert!(s.project_for_export().is_ok());

    s.set_mode(CalibrationMode::Markerless);
    assert!(matches!(
        s.project_for_export(),
        Err(ProjectionError::NoImage)
    ));

    s.set_mode(CalibrationMode::CornerRect);
    assert!(s.grid().is_dirty());
    assert_point(s.project_for_export().unwrap()[0], 0.0, 0.0);
}
