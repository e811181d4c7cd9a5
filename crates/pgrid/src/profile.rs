//! Camera intrinsics, lens distortion and pose, plus the markerless
//! ground-plane projection built on them.

use std::path::Path;

use nalgebra::{Matrix2x3, Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::ProfileError;

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERS: usize = 20;

/// Rays closer than this to horizontal never reach the ground.
const PARALLEL_EPS: f64 = 1e-12;

/// Brown–Conrady lens distortion on normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Build from coefficients in `(k1, k2, p1, p2[, k3])` order.
    pub fn from_coeffs(coeffs: &[f64]) -> Option<Self> {
        match *coeffs {
            [k1, k2, p1, p2] => Some(Self { k1, k2, p1, p2, k3: 0.0 }),
            [k1, k2, p1, p2, k3, ..] => Some(Self { k1, k2, p1, p2, k3 }),
            _ => None,
        }
    }

    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let xy = x * y;
        let x_tan = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        (x * radial + x_tan, y * radial + y_tan)
    }

    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERS {
            let (ex, ey) = self.distort(x, y);
            x -= ex - xd;
            y -= ey - yd;
        }
        (x, y)
    }
}

/// Camera position and orientation relative to the ground plane.
///
/// Positions share units with the projected output; angles are degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPose {
    pub x_pos: f64,
    pub y_pos: f64,
    /// Height above the ground.
    pub z_pos: f64,
    /// Not applied by the projection yet.
    pub pitch_angle: f64,
    /// Rotation of the ground result about the camera foot point.
    pub yaw_angle: f64,
}

/// Inner-corner layout of a checkerboard used for intrinsic calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerboardSize {
    pub cols: u32,
    pub rows: u32,
}

/// Result of an intrinsic calibration run.
#[derive(Clone, Debug, PartialEq)]
pub struct IntrinsicEstimate {
    pub camera_matrix: Matrix3<f64>,
    /// Coefficients in `(k1, k2, p1, p2[, k3])` order.
    pub distortion: Vec<f64>,
}

/// Source of camera intrinsics, e.g. a checkerboard calibration over a
/// directory of photographs.
pub trait IntrinsicCalibrator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn calibrate(
        &self,
        image_dir: &Path,
        board: CheckerboardSize,
    ) -> Result<IntrinsicEstimate, Self::Error>;
}

/// Intrinsics and lens model of one device at one zoom setting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    #[serde(default)]
    pub descriptor: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub zoom_level: f64,
    #[serde(rename = "camera_matrix", with = "row_major")]
    pub intrinsics: Matrix3<f64>,
    #[serde(default)]
    pub distortion: Option<Distortion>,
    pub focal_length_mm: f64,
}

impl CalibrationProfile {
    pub fn new(intrinsics: Matrix3<f64>, focal_length_mm: f64) -> Self {
        Self {
            descriptor: String::new(),
            device: String::new(),
            zoom_level: 0.0,
            intrinsics,
            distortion: None,
            focal_length_mm,
        }
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = Some(distortion);
        self
    }

    fn intrinsics_inverse(&self) -> Result<Matrix3<f64>, ProfileError> {
        self.intrinsics
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or(ProfileError::SingularIntrinsics)
    }

    /// Remove lens distortion from pixel coordinates.
    ///
    /// Output stays in pixels: each point is normalized through `K⁻¹`,
    /// undistorted, and mapped back through `K`. Without a distortion model
    /// points pass through untouched. This differs from OpenCV's
    /// `undistortPoints`, which returns normalized coordinates even when no
    /// coefficients are given; downstream projection expects pixels.
    pub fn undistort_points(&self, pts: &[Point2<f64>]) -> Result<Vec<Point2<f64>>, ProfileError> {
        let Some(dist) = self.distortion else {
            return Ok(pts.to_vec());
        };
        let k_inv = self.intrinsics_inverse()?;
        Ok(pts
            .iter()
            .map(|p| {
                let n = k_inv * Vector3::new(p.x, p.y, 1.0);
                let (x, y) = dist.undistort(n.x / n.z, n.y / n.z);
                let q = self.intrinsics * Vector3::new(x, y, 1.0);
                Point2::new(q.x / q.z, q.y / q.z)
            })
            .collect())
    }

    /// Intersect the camera ray through each pixel with the ground plane.
    ///
    /// Pixels whose ray is parallel to, or points away from, the ground come
    /// back as `None`, keeping the output aligned with the input.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, pts), fields(n = pts.len()))
    )]
    pub fn ground_plane_project(
        &self,
        pts: &[Point2<f64>],
        pose: &CameraPose,
    ) -> Result<Vec<Option<Point2<f64>>>, ProfileError> {
        if pose.pitch_angle != 0.0 {
            log::warn!("camera pitch {} ignored by ground projection", pose.pitch_angle);
        }
        let k_inv = self.intrinsics_inverse()?;
        let t = Vector3::new(pose.x_pos, pose.y_pos, pose.z_pos);
        // fixed camera-to-ground axis permutation; pitch is not folded in
        let r_cam = Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0);
        let ray_scale = self.focal_length_mm / 10.0;
        let yaw = yaw_rotation(Point2::new(pose.x_pos, pose.y_pos), pose.yaw_angle);

        let out = pts
            .iter()
            .map(|p| {
                let ray = k_inv * Vector3::new(p.x, p.y, 1.0) * ray_scale;
                let w = r_cam * ray + t;
                let dz = w.z - t.z;
                if dz.abs() < PARALLEL_EPS {
                    return None;
                }
                let s = t.z / dz;
                if s.is_nan() || s <= 0.0 {
                    return None;
                }
                let ix = (w.x - t.x) * s + t.x;
                let iy = -(w.y - t.y) * s + t.y;
                let g = yaw * Vector3::new(ix, iy, 1.0);
                (g.x.is_finite() && g.y.is_finite()).then(|| Point2::new(g.x, g.y))
            })
            .collect::<Vec<_>>();

        let rejected = out.iter().filter(|p| p.is_none()).count();
        if rejected > 0 {
            log::debug!("{rejected} of {} pixels do not reach the ground", pts.len());
        }
        Ok(out)
    }

    /// Replace intrinsics and distortion with a fresh calibration.
    pub fn calibrate_with<C: IntrinsicCalibrator>(
        &mut self,
        calibrator: &C,
        image_dir: &Path,
        board: CheckerboardSize,
    ) -> Result<(), ProfileError> {
        let estimate = calibrator
            .calibrate(image_dir, board)
            .map_err(|e| ProfileError::Calibrator(Box::new(e)))?;
        if estimate.camera_matrix.try_inverse().is_none() {
            return Err(ProfileError::SingularIntrinsics);
        }
        self.intrinsics = estimate.camera_matrix;
        self.distortion = Distortion::from_coeffs(&estimate.distortion);
        log::info!(
            "calibrated {} from {} ({}x{} board)",
            if self.device.is_empty() { "camera" } else { self.device.as_str() },
            image_dir.display(),
            board.cols,
            board.rows
        );
        Ok(())
    }
}

fn sin_deg(deg: f64) -> f64 {
    (deg % 360.0).to_radians().sin()
}

fn cos_deg(deg: f64) -> f64 {
    (deg % 360.0).to_radians().cos()
}

/// 2×3 affine rotation by `angle_deg` about `center`.
fn yaw_rotation(center: Point2<f64>, angle_deg: f64) -> Matrix2x3<f64> {
    let a = cos_deg(angle_deg);
    let b = sin_deg(angle_deg);
    Matrix2x3::new(
        a,
        b,
        (1.0 - a) * center.x - b * center.y,
        -b,
        a,
        b * center.x + (1.0 - a) * center.y,
    )
}

/// Serialize a 3×3 matrix as nested rows.
mod row_major {
    use nalgebra::Matrix3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &Matrix3<f64>, s: S) -> Result<S::Ok, S::Error> {
        let rows: [[f64; 3]; 3] = std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]));
        rows.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Matrix3<f64>, D::Error> {
        let rows = <[[f64; 3]; 3]>::deserialize(d)?;
        Ok(Matrix3::from_fn(|r, c| rows[r][c]))
    }
}
