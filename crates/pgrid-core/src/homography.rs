use std::f64::consts::SQRT_2;

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector2};
use serde::{Deserialize, Serialize};

/// Smallest `|w|` accepted when dehomogenizing a mapped point.
const MIN_W: f64 = 1e-12;

/// Errors produced while solving for a homography.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("correspondence lists differ in length ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("linear system is singular (degenerate point configuration)")]
    Singular,
    #[error("svd failed")]
    SvdFailed,
    #[error("no consensus: best model has {inliers} inliers, need {needed}")]
    NoConsensus { inliers: usize, needed: usize },
}

/// A 3×3 projective map `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Build from row-major nested arrays.
    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        std::array::from_fn(|r| std::array::from_fn(|c| self.h[(r, c)]))
    }

    /// Map a point. Points on the line at infinity come back non-finite;
    /// use [`Homography::try_apply`] when that matters.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * p.to_homogeneous();
        Point2::new(v.x / v.z, v.y / v.z)
    }

    /// Map a point, returning `None` when it lands at infinity.
    #[inline]
    pub fn try_apply(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        let v = self.h * p.to_homogeneous();
        if v.z.abs() < MIN_W {
            return None;
        }
        let q = Point2::new(v.x / v.z, v.y / v.z);
        (q.x.is_finite() && q.y.is_finite()).then_some(q)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Ratio of the largest to the smallest singular value.
    ///
    /// Returns `f64::INFINITY` for singular or non-finite matrices.
    pub fn condition_number(&self) -> f64 {
        if !self.is_finite() {
            return f64::INFINITY;
        }
        let sv = self.h.svd(false, false).singular_values;
        let (max, min) = (sv.max(), sv.min());
        if min <= 0.0 {
            f64::INFINITY
        } else {
            max / min
        }
    }

    pub fn is_finite(&self) -> bool {
        self.h.iter().all(|v| v.is_finite())
    }
}

/// Similarity moving a point set's centroid to the origin and its mean
/// radius to √2. Solving in conditioned coordinates keeps the linear
/// systems well scaled for scene-sized inputs.
#[derive(Clone, Copy, Debug)]
struct Conditioning {
    centroid: Vector2<f64>,
    scale: f64,
}

impl Conditioning {
    fn fit(pts: &[Point2<f64>]) -> Self {
        let n = pts.len() as f64;
        let centroid = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
        let mean_radius = pts.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n;
        let scale = if mean_radius > 1e-12 {
            SQRT_2 / mean_radius
        } else {
            1.0
        };
        Self { centroid, scale }
    }

    fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::from((p.coords - self.centroid) * self.scale)
    }

    fn matrix(&self) -> Matrix3<f64> {
        let (s, c) = (self.scale, self.centroid);
        Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        let (s, c) = (1.0 / self.scale, self.centroid);
        Matrix3::new(s, 0.0, c.x, 0.0, s, c.y, 0.0, 0.0, 1.0)
    }
}

/// The two linear constraints `(p → q)` places on the row-major entries of H.
fn constraint_rows(p: Point2<f64>, q: Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y, u, v) = (p.x, p.y, q.x, q.y);
    [
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
        [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
    ]
}

/// Condition both point sets, solve, and map the result back.
fn solve_conditioned<F>(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    solve: F,
) -> Result<Homography, HomographyError>
where
    F: FnOnce(&[Point2<f64>], &[Point2<f64>]) -> Result<Matrix3<f64>, HomographyError>,
{
    let cs = Conditioning::fit(src);
    let cd = Conditioning::fit(dst);
    let src_c: Vec<_> = src.iter().map(|&p| cs.apply(p)).collect();
    let dst_c: Vec<_> = dst.iter().map(|&p| cd.apply(p)).collect();

    let h = cd.inverse_matrix() * solve(&src_c, &dst_c)? * cs.matrix();
    let w = h[(2, 2)];
    // also rejects NaN
    if !(w.abs() >= 1e-12) {
        return Err(HomographyError::Singular);
    }
    Ok(Homography::new(h / w))
}

/// Exact solve with `h33 = 1` for four correspondences.
fn solve_exact(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>, HomographyError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (&p, &q)) in src.iter().zip(dst).enumerate() {
        for (r, row) in constraint_rows(p, q).iter().enumerate() {
            let i = 2 * k + r;
            for (c, &val) in row[..8].iter().enumerate() {
                a[(i, c)] = val;
            }
            b[i] = -row[8];
        }
    }
    let x = a.lu().solve(&b).ok_or(HomographyError::Singular)?;
    Ok(Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0))
}

/// Null vector of the stacked constraints (least squares for `n ≥ 5`).
fn solve_least_squares(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Matrix3<f64>, HomographyError> {
    let mut a = DMatrix::<f64>::zeros(2 * src.len(), 9);
    for (k, (&p, &q)) in src.iter().zip(dst).enumerate() {
        for (r, row) in constraint_rows(p, q).iter().enumerate() {
            for (c, &val) in row.iter().enumerate() {
                a[(2 * k + r, c)] = val;
            }
        }
    }
    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    if v_t.nrows() < 9 {
        return Err(HomographyError::SvdFailed);
    }
    let (smallest, _) = svd.singular_values.argmin();
    let h = v_t.row(smallest);
    Ok(Matrix3::from_fn(|r, c| h[3 * r + c]))
}

fn check_lengths(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<(), HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(HomographyError::NotEnoughPoints(src.len()));
    }
    Ok(())
}

/// Least-squares DLT estimate of `H` such that `dst ~ H * src`.
///
/// Exactly four correspondences are routed to [`homography_from_4pt`].
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    check_lengths(src, dst)?;
    if src.len() == 4 {
        return solve_conditioned(src, dst, solve_exact);
    }
    solve_conditioned(src, dst, solve_least_squares)
}

/// `H` with `dst ~ H * src` from exactly four correspondences.
///
/// Corner order must agree between `src` and `dst`. Three collinear points on
/// either side make the system singular.
pub fn homography_from_4pt(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Result<Homography, HomographyError> {
    solve_conditioned(src, dst, solve_exact)
}
