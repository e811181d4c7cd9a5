//! Outlier-tolerant homography estimation.
//!
//! A small, model-agnostic RANSAC loop ([`ransac`]) driven by the
//! [`Estimator`] trait, plus the homography estimator used by the
//! calibration grid. Sampling uses a seeded `StdRng`, so repeated runs on
//! identical input return identical models.

use nalgebra::Point2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::homography::{estimate_homography, homography_from_4pt, Homography, HomographyError};

/// Settings for robust homography estimation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacHomographyConfig {
    /// Maximum reprojection error (destination units) for an inlier.
    pub inlier_threshold: f64,
    /// Hard cap on sampling iterations.
    pub max_iters: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Minimum consensus size for an accepted model.
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacHomographyConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 8.0,
            max_iters: 5000,
            confidence: 0.995,
            min_inliers: 4,
            seed: 0x5eed_9121,
        }
    }
}

/// Result of a RANSAC run.
#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    pub model: M,
    /// Indices of inlier data points.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Number of iterations actually performed.
    pub iters: usize,
}

/// Generic estimator for RANSAC-like methods.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of samples needed to estimate a model.
    const MIN_SAMPLES: usize;

    /// Fit a model from a subset of data indices, `None` if degenerate.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual in the same units as the inlier threshold.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Refit on the full inlier set. Default: keep the sampled model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / (vals.len() as f64)).sqrt()
}

/// Dynamic iteration bound from the current inlier ratio.
fn calculate_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    if inlier_ratio >= 1.0 {
        return iters_so_far.min(max_iters);
    }

    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }

    let n_iter = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n_iter.clamp(iters_so_far, max_iters)
}

fn score<E: Estimator>(data: &[E::Datum], model: &E::Model, thresh: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut residuals = Vec::new();
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
    let r = rms(&residuals);
    (inliers, r)
}

/// Run a RANSAC loop for a given [`Estimator`].
///
/// Returns `None` when there is insufficient data or no sample reaches
/// `min_inliers` within `max_iters`.
pub fn ransac<E: Estimator>(
    data: &[E::Datum],
    thresh: f64,
    min_inliers: usize,
    max_iters: usize,
    confidence: f64,
    seed: u64,
) -> Option<RansacResult<E::Model>> {
    if data.len() < E::MIN_SAMPLES {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<RansacResult<E::Model>> = None;
    let mut dynamic_max_iters = max_iters;
    let mut num_iters = 0;

    while num_iters < dynamic_max_iters {
        num_iters += 1;
        let sample = rand::seq::index::sample(&mut rng, data.len(), E::MIN_SAMPLES).into_vec();

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        let (inliers, inlier_rms) = score::<E>(data, &model, thresh);
        if inliers.len() < min_inliers {
            continue;
        }

        let (model, inliers, inlier_rms) = match E::refit(data, &inliers) {
            Some(refit) => {
                let (refit_inliers, refit_rms) = score::<E>(data, &refit, thresh);
                if refit_inliers.len() >= inliers.len() {
                    (refit, refit_inliers, refit_rms)
                } else {
                    (model, inliers, inlier_rms)
                }
            }
            None => (model, inliers, inlier_rms),
        };

        let better = match &best {
            None => true,
            Some(b) => {
                inliers.len() > b.inliers.len()
                    || (inliers.len() == b.inliers.len() && inlier_rms < b.inlier_rms)
            }
        };
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            dynamic_max_iters = calculate_iterations(
                confidence,
                ratio,
                E::MIN_SAMPLES,
                num_iters,
                max_iters,
            );
            best = Some(RansacResult {
                model,
                inliers,
                inlier_rms,
                iters: num_iters,
            });
        }
    }

    best.map(|mut b| {
        b.iters = num_iters;
        b
    })
}

/// Correspondence `(src, dst)` for homography estimation.
pub type Correspondence = (Point2<f64>, Point2<f64>);

/// RANSAC estimator for `dst ~ H * src`.
pub struct HomographyEstimator;

fn triangle_area2(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

fn has_collinear_triple(pts: &[Point2<f64>; 4]) -> bool {
    const EPS: f64 = 1e-9;
    let scale = pts
        .iter()
        .flat_map(|p| [p.x.abs(), p.y.abs()])
        .fold(1.0_f64, f64::max);
    let tol = EPS * scale * scale;
    [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)]
        .iter()
        .any(|&(i, j, k)| triangle_area2(pts[i], pts[j], pts[k]) <= tol)
}

impl Estimator for HomographyEstimator {
    type Datum = Correspondence;
    type Model = Homography;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[Self::Datum], idx: &[usize]) -> Option<Self::Model> {
        let src = [data[idx[0]].0, data[idx[1]].0, data[idx[2]].0, data[idx[3]].0];
        let dst = [data[idx[0]].1, data[idx[1]].1, data[idx[2]].1, data[idx[3]].1];
        homography_from_4pt(&src, &dst).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        match model.try_apply(datum.0) {
            Some(p) => (p - datum.1).norm(),
            None => f64::INFINITY,
        }
    }

    fn is_degenerate(data: &[Self::Datum], idx: &[usize]) -> bool {
        let src = [data[idx[0]].0, data[idx[1]].0, data[idx[2]].0, data[idx[3]].0];
        let dst = [data[idx[0]].1, data[idx[1]].1, data[idx[2]].1, data[idx[3]].1];
        has_collinear_triple(&src) || has_collinear_triple(&dst)
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        let src: Vec<Point2<f64>> = inliers.iter().map(|&i| data[i].0).collect();
        let dst: Vec<Point2<f64>> = inliers.iter().map(|&i| data[i].1).collect();
        estimate_homography(&src, &dst).ok()
    }
}

/// Robustly estimate `H` such that `dst ~ H * src`.
///
/// Four correspondences are solved exactly; larger sets go through RANSAC
/// with a final least-squares refit on the consensus set.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, dst, config), fields(n = src.len()))
)]
pub fn find_homography_robust(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RansacHomographyConfig,
) -> Result<RansacResult<Homography>, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < HomographyEstimator::MIN_SAMPLES {
        return Err(HomographyError::NotEnoughPoints(src.len()));
    }

    if src.len() == 4 {
        let model = estimate_homography(src, dst)?;
        return Ok(RansacResult {
            model,
            inliers: (0..4).collect(),
            inlier_rms: 0.0,
            iters: 1,
        });
    }

    let data: Vec<Correspondence> = src.iter().copied().zip(dst.iter().copied()).collect();
    let min_inliers = config.min_inliers.max(HomographyEstimator::MIN_SAMPLES);
    let result = ransac::<HomographyEstimator>(
        &data,
        config.inlier_threshold,
        min_inliers,
        config.max_iters,
        config.confidence,
        config.seed,
    )
    .ok_or(HomographyError::NoConsensus {
        inliers: 0,
        needed: min_inliers,
    })?;

    log::debug!(
        "robust homography: {}/{} inliers, rms {:.4}, {} iterations",
        result.inliers.len(),
        data.len(),
        result.inlier_rms,
        result.iters
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn gt() -> Homography {
        Homography::new(Matrix3::new(
            0.9, 0.08, -40.0, //
            -0.05, 1.1, 25.0, //
            0.0004, -0.0002, 1.0,
        ))
    }

    fn grid_points() -> Vec<Point2<f64>> {
        (0..4)
            .flat_map(|j| (0..5).map(move |i| Point2::new(i as f64 * 120.0, j as f64 * 90.0)))
            .collect()
    }

    #[test]
    fn exact_data_recovers_model() {
        let h = gt();
        let src = grid_points();
        let dst: Vec<_> = src.iter().map(|&p| h.apply(p)).collect();

        let res = find_homography_robust(&src, &dst, &RansacHomographyConfig::default())
            .expect("estimate");
        assert_eq!(res.inliers.len(), src.len());
        for p in &src {
            let d = (res.model.apply(*p) - h.apply(*p)).norm();
            assert!(d < 1e-6, "residual {d}");
        }
    }

    #[test]
    fn gross_outliers_are_rejected() {
        let h = gt();
        let src = grid_points();
        let mut dst: Vec<_> = src.iter().map(|&p| h.apply(p)).collect();
        dst[3].x += 400.0;
        dst[11].y -= 250.0;

        let res = find_homography_robust(&src, &dst, &RansacHomographyConfig::default())
            .expect("estimate");
        assert_eq!(res.inliers.len(), src.len() - 2);
        assert!(!res.inliers.contains(&3));
        assert!(!res.inliers.contains(&11));
        let probe = Point2::new(200.0, 150.0);
        assert!((res.model.apply(probe) - h.apply(probe)).norm() < 1e-6);
    }

    #[test]
    fn seeded_runs_are_repeatable() {
        let h = gt();
        let src = grid_points();
        let mut dst: Vec<_> = src.iter().map(|&p| h.apply(p)).collect();
        dst[7].x += 90.0;
        let cfg = RansacHomographyConfig::default();
        let a = find_homography_robust(&src, &dst, &cfg).expect("a");
        let b = find_homography_robust(&src, &dst, &cfg).expect("b");
        assert_eq!(a.model, b.model);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn collinear_input_has_no_consensus() {
        let src: Vec<_> = (0..6).map(|i| Point2::new(i as f64, 2.0 * i as f64)).collect();
        let dst = src.clone();
        let err = find_homography_robust(&src, &dst, &RansacHomographyConfig::default());
        assert!(matches!(err, Err(HomographyError::NoConsensus { .. })));
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let cfg: RansacHomographyConfig =
            serde_json::from_str(r#"{ "inlier_threshold": 2.5, "seed": 7 }"#).unwrap();
        assert_eq!(cfg.inlier_threshold, 2.5);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.max_iters, RansacHomographyConfig::default().max_iters);
        assert_eq!(cfg.min_inliers, 4);
    }

    #[test]
    fn iteration_bound_shrinks_with_inlier_ratio() {
        assert_eq!(calculate_iterations(0.995, 0.0, 4, 1, 5000), 5000);
        let n = calculate_iterations(0.995, 0.9, 4, 1, 5000);
        assert!(n > 1 && n < 50, "n = {n}");
    }
}
