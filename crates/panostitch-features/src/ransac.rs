//! Robust planar homography estimation from point correspondences.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::homography::Homography;

/// Size of the minimal sample a homography is estimated from.
const MINIMAL_SAMPLE: usize = 4;

/// Parameters of the robust fitting loop.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum number of sampling iterations.
    pub max_iterations: usize,
    /// Pixel error below which a correspondence counts as an inlier.
    pub reproj_threshold: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            reproj_threshold: 3.0,
            confidence: 0.995,
            random_seed: None,
        }
    }
}

/// Estimate the homography mapping `src` points onto `dst` points.
///
/// Minimal four-point models are sampled and scored by forward reprojection
/// error, the iteration count adapting to the observed inlier ratio. The
/// winning model is refit on all of its inliers.
///
/// # Returns
///
/// `None` when fewer than four correspondences are given, the slices differ
/// in length or every sampled model is degenerate.
pub fn fit_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    params: &RansacParams,
) -> Option<Homography> {
    let n = src.len();
    if n != dst.len() || n < MINIMAL_SAMPLE {
        return None;
    }

    if n == MINIMAL_SAMPLE {
        return dlt_homography(src, dst);
    }

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    let mut indices: Vec<usize> = (0..n).collect();
    let mut best_model: Option<Homography> = None;
    let mut best_inliers: Vec<usize> = Vec::new();

    let mut iter = 0usize;
    let mut required_iters = params.max_iterations;

    while iter < required_iters {
        iter += 1;

        indices.shuffle(&mut rng);
        let sample = &indices[..MINIMAL_SAMPLE];

        let mut src_min = [[0.0; 2]; MINIMAL_SAMPLE];
        let mut dst_min = [[0.0; 2]; MINIMAL_SAMPLE];
        for (k, &idx) in sample.iter().enumerate() {
            src_min[k] = src[idx];
            dst_min[k] = dst[idx];
        }

        let Some(model) = dlt_homography(&src_min, &dst_min) else {
            continue;
        };

        let inliers = classify_inliers(src, dst, &model, params.reproj_threshold);
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best_model = Some(model);

            // Shrink the iteration budget from the inlier ratio seen so far.
            let w = best_inliers.len() as f64 / n as f64;
            let ws = w.powi(MINIMAL_SAMPLE as i32);
            if ws > 1e-12 && ws < 1.0 - 1e-12 {
                let est = ((1.0 - params.confidence).max(1e-12).ln() / (1.0 - ws).ln()).ceil();
                if est.is_finite() && est > 0.0 {
                    required_iters = required_iters.min(est as usize);
                }
            } else if w >= 1.0 - 1e-12 {
                required_iters = iter;
            }
        }
    }

    if best_inliers.len() < MINIMAL_SAMPLE {
        return None;
    }

    // Refit on all inliers; fall back to the minimal model when the larger
    // system turns out degenerate.
    let src_in: Vec<[f64; 2]> = best_inliers.iter().map(|&i| src[i]).collect();
    let dst_in: Vec<[f64; 2]> = best_inliers.iter().map(|&i| dst[i]).collect();
    dlt_homography(&src_in, &dst_in).or(best_model)
}

/// Direct linear transform over `n >= 4` correspondences.
///
/// The stacked `2n x 9` coefficient matrix is decomposed by SVD and the
/// right singular vector of the smallest singular value taken as the
/// homography, scaled so its bottom-right entry is one.
pub(crate) fn dlt_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Homography> {
    let n = src.len();
    if n < MINIMAL_SAMPLE || n != dst.len() {
        return None;
    }

    let mut mat_a = faer::Mat::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (s, d) = (src[i], dst[i]);

        mat_a.write(2 * i, 0, s[0]);
        mat_a.write(2 * i, 1, s[1]);
        mat_a.write(2 * i, 2, 1.0);
        mat_a.write(2 * i, 6, -d[0] * s[0]);
        mat_a.write(2 * i, 7, -d[0] * s[1]);
        mat_a.write(2 * i, 8, -d[0]);

        mat_a.write(2 * i + 1, 3, s[0]);
        mat_a.write(2 * i + 1, 4, s[1]);
        mat_a.write(2 * i + 1, 5, 1.0);
        mat_a.write(2 * i + 1, 6, -d[1] * s[0]);
        mat_a.write(2 * i + 1, 7, -d[1] * s[1]);
        mat_a.write(2 * i + 1, 8, -d[1]);
    }

    let svd = mat_a.svd();
    let h = svd.v().col(8);

    if h[8].abs() < 1e-12 {
        return None;
    }

    let scale = 1.0 / h[8];
    let model = Homography::from_array([
        h[0] * scale,
        h[1] * scale,
        h[2] * scale,
        h[3] * scale,
        h[4] * scale,
        h[5] * scale,
        h[6] * scale,
        h[7] * scale,
        1.0,
    ]);

    if model.determinant().abs() < 1e-8 {
        return None;
    }

    Some(model)
}

fn classify_inliers(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    model: &Homography,
    threshold: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst.iter())
        .enumerate()
        .filter(|(_, (s, d))| {
            let (px, py) = model.transform(s[0], s[1]);
            let (dx, dy) = (px - d[0], py - d[1]);
            (dx * dx + dy * dy).sqrt() < threshold
        })
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded_params() -> RansacParams {
        RansacParams {
            random_seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn recovers_pure_translation() {
        let src: Vec<[f64; 2]> = vec![
            [0.0, 0.0],
            [100.0, 0.0],
            [100.0, 100.0],
            [0.0, 100.0],
            [50.0, 25.0],
            [25.0, 75.0],
        ];
        let dst: Vec<[f64; 2]> = src.iter().map(|p| [p[0] + 10.0, p[1]]).collect();

        let model = fit_homography(&src, &dst, &seeded_params()).unwrap();
        let (tx, ty) = model.translation();

        assert_relative_eq!(tx, 10.0, epsilon = 1e-6);
        assert_relative_eq!(ty, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_scaling() {
        let src = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        let dst = [[0.0, 0.0], [200.0, 0.0], [200.0, 200.0], [0.0, 200.0]];

        let model = dlt_homography(&src, &dst).unwrap();

        assert_relative_eq!(model.at(0, 0), 2.0, epsilon = 1e-6);
        assert_relative_eq!(model.at(1, 1), 2.0, epsilon = 1e-6);
        assert_relative_eq!(model.at(0, 2), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn ignores_gross_outliers() {
        let mut src: Vec<[f64; 2]> = (0..12)
            .map(|i| {
                let jitter = ((i * i) % 5) as f64;
                [(i % 4) as f64 * 30.0 + jitter, (i / 4) as f64 * 30.0 + jitter]
            })
            .collect();
        let mut dst: Vec<[f64; 2]> = src.iter().map(|p| [p[0] + 10.0, p[1] + 5.0]).collect();

        src.push([3.0, 7.0]);
        dst.push([500.0, -200.0]);
        src.push([60.0, 40.0]);
        dst.push([-313.0, 911.0]);

        let model = fit_homography(&src, &dst, &seeded_params()).unwrap();
        let (tx, ty) = model.translation();

        assert_relative_eq!(tx, 10.0, epsilon = 1e-4);
        assert_relative_eq!(ty, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn too_few_points_yields_none() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        assert!(fit_homography(&pts, &pts, &seeded_params()).is_none());
    }

    #[test]
    fn mismatched_lengths_yield_none() {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let dst = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        assert!(fit_homography(&src, &dst, &seeded_params()).is_none());
    }
}
