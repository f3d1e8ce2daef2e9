//! Full detect, match and fit pipeline between one frame pair.

use std::time::{Duration, Instant};

use panostitch_image::{Image, ImageSize};
use panostitch_imgproc::color::gray_from_rgb_u8;

use crate::detector::{detect_and_describe, DetectorParams, Keypoint};
use crate::error::FeatureError;
use crate::homography::Homography;
use crate::mask::{overlap_mask, OverlapDirection};
use crate::matcher::{
    filter_matches_by_tolerance, match_features, DescriptorMatch, MatchStats, MatcherStrategy,
};
use crate::ransac::{fit_homography, RansacParams};

/// Configuration of one pairwise matcher.
#[derive(Clone, Debug)]
pub struct MatcherConfig {
    /// Keypoint detection tunables.
    pub detector: DetectorParams,
    /// Descriptor search strategy.
    pub strategy: MatcherStrategy,
    /// Half-width of the match distance filter relative to the one-sided
    /// spread, one or more keeps every match.
    pub tolerance: f32,
    /// Fraction of each frame searched for features, measured from the edge
    /// facing the other camera.
    pub overlap_fraction: f32,
    /// Robust fitting tunables.
    pub ransac: RansacParams,
    /// Render a side-by-side image of the matched keypoints.
    pub show_matches: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            detector: DetectorParams::default(),
            strategy: MatcherStrategy::default(),
            tolerance: 0.5,
            overlap_fraction: 0.8,
            ransac: RansacParams::default(),
            show_matches: false,
        }
    }
}

/// Outcome of one pairwise estimation attempt.
#[derive(Clone, Debug)]
pub struct MatchReport {
    /// The fitted mapping from the first frame onto the second, absent when
    /// the pair could not be registered this attempt.
    pub homography: Option<Homography>,
    /// Keypoint and match counters for diagnostics.
    pub stats: MatchStats,
    /// Side-by-side match rendering, present when requested.
    pub visualization: Option<Image<u8, 3>>,
    /// Wall time spent on grayscale conversion and detection.
    pub detect_elapsed: Duration,
    /// Wall time spent on descriptor search and filtering.
    pub match_elapsed: Duration,
}

/// Estimates the homography between the frames of one camera pair.
///
/// The matcher is stateless across calls so one instance can serve a
/// camera pair for the lifetime of the pipeline.
pub struct FeatureMatcher {
    config: MatcherConfig,
}

impl FeatureMatcher {
    /// Create a matcher with the given configuration.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// The configuration this matcher runs with.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Register `frame_a` onto `frame_b`.
    ///
    /// Features are searched only inside the overlap band of each frame
    /// given by `directions`, the edge of the frame facing the other
    /// camera. A pair that cannot be registered, because either band is
    /// featureless or no consistent model exists, reports `homography:
    /// None` rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::EmptyFrame`] when either input has no
    /// pixels.
    pub fn compute_homography(
        &self,
        frame_a: &Image<u8, 3>,
        frame_b: &Image<u8, 3>,
        directions: (OverlapDirection, OverlapDirection),
    ) -> Result<MatchReport, FeatureError> {
        if frame_a.is_empty() || frame_b.is_empty() {
            return Err(FeatureError::EmptyFrame);
        }

        let detect_started = Instant::now();

        let mut gray_a = Image::from_size_val(frame_a.size(), 0u8)?;
        let mut gray_b = Image::from_size_val(frame_b.size(), 0u8)?;
        gray_from_rgb_u8(frame_a, &mut gray_a)?;
        gray_from_rgb_u8(frame_b, &mut gray_b)?;

        let mask_a = overlap_mask(frame_a.size(), directions.0, self.config.overlap_fraction)?;
        let mask_b = overlap_mask(frame_b.size(), directions.1, self.config.overlap_fraction)?;

        let (keypoints_a, descriptors_a) =
            detect_and_describe(&gray_a, Some(&mask_a), &self.config.detector)?;
        let (keypoints_b, descriptors_b) =
            detect_and_describe(&gray_b, Some(&mask_b), &self.config.detector)?;

        let detect_elapsed = detect_started.elapsed();

        let match_started = Instant::now();

        let raw_matches = match_features(&descriptors_a, &descriptors_b, &self.config.strategy);
        let kept_matches = filter_matches_by_tolerance(&raw_matches, self.config.tolerance)
            .unwrap_or_default();

        let match_elapsed = match_started.elapsed();

        let stats = MatchStats {
            keypoints_a: keypoints_a.len(),
            keypoints_b: keypoints_b.len(),
            raw_matches: raw_matches.len(),
            kept_matches: kept_matches.len(),
        };
        log::debug!(
            "pair registration: {}/{} keypoints, {} matches, {} kept",
            stats.keypoints_a,
            stats.keypoints_b,
            stats.raw_matches,
            stats.kept_matches
        );

        let src: Vec<[f64; 2]> = kept_matches
            .iter()
            .map(|m| {
                let kp = keypoints_a[m.query_idx];
                [kp.x as f64, kp.y as f64]
            })
            .collect();
        let dst: Vec<[f64; 2]> = kept_matches
            .iter()
            .map(|m| {
                let kp = keypoints_b[m.train_idx];
                [kp.x as f64, kp.y as f64]
            })
            .collect();

        let homography = fit_homography(&src, &dst, &self.config.ransac);

        let visualization = if self.config.show_matches {
            Some(draw_matches(
                frame_a,
                frame_b,
                &keypoints_a,
                &keypoints_b,
                &kept_matches,
            )?)
        } else {
            None
        };

        Ok(MatchReport {
            homography,
            stats,
            visualization,
            detect_elapsed,
            match_elapsed,
        })
    }
}

const MATCH_LINE_COLOR: [u8; 3] = [0, 255, 0];

/// Render both frames side by side with a line per kept match.
fn draw_matches(
    frame_a: &Image<u8, 3>,
    frame_b: &Image<u8, 3>,
    keypoints_a: &[Keypoint],
    keypoints_b: &[Keypoint],
    matches: &[DescriptorMatch],
) -> Result<Image<u8, 3>, FeatureError> {
    let size = ImageSize {
        width: frame_a.cols() + frame_b.cols(),
        height: frame_a.rows().max(frame_b.rows()),
    };
    let mut canvas = Image::from_size_val(size, 0u8)?;

    paste(&mut canvas, frame_a, 0);
    paste(&mut canvas, frame_b, frame_a.cols());

    for m in matches {
        let a = keypoints_a[m.query_idx];
        let b = keypoints_b[m.train_idx];
        draw_line(
            &mut canvas,
            (a.x as i64, a.y as i64),
            ((b.x as usize + frame_a.cols()) as i64, b.y as i64),
            MATCH_LINE_COLOR,
        );
    }

    Ok(canvas)
}

fn paste(canvas: &mut Image<u8, 3>, src: &Image<u8, 3>, x_offset: usize) {
    let canvas_cols = canvas.cols();
    let canvas_data = canvas.as_slice_mut();
    let src_data = src.as_slice();

    for row in 0..src.rows() {
        let dst_start = (row * canvas_cols + x_offset) * 3;
        let src_start = row * src.cols() * 3;
        let len = src.cols() * 3;
        canvas_data[dst_start..dst_start + len]
            .copy_from_slice(&src_data[src_start..src_start + len]);
    }
}

/// Plot a line segment between two pixels with the midpoint algorithm.
fn draw_line(canvas: &mut Image<u8, 3>, from: (i64, i64), to: (i64, i64), color: [u8; 3]) {
    let (cols, rows) = (canvas.cols() as i64, canvas.rows() as i64);
    let data = canvas.as_slice_mut();

    let (mut x, mut y) = from;
    let dx = (to.0 - from.0).abs();
    let dy = -(to.1 - from.1).abs();
    let sx = if from.0 < to.0 { 1 } else { -1 };
    let sy = if from.1 < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x >= 0 && y >= 0 && x < cols && y < rows {
            let idx = ((y * cols + x) * 3) as usize;
            data[idx..idx + 3].copy_from_slice(&color);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SIZE: ImageSize = ImageSize {
        width: 100,
        height: 100,
    };

    /// Pixel value of an unbounded deterministic texture plane.
    fn texture_at(x: i64, y: i64) -> u8 {
        let bx = x.div_euclid(7) as u64;
        let by = y.div_euclid(7) as u64;
        let state = (bx.wrapping_mul(0x9E37_79B9))
            .wrapping_add(by.wrapping_mul(0x85EB_CA6B))
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 56) as u8
    }

    /// A frame whose top-left corner looks at `(shift_x, 0)` of the plane.
    fn frame_at(shift_x: i64) -> Image<u8, 3> {
        let mut data = vec![0u8; SIZE.width * SIZE.height * 3];
        for y in 0..SIZE.height {
            for x in 0..SIZE.width {
                let value = texture_at(x as i64 + shift_x, y as i64);
                let idx = (y * SIZE.width + x) * 3;
                data[idx] = value;
                data[idx + 1] = value;
                data[idx + 2] = value;
            }
        }
        Image::new(SIZE, data).unwrap()
    }

    fn seeded_config() -> MatcherConfig {
        MatcherConfig {
            ransac: RansacParams {
                random_seed: Some(7),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn shifted_frames_fit_to_a_translation() -> Result<(), FeatureError> {
        let frame_a = frame_at(0);
        let frame_b = frame_at(10);

        let matcher = FeatureMatcher::new(seeded_config());
        let report = matcher.compute_homography(
            &frame_a,
            &frame_b,
            (OverlapDirection::Right, OverlapDirection::Left),
        )?;

        assert!(report.stats.kept_matches >= 4);

        let homography = report.homography.expect("registration should succeed");
        let (tx, ty) = homography.translation();

        assert_relative_eq!(tx.abs(), 10.0, epsilon = 0.5);
        assert_relative_eq!(ty, 0.0, epsilon = 0.5);

        Ok(())
    }

    #[test]
    fn featureless_pair_reports_no_homography() -> Result<(), FeatureError> {
        let flat = Image::from_size_val(SIZE, 120u8)?;

        let matcher = FeatureMatcher::new(seeded_config());
        let report = matcher.compute_homography(
            &flat,
            &flat,
            (OverlapDirection::Right, OverlapDirection::Left),
        )?;

        assert!(report.homography.is_none());
        assert_eq!(report.stats.kept_matches, 0);

        Ok(())
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = frame_at(0);
        let empty = Image::empty();

        let matcher = FeatureMatcher::new(seeded_config());
        let result = matcher.compute_homography(
            &frame,
            &empty,
            (OverlapDirection::Right, OverlapDirection::Left),
        );

        assert!(matches!(result, Err(FeatureError::EmptyFrame)));
    }

    #[test]
    fn visualization_spans_both_frames() -> Result<(), FeatureError> {
        let frame_a = frame_at(0);
        let frame_b = frame_at(10);

        let matcher = FeatureMatcher::new(MatcherConfig {
            show_matches: true,
            ..seeded_config()
        });
        let report = matcher.compute_homography(
            &frame_a,
            &frame_b,
            (OverlapDirection::Right, OverlapDirection::Left),
        )?;

        let canvas = report.visualization.expect("rendering was requested");
        assert_eq!(canvas.cols(), 200);
        assert_eq!(canvas.rows(), 100);

        Ok(())
    }
}
