use panostitch_image::{Image, ImageSize};
use panostitch_imgproc::resize::resize_bilinear_u8;
use rayon::prelude::*;

use crate::error::FeatureError;

/// Border margin inside which no descriptor is computed.
///
/// Large enough for the rotated sampling pattern to stay inside the image.
const DESCRIPTOR_MARGIN: i32 = 19;

/// Radius of the circular patch used for the orientation estimate.
const ORIENTATION_RADIUS: i32 = 7;

/// Scale factor between consecutive pyramid levels.
const LEVEL_DOWNSCALE: f32 = 1.2;

/// Side of the grid cell used for non-maximum suppression.
const NMS_CELL_SIZE: usize = 16;

/// A salient image location with its orientation and detector response.
#[derive(Clone, Copy, Debug)]
pub struct Keypoint {
    /// The x-coordinate in full-resolution frame pixels.
    pub x: f32,
    /// The y-coordinate in full-resolution frame pixels.
    pub y: f32,
    /// The orientation of the local patch in radians.
    pub angle: f32,
    /// The detector response, larger is stronger.
    pub response: f32,
}

/// Tunables for keypoint detection and description.
#[derive(Clone, Copy, Debug)]
pub struct DetectorParams {
    /// Contrast threshold of the corner test, the detector sensitivity.
    pub threshold: u8,
    /// Number of pyramid levels searched for corners.
    pub octaves: usize,
    /// Skip the orientation estimate and sample descriptors axis-aligned.
    pub upright: bool,
    /// Upper bound on keypoints kept per frame, strongest first.
    pub max_keypoints: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            octaves: 4,
            upright: false,
            max_keypoints: 500,
        }
    }
}

/// Detect keypoints and extract their 256-bit binary descriptors.
///
/// Corners are found with a segment test on a 16-pixel Bresenham circle at
/// each pyramid level, thinned by per-cell non-maximum suppression, oriented
/// by the intensity centroid of their patch and described by brightness
/// comparisons over a fixed pseudo-random point pattern.
///
/// # Arguments
///
/// * `gray` - The single-channel input frame.
/// * `mask` - Optional region of interest; keypoints where the mask is zero
///   are discarded.
/// * `params` - Detection tunables.
///
/// # Returns
///
/// Keypoints in full-resolution coordinates with one descriptor per
/// keypoint. Both vectors are empty for featureless or too-small inputs.
pub fn detect_and_describe(
    gray: &Image<u8, 1>,
    mask: Option<&Image<u8, 1>>,
    params: &DetectorParams,
) -> Result<(Vec<Keypoint>, Vec<[u8; 32]>), FeatureError> {
    if gray.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let pattern = sampling_pattern();
    let mut scored: Vec<(Keypoint, [u8; 32])> = Vec::new();

    let mut level_image = gray.clone();
    let mut level_scale = 1.0f32;

    for level in 0..params.octaves.max(1) {
        if level > 0 {
            let next_w = (gray.cols() as f32 / LEVEL_DOWNSCALE.powi(level as i32)).round() as usize;
            let next_h = (gray.rows() as f32 / LEVEL_DOWNSCALE.powi(level as i32)).round() as usize;
            if next_w < (2 * DESCRIPTOR_MARGIN + 1) as usize
                || next_h < (2 * DESCRIPTOR_MARGIN + 1) as usize
            {
                break;
            }
            let mut resized = Image::from_size_val(
                ImageSize {
                    width: next_w,
                    height: next_h,
                },
                0u8,
            )?;
            resize_bilinear_u8(gray, &mut resized)?;
            level_image = resized;
            level_scale = gray.cols() as f32 / next_w as f32;
        }

        if level_image.cols() < (2 * DESCRIPTOR_MARGIN + 1) as usize
            || level_image.rows() < (2 * DESCRIPTOR_MARGIN + 1) as usize
        {
            break;
        }

        let corners = fast_corners(&level_image, params.threshold);
        let corners = suppress_non_max(&corners, level_image.size());

        for corner in corners {
            let base_x = corner.x as f32 * level_scale;
            let base_y = corner.y as f32 * level_scale;

            if let Some(roi) = mask {
                let mx = (base_x as usize).min(roi.cols().saturating_sub(1));
                let my = (base_y as usize).min(roi.rows().saturating_sub(1));
                if roi.as_slice()[my * roi.cols() + mx] == 0 {
                    continue;
                }
            }

            let angle = if params.upright {
                0.0
            } else {
                patch_orientation(&level_image, corner.x, corner.y)
            };

            if let Some(descriptor) = describe(&level_image, corner.x, corner.y, angle, &pattern) {
                scored.push((
                    Keypoint {
                        x: base_x,
                        y: base_y,
                        angle,
                        response: corner.score as f32,
                    },
                    descriptor,
                ));
            }
        }
    }

    scored.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
    scored.truncate(params.max_keypoints);

    let (keypoints, descriptors) = scored.into_iter().unzip();
    Ok((keypoints, descriptors))
}

#[derive(Clone, Copy)]
struct Corner {
    x: i32,
    y: i32,
    score: i32,
}

/// Offsets of the 16-pixel Bresenham circle of radius 3, clockwise from the
/// top, for a row stride of `cols`.
fn circle_offsets(cols: i32) -> [i32; 16] {
    [
        -3 * cols,
        -3 * cols + 1,
        -2 * cols + 2,
        -cols + 3,
        3,
        cols + 3,
        2 * cols + 2,
        3 * cols + 1,
        3 * cols,
        3 * cols - 1,
        2 * cols - 2,
        cols - 3,
        -3,
        -cols - 3,
        -2 * cols - 2,
        -3 * cols - 1,
    ]
}

/// Segment-test corner detector with an arc length of 9.
fn fast_corners(src: &Image<u8, 1>, threshold: u8) -> Vec<Corner> {
    let (cols, rows) = (src.cols() as i32, src.rows() as i32);
    let offsets = circle_offsets(cols);
    let data = src.as_slice();

    (3..rows - 3)
        .into_par_iter()
        .flat_map(|y| {
            let mut row_corners = Vec::new();
            for x in 3..cols - 3 {
                let idx = y * cols + x;
                if let Some(score) = corner_score(data, idx, &offsets, threshold) {
                    row_corners.push(Corner { x, y, score });
                }
            }
            row_corners
        })
        .collect()
}

fn corner_score(data: &[u8], idx: i32, offsets: &[i32; 16], threshold: u8) -> Option<i32> {
    let center = data[idx as usize];
    let lower = center.saturating_sub(threshold);
    let upper = center.saturating_add(threshold);

    let pixel = |k: usize| data[(idx + offsets[k]) as usize];

    // Quick rejection on the four compass points: a 9-long arc must contain
    // at least two of them on the same side of the band.
    let compass = [pixel(0), pixel(4), pixel(8), pixel(12)];
    let brighter = compass.iter().filter(|&&p| p > upper).count();
    let darker = compass.iter().filter(|&&p| p < lower).count();
    if brighter < 2 && darker < 2 {
        return None;
    }

    let ring: [u8; 16] = std::array::from_fn(pixel);

    let mut best_arc = 0u8;
    let mut run = 0u8;
    // Walk the ring twice so arcs wrapping the seam are counted.
    for i in 0..32 {
        if ring[i % 16] > upper {
            run += 1;
            best_arc = best_arc.max(run);
        } else {
            run = 0;
        }
    }
    if best_arc < 9 {
        best_arc = 0;
        run = 0;
        for i in 0..32 {
            if ring[i % 16] < lower {
                run += 1;
                best_arc = best_arc.max(run);
            } else {
                run = 0;
            }
        }
    }

    if best_arc >= 9 {
        let score: i32 = ring
            .iter()
            .map(|&p| (p as i32 - center as i32).abs())
            .sum();
        Some(score)
    } else {
        None
    }
}

/// Keep only the strongest corner inside each grid cell.
fn suppress_non_max(corners: &[Corner], size: ImageSize) -> Vec<Corner> {
    let grid_cols = size.width.div_ceil(NMS_CELL_SIZE);
    let grid_rows = size.height.div_ceil(NMS_CELL_SIZE);
    let mut best: Vec<Option<Corner>> = vec![None; grid_cols * grid_rows];

    for corner in corners {
        let cell = (corner.y as usize / NMS_CELL_SIZE) * grid_cols + corner.x as usize / NMS_CELL_SIZE;
        match &best[cell] {
            Some(current) if current.score >= corner.score => {}
            _ => best[cell] = Some(*corner),
        }
    }

    best.into_iter().flatten().collect()
}

/// Orientation of the patch around a corner from its intensity centroid.
fn patch_orientation(src: &Image<u8, 1>, x: i32, y: i32) -> f32 {
    let (cols, rows) = (src.cols() as i32, src.rows() as i32);
    let data = src.as_slice();

    let mut m01 = 0i64;
    let mut m10 = 0i64;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let px = x + dx;
            let py = y + dy;
            if px < 0 || py < 0 || px >= cols || py >= rows {
                continue;
            }
            let value = data[(py * cols + px) as usize] as i64;
            m10 += dx as i64 * value;
            m01 += dy as i64 * value;
        }
    }

    (m01 as f32).atan2(m10 as f32)
}

/// The fixed 256-pair brightness comparison pattern.
///
/// Generated from a small linear congruential sequence so both frames of a
/// pair sample identical offsets.
fn sampling_pattern() -> Vec<([i32; 2], [i32; 2])> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next_offset = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) % 27) as i32 - 13
    };

    (0..256)
        .map(|_| {
            (
                [next_offset(), next_offset()],
                [next_offset(), next_offset()],
            )
        })
        .collect()
}

/// Build the 256-bit descriptor for one keypoint, or `None` when the patch
/// would leave the image.
fn describe(
    src: &Image<u8, 1>,
    x: i32,
    y: i32,
    angle: f32,
    pattern: &[([i32; 2], [i32; 2])],
) -> Option<[u8; 32]> {
    let (cols, rows) = (src.cols() as i32, src.rows() as i32);

    if x < DESCRIPTOR_MARGIN
        || y < DESCRIPTOR_MARGIN
        || x >= cols - DESCRIPTOR_MARGIN
        || y >= rows - DESCRIPTOR_MARGIN
    {
        return None;
    }

    let (sin, cos) = angle.sin_cos();
    let data = src.as_slice();

    let sample = |offset: &[i32; 2]| -> u8 {
        let dx = offset[0] as f32;
        let dy = offset[1] as f32;
        let rx = (dx * cos - dy * sin).round() as i32;
        let ry = (dx * sin + dy * cos).round() as i32;
        data[((y + ry) * cols + x + rx) as usize]
    };

    let mut descriptor = [0u8; 32];
    for (bit, (first, second)) in pattern.iter().enumerate() {
        if sample(first) < sample(second) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }

    Some(descriptor)
}
