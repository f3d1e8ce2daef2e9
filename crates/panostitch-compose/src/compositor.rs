use panostitch_features::Homography;
use panostitch_image::{Image, ImageSize};
use panostitch_imgproc::crop::crop_image;
use panostitch_imgproc::interpolation::{sample_bilinear, sample_nearest};
use panostitch_imgproc::parallel::par_iter_rows_enumerated;

use crate::blend::{combine, BlendMode, Contribution};

/// Safety factor oversizing the canvas over the summed source extents so
/// typical mounting offsets never clip. Pathological homographies can still
/// land outside and simply contribute nothing.
const CANVAS_MARGIN: f64 = 2.5;

/// Projects the frames of one cycle onto a shared canvas.
///
/// The canvas is anchored in the space of camera zero, the reference view.
/// Every other camera is reached by transforming reference coordinates
/// through the pairwise homographies, sampling that camera where the mapped
/// point lands inside its frame.
///
/// Supported camera counts are one (passthrough), two (one homography) and
/// four in a 2x2 grid (cameras zero and one on top, two and three below).
pub struct Compositor {
    blend: BlendMode,
    interpolate: bool,
}

impl Compositor {
    /// Create a compositor with the given blending policy.
    ///
    /// With `interpolate` set, source frames are sampled bilinearly,
    /// otherwise by nearest neighbor.
    pub fn new(blend: BlendMode, interpolate: bool) -> Self {
        Self { blend, interpolate }
    }

    /// The blending policy this compositor applies.
    pub fn blend_mode(&self) -> &BlendMode {
        &self.blend
    }

    /// Composite one cycle's frames into a cropped panorama.
    ///
    /// `homographies` holds the current pairwise estimates in topology
    /// order: `[0-1]` for two cameras, `[0-1, 0-2, 1-3, 2-3]` for four.
    ///
    /// # Returns
    ///
    /// `None` when the composite cannot be produced this cycle: an empty
    /// input frame, a missing homography, an unsupported camera count or a
    /// canvas that received no pixels. The caller keeps its previous output.
    pub fn stitch(
        &self,
        frames: &[Image<u8, 3>],
        homographies: &[Option<Homography>],
    ) -> Option<Image<u8, 3>> {
        if frames.iter().any(|f| f.is_empty()) {
            log::warn!("skipping composite, at least one frame is empty");
            return None;
        }

        match frames.len() {
            1 => Some(frames[0].clone()),
            2 => self.stitch_pair(frames, homographies),
            4 => self.stitch_quad(frames, homographies),
            other => {
                log::error!("unsupported camera count {other}, expected 1, 2 or 4");
                None
            }
        }
    }

    fn stitch_pair(
        &self,
        frames: &[Image<u8, 3>],
        homographies: &[Option<Homography>],
    ) -> Option<Image<u8, 3>> {
        let h01 = required_homography(homographies, 0)?;

        // Anchor offset keeping the canvas in frame when camera one extends
        // left or above the reference camera.
        let shift_x = (h01.at(0, 2).abs() * 2.0).round();
        let shift_y = (h01.at(1, 2).abs() * 2.0).round();

        let size = ImageSize {
            width: ((frames[0].cols() + frames[1].cols()) as f64 * CANVAS_MARGIN) as usize,
            height: ((frames[0].rows() + frames[1].rows()) as f64 * CANVAS_MARGIN) as usize,
        };
        let mut canvas = match Image::from_size_val(size, 0u8) {
            Ok(canvas) => canvas,
            Err(e) => {
                log::error!("failed to allocate {size} canvas: {e}");
                return None;
            }
        };

        par_iter_rows_enumerated(&mut canvas, |row, row_slice| {
            for (col, pixel) in row_slice.chunks_exact_mut(3).enumerate() {
                let x0 = col as f64 - shift_x;
                let y0 = row as f64 - shift_y;

                let mut contributions = [Contribution::default(); 2];
                let mut count = 0;
                if let Some(c) = self.sample(&frames[0], x0, y0) {
                    contributions[count] = c;
                    count += 1;
                }
                let (x1, y1) = h01.transform(x0, y0);
                if let Some(c) = self.sample(&frames[1], x1, y1) {
                    contributions[count] = c;
                    count += 1;
                }

                if let Some(color) = combine(&self.blend, &contributions[..count]) {
                    write_pixel(pixel, color);
                }
            }
        });

        crop_to_content(&canvas)
    }

    fn stitch_quad(
        &self,
        frames: &[Image<u8, 3>],
        homographies: &[Option<Homography>],
    ) -> Option<Image<u8, 3>> {
        let h01 = required_homography(homographies, 0)?;
        let h02 = required_homography(homographies, 1)?;
        let h13 = required_homography(homographies, 2)?;
        let h23 = required_homography(homographies, 3)?;

        // Camera three is reached over two independent paths, through camera
        // one and through camera two. Averaging them halves accumulated
        // pairwise drift.
        let h03 = average_homographies(&h13.mul(&h01), &h23.mul(&h02));

        let size = ImageSize {
            width: ((frames[0].cols().max(frames[2].cols())
                + frames[1].cols().max(frames[3].cols())) as f64
                * CANVAS_MARGIN) as usize,
            height: ((frames[0].rows().max(frames[1].rows())
                + frames[2].rows().max(frames[3].rows())) as f64
                * CANVAS_MARGIN) as usize,
        };
        let mut canvas = match Image::from_size_val(size, 0u8) {
            Ok(canvas) => canvas,
            Err(e) => {
                log::error!("failed to allocate {size} canvas: {e}");
                return None;
            }
        };

        let mappings = [h01, h02, &h03];

        par_iter_rows_enumerated(&mut canvas, |row, row_slice| {
            for (col, pixel) in row_slice.chunks_exact_mut(3).enumerate() {
                let x0 = col as f64;
                let y0 = row as f64;

                let mut contributions = [Contribution::default(); 4];
                let mut count = 0;
                if let Some(c) = self.sample(&frames[0], x0, y0) {
                    contributions[count] = c;
                    count += 1;
                }
                for (frame, mapping) in frames[1..].iter().zip(mappings.iter()) {
                    let (x, y) = mapping.transform(x0, y0);
                    if let Some(c) = self.sample(frame, x, y) {
                        contributions[count] = c;
                        count += 1;
                    }
                }

                // Four-way compositing always weights the contributing
                // subset equally, whatever its size.
                if let Some(color) = combine(&BlendMode::Average, &contributions[..count]) {
                    write_pixel(pixel, color);
                }
            }
        });

        crop_to_content(&canvas)
    }

    fn sample(&self, frame: &Image<u8, 3>, x: f64, y: f64) -> Option<Contribution> {
        let color = if self.interpolate {
            sample_bilinear(frame, x, y)?
        } else {
            sample_nearest(frame, x, y)?
        };

        let cx = (frame.cols().saturating_sub(1)) as f64 / 2.0;
        let cy = (frame.rows().saturating_sub(1)) as f64 / 2.0;
        let half_diagonal = (cx * cx + cy * cy).sqrt().max(1.0);
        let distance = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();

        Some(Contribution {
            color,
            center_distance: (distance / half_diagonal).min(1.0),
        })
    }
}

fn required_homography<'a>(
    homographies: &'a [Option<Homography>],
    index: usize,
) -> Option<&'a Homography> {
    match homographies.get(index) {
        Some(Some(h)) => Some(h),
        _ => {
            log::warn!("skipping composite, homography {index} is not available");
            None
        }
    }
}

fn average_homographies(a: &Homography, b: &Homography) -> Homography {
    let (a, b) = (a.as_array(), b.as_array());
    Homography::from_array(std::array::from_fn(|i| (a[i] + b[i]) / 2.0))
}

fn write_pixel(pixel: &mut [u8], color: [f32; 3]) {
    for (ch, value) in pixel.iter_mut().zip(color.iter()) {
        *ch = value.round().clamp(0.0, 255.0) as u8;
    }
}

/// Crop the canvas to the bounding box of its non-background pixels, with a
/// one-pixel margin where the canvas allows it.
fn crop_to_content(canvas: &Image<u8, 3>) -> Option<Image<u8, 3>> {
    let (cols, rows) = (canvas.cols(), canvas.rows());
    let data = canvas.as_slice();

    let mut min_x = usize::MAX;
    let mut max_x = 0usize;
    let mut min_y = usize::MAX;
    let mut max_y = 0usize;

    for row in 0..rows {
        let row_slice = &data[row * cols * 3..(row + 1) * cols * 3];
        let first = row_slice
            .chunks_exact(3)
            .position(|p| p.iter().any(|&ch| ch != 0));
        let Some(first) = first else {
            continue;
        };
        let last = row_slice
            .chunks_exact(3)
            .rposition(|p| p.iter().any(|&ch| ch != 0))
            .unwrap_or(first);

        min_x = min_x.min(first);
        max_x = max_x.max(last);
        min_y = min_y.min(row);
        max_y = max_y.max(row);
    }

    if min_x == usize::MAX {
        log::warn!("composite produced no content");
        return None;
    }

    let x0 = min_x.saturating_sub(1);
    let y0 = min_y.saturating_sub(1);
    let x1 = (max_x + 1).min(cols - 1);
    let y1 = (max_y + 1).min(rows - 1);

    let size = ImageSize {
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    };
    let mut cropped = match Image::from_size_val(size, 0u8) {
        Ok(cropped) => cropped,
        Err(e) => {
            log::error!("failed to allocate {size} crop: {e}");
            return None;
        }
    };
    if let Err(e) = crop_image(canvas, &mut cropped, x0, y0) {
        log::error!("failed to crop composite: {e}");
        return None;
    }

    Some(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panostitch_image::ImageError;

    const SIZE_100: ImageSize = ImageSize {
        width: 100,
        height: 100,
    };

    const SIZE_50: ImageSize = ImageSize {
        width: 50,
        height: 50,
    };

    fn solid(size: ImageSize, color: [u8; 3]) -> Image<u8, 3> {
        let mut data = Vec::with_capacity(size.width * size.height * 3);
        for _ in 0..size.width * size.height {
            data.extend_from_slice(&color);
        }
        Image::new(size, data).unwrap()
    }

    fn striped(size: ImageSize) -> Image<u8, 3> {
        let mut data = vec![0u8; size.width * size.height * 3];
        for y in 0..size.height {
            for x in 0..size.width {
                let idx = (y * size.width + x) * 3;
                data[idx] = 10 + (x % 40) as u8;
                data[idx + 1] = 100;
                data[idx + 2] = 50;
            }
        }
        Image::new(size, data).unwrap()
    }

    fn translation(tx: f64, ty: f64) -> Option<Homography> {
        Some(Homography::from_array([
            1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0,
        ]))
    }

    #[test]
    fn single_camera_passes_through() {
        let frame = striped(SIZE_100);
        let compositor = Compositor::new(BlendMode::Overlay, true);

        let out = compositor.stitch(&[frame.clone()], &[]).unwrap();

        assert_eq!(out, frame);
    }

    #[test]
    fn overlay_keeps_exclusive_pixels_unchanged() -> Result<(), ImageError> {
        let frame0 = striped(SIZE_100);
        let frame1 = solid(SIZE_100, [0, 0, 255]);
        let compositor = Compositor::new(BlendMode::Overlay, true);

        let out = compositor
            .stitch(&[frame0.clone(), frame1], &[translation(-90.0, 0.0)])
            .unwrap();

        // Shift 180, crop margin 179: a reference pixel (x, y) lands at
        // (x + 1, y) of the cropped output.
        for (x, y) in [(5usize, 5usize), (40, 80), (89, 12)] {
            for ch in 0..3 {
                assert_eq!(
                    out.get_pixel(x + 1, y, ch)?,
                    frame0.get_pixel(x, y, ch)?,
                    "mismatch at ({x}, {y}) channel {ch}"
                );
            }
        }

        // Camera zero wins where both overlap.
        assert_eq!(out.get_pixel(96, 20, 2)?, 50);
        // Camera one alone covers the far side.
        assert_eq!(out.get_pixel(151, 20, 2)?, 255);

        Ok(())
    }

    #[test]
    fn pair_output_crops_to_the_content_union() {
        let frame0 = striped(SIZE_100);
        let frame1 = solid(SIZE_100, [0, 0, 255]);
        let compositor = Compositor::new(BlendMode::Overlay, true);

        let out = compositor
            .stitch(&[frame0, frame1], &[translation(-90.0, 0.0)])
            .unwrap();

        assert!(
            (190..=192).contains(&out.cols()),
            "union width was {}",
            out.cols()
        );
        assert!(
            (100..=102).contains(&out.rows()),
            "union height was {}",
            out.rows()
        );
    }

    #[test]
    fn quad_pixel_is_the_mean_of_its_contributors() -> Result<(), ImageError> {
        let frames = [
            solid(SIZE_50, [100, 40, 40]),
            solid(SIZE_50, [9, 9, 9]),
            solid(SIZE_50, [200, 60, 60]),
            solid(SIZE_50, [9, 9, 9]),
        ];
        // Cameras one and three are mapped far outside the canvas, so every
        // content pixel is covered by exactly cameras zero and two.
        let homographies = [
            translation(-1000.0, 0.0),
            translation(0.0, 0.0),
            translation(0.0, 0.0),
            translation(-1000.0, 0.0),
        ];
        let compositor = Compositor::new(BlendMode::Overlay, true);

        let out = compositor.stitch(&frames, &homographies).unwrap();

        assert_eq!(out.get_pixel(10, 10, 0)?, 150);
        assert_eq!(out.get_pixel(10, 10, 1)?, 50);
        assert_eq!(out.get_pixel(10, 10, 2)?, 50);

        // The margin column belongs to no camera and stays background.
        assert_eq!(out.get_pixel(50, 10, 0)?, 0);
        assert_eq!(out.get_pixel(50, 10, 1)?, 0);
        assert_eq!(out.get_pixel(50, 10, 2)?, 0);

        Ok(())
    }

    #[test]
    fn missing_homography_aborts_the_composite() {
        let frames = [striped(SIZE_100), solid(SIZE_100, [0, 0, 255])];
        let compositor = Compositor::new(BlendMode::Average, true);

        assert!(compositor.stitch(&frames, &[None]).is_none());
        assert!(compositor.stitch(&frames, &[]).is_none());
    }

    #[test]
    fn quad_with_one_missing_homography_aborts() {
        let frames = [
            solid(SIZE_50, [100, 40, 40]),
            solid(SIZE_50, [9, 9, 9]),
            solid(SIZE_50, [200, 60, 60]),
            solid(SIZE_50, [9, 9, 9]),
        ];
        let homographies = [
            translation(0.0, 0.0),
            translation(0.0, 0.0),
            None,
            translation(0.0, 0.0),
        ];
        let compositor = Compositor::new(BlendMode::Average, true);

        assert!(compositor.stitch(&frames, &homographies).is_none());
    }

    #[test]
    fn unsupported_camera_count_aborts() {
        let frames = vec![striped(SIZE_50); 3];
        let compositor = Compositor::new(BlendMode::Average, true);

        assert!(compositor.stitch(&frames, &[None, None, None]).is_none());
    }

    #[test]
    fn empty_frame_aborts_the_composite() {
        let frames = [striped(SIZE_100), Image::empty()];
        let compositor = Compositor::new(BlendMode::Average, true);

        assert!(compositor
            .stitch(&frames, &[translation(-90.0, 0.0)])
            .is_none());
    }
}
