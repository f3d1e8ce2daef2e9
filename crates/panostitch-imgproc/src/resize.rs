use panostitch_image::{Image, ImageError};

use crate::interpolation::sample_bilinear;
use crate::parallel;

/// Resize an image to the destination size using bilinear interpolation.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image, pre-allocated with the target size.
///
/// # Errors
///
/// Returns an error if the source or destination image is zero-sized.
///
/// # Examples
///
/// ```
/// use panostitch_image::{Image, ImageSize};
/// use panostitch_imgproc::resize::resize_bilinear_u8;
///
/// let image = Image::<u8, 1>::new(
///     ImageSize {
///         width: 4,
///         height: 4,
///     },
///     vec![0u8; 4 * 4],
/// )
/// .unwrap();
///
/// let mut resized = Image::<u8, 1>::from_size_val(
///     ImageSize {
///         width: 2,
///         height: 2,
///     },
///     0u8,
/// )
/// .unwrap();
///
/// resize_bilinear_u8(&image, &mut resized).unwrap();
/// assert_eq!(resized.size().width, 2);
/// ```
pub fn resize_bilinear_u8<const C: usize>(
    src: &Image<u8, C>,
    dst: &mut Image<u8, C>,
) -> Result<(), ImageError> {
    if src.is_empty() || dst.is_empty() {
        return Err(ImageError::InvalidChannelShape(
            dst.as_slice().len(),
            src.as_slice().len(),
        ));
    }

    let scale_x = if dst.cols() > 1 {
        (src.cols() - 1) as f64 / (dst.cols() - 1) as f64
    } else {
        0.0
    };
    let scale_y = if dst.rows() > 1 {
        (src.rows() - 1) as f64 / (dst.rows() - 1) as f64
    } else {
        0.0
    };

    parallel::par_iter_rows_enumerated(dst, |row_idx, row| {
        let v = row_idx as f64 * scale_y;
        for (col_idx, pixel) in row.chunks_exact_mut(C).enumerate() {
            let u = col_idx as f64 * scale_x;
            if let Some(values) = sample_bilinear(src, u, v) {
                for (dst_ch, val) in pixel.iter_mut().zip(values.iter()) {
                    *dst_ch = val.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    });

    Ok(())
}
