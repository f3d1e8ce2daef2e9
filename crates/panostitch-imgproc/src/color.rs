use panostitch_image::{Image, ImageError};

use crate::parallel;

/// Convert an RGB image to grayscale using the luminance formula.
///
/// Uses fixed-point weights (77, 150, 29) / 256 approximating the
/// (0.299, 0.587, 0.114) luminance coefficients.
///
/// # Arguments
///
/// * `src` - The input RGB8 image with shape (H, W, 3).
/// * `dst` - The output grayscale image with shape (H, W, 1).
///
/// # Errors
///
/// Returns an error if the destination size does not match the source.
///
/// # Examples
///
/// ```
/// use panostitch_image::{Image, ImageSize};
/// use panostitch_imgproc::color::gray_from_rgb_u8;
///
/// let image = Image::<u8, 3>::new(
///     ImageSize {
///         width: 4,
///         height: 5,
///     },
///     vec![128u8; 4 * 5 * 3],
/// )
/// .unwrap();
///
/// let mut gray = Image::<u8, 1>::from_size_val(image.size(), 0).unwrap();
/// gray_from_rgb_u8(&image, &mut gray).unwrap();
///
/// assert_eq!(gray.num_channels(), 1);
/// assert_eq!(gray.size().width, 4);
/// assert_eq!(gray.size().height, 5);
/// ```
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidChannelShape(
            dst.as_slice().len(),
            src.cols() * src.rows(),
        ));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let r = src_pixel[0] as u16;
        let g = src_pixel[1] as u16;
        let b = src_pixel[2] as u16;
        dst_pixel[0] = ((77 * r + 150 * g + 29 * b) >> 8) as u8;
    });

    Ok(())
}
