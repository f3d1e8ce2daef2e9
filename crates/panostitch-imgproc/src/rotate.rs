use panostitch_image::{Image, ImageError};
use rayon::prelude::*;

/// Rotate the input image by 180 degrees.
///
/// Equivalent to flipping the image both horizontally and vertically, used
/// for cameras mounted upside down.
///
/// # Arguments
///
/// * `src` - The input image with shape (H, W, C).
///
/// # Returns
///
/// The rotated image with the same shape.
///
/// # Example
///
/// ```
/// use panostitch_image::{Image, ImageSize};
/// use panostitch_imgproc::rotate::rotate_180;
///
/// let image = Image::<u8, 1>::new(
///     ImageSize {
///         width: 2,
///         height: 2,
///     },
///     vec![1, 2, 3, 4],
/// )
/// .unwrap();
///
/// let rotated = rotate_180(&image).unwrap();
/// assert_eq!(rotated.as_slice(), &[4, 3, 2, 1]);
/// ```
pub fn rotate_180<T, const C: usize>(src: &Image<T, C>) -> Result<Image<T, C>, ImageError>
where
    T: Clone + Send + Sync,
{
    let mut dst = src.clone();
    let cols = src.cols();
    let rows = src.rows();
    let src_slice = src.as_slice();

    dst.as_slice_mut()
        .par_chunks_exact_mut(cols * C)
        .enumerate()
        .for_each(|(r, dst_row)| {
            let src_row = &src_slice[(rows - 1 - r) * cols * C..(rows - r) * cols * C];
            for c in 0..cols {
                let src_pixel = &src_row[(cols - 1 - c) * C..(cols - c) * C];
                dst_row[c * C..(c + 1) * C].clone_from_slice(src_pixel);
            }
        });

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use panostitch_image::{Image, ImageError, ImageSize};

    #[test]
    fn rotate_180_multi_channel() -> Result<(), ImageError> {
        let image = Image::<u8, 2>::new(
            ImageSize {
                width: 2,
                height: 2,
            },
            vec![1, 10, 2, 20, 3, 30, 4, 40],
        )?;

        let rotated = super::rotate_180(&image)?;
        assert_eq!(rotated.as_slice(), &[4, 40, 3, 30, 2, 20, 1, 10]);

        Ok(())
    }

    #[test]
    fn rotate_180_twice_is_identity() -> Result<(), ImageError> {
        let image = Image::<u8, 1>::new(
            ImageSize {
                width: 3,
                height: 2,
            },
            vec![1, 2, 3, 4, 5, 6],
        )?;

        let rotated = super::rotate_180(&super::rotate_180(&image)?)?;
        assert_eq!(rotated.as_slice(), image.as_slice());

        Ok(())
    }
}
