use panostitch_image::Image;

/// Sample a pixel with nearest-neighbor interpolation.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to sample.
/// * `v` - The y coordinate of the pixel to sample.
///
/// # Returns
///
/// The pixel channels, or `None` when the rounded coordinate falls outside
/// the image bounds.
pub fn sample_nearest<const C: usize>(image: &Image<u8, C>, u: f64, v: f64) -> Option<[f32; C]> {
    let iu = u.round();
    let iv = v.round();

    if iu < 0.0 || iv < 0.0 || iu >= image.cols() as f64 || iv >= image.rows() as f64 {
        return None;
    }

    let base = (iv as usize * image.cols() + iu as usize) * C;
    let data = &image.as_slice()[base..base + C];

    let mut pixel = [0.0; C];
    for (dst, src) in pixel.iter_mut().zip(data.iter()) {
        *dst = *src as f32;
    }

    Some(pixel)
}

/// Sample a pixel with bilinear interpolation.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to sample.
/// * `v` - The y coordinate of the pixel to sample.
///
/// # Returns
///
/// The interpolated pixel channels, or `None` when the coordinate falls
/// outside the image bounds.
pub fn sample_bilinear<const C: usize>(image: &Image<u8, C>, u: f64, v: f64) -> Option<[f32; C]> {
    let (rows, cols) = (image.rows(), image.cols());
    if rows == 0 || cols == 0 {
        return None;
    }

    if u < 0.0 || v < 0.0 || u > (cols - 1) as f64 || v > (rows - 1) as f64 {
        return None;
    }

    let iu0 = u.trunc() as usize;
    let iv0 = v.trunc() as usize;
    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let frac_u = u.fract() as f32;
    let frac_v = v.fract() as f32;

    let w00 = (1.0 - frac_u) * (1.0 - frac_v);
    let w01 = frac_u * (1.0 - frac_v);
    let w10 = (1.0 - frac_u) * frac_v;
    let w11 = frac_u * frac_v;

    let data = image.as_slice();
    let base00 = (iv0 * cols + iu0) * C;
    let base01 = (iv0 * cols + iu1) * C;
    let base10 = (iv1 * cols + iu0) * C;
    let base11 = (iv1 * cols + iu1) * C;

    let p00 = &data[base00..base00 + C];
    let p01 = &data[base01..base01 + C];
    let p10 = &data[base10..base10 + C];
    let p11 = &data[base11..base11 + C];

    let mut pixel = [0.0; C];
    for k in 0..C {
        pixel[k] =
            p00[k] as f32 * w00 + p01[k] as f32 * w01 + p10[k] as f32 * w10 + p11[k] as f32 * w11;
    }

    Some(pixel)
}
