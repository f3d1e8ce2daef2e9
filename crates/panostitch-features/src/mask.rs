use panostitch_image::{Image, ImageSize};

use crate::error::FeatureError;

/// Which edge of a frame holds the region shared with its neighbor camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapDirection {
    /// The shared region occupies the top edge.
    Up,
    /// The shared region occupies the bottom edge.
    Down,
    /// The shared region occupies the left edge.
    Left,
    /// The shared region occupies the right edge.
    Right,
}

impl OverlapDirection {
    /// Parse a direction from its single-letter code.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'U' => Some(Self::Up),
            'D' => Some(Self::Down),
            'L' => Some(Self::Left),
            'R' => Some(Self::Right),
            _ => None,
        }
    }

    /// The single-letter code for this direction.
    pub fn as_char(&self) -> char {
        match self {
            Self::Up => 'U',
            Self::Down => 'D',
            Self::Left => 'L',
            Self::Right => 'R',
        }
    }
}

impl std::fmt::Display for OverlapDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Build a binary region-of-interest mask for the overlap band of a frame.
///
/// The active band covers `round(dimension * overlap_fraction)` pixels on the
/// edge named by `direction`; the rest of the mask is zero. Restricting
/// detection to the band cuts both false matches and detector cost.
///
/// # Arguments
///
/// * `size` - The frame size the mask is built for.
/// * `direction` - The edge holding the shared region.
/// * `overlap_fraction` - The fraction of the frame covered by the band.
///
/// # Returns
///
/// A mask image with 255 in the active band and 0 elsewhere.
///
/// # Errors
///
/// Returns an error if `overlap_fraction` is outside `[0, 1]`.
///
/// # Examples
///
/// ```
/// use panostitch_image::ImageSize;
/// use panostitch_features::mask::{overlap_mask, OverlapDirection};
///
/// let size = ImageSize { width: 100, height: 100 };
/// let mask = overlap_mask(size, OverlapDirection::Right, 0.3).unwrap();
///
/// assert_eq!(mask.get_pixel(69, 0, 0).unwrap(), 0);
/// assert_eq!(mask.get_pixel(70, 0, 0).unwrap(), 255);
/// ```
pub fn overlap_mask(
    size: ImageSize,
    direction: OverlapDirection,
    overlap_fraction: f32,
) -> Result<Image<u8, 1>, FeatureError> {
    if !(0.0..=1.0).contains(&overlap_fraction) {
        return Err(FeatureError::InvalidOverlapFraction(overlap_fraction));
    }

    let mut mask = Image::from_size_val(size, 0u8)?;

    let band_cols = (size.width as f32 * overlap_fraction).round() as usize;
    let band_rows = (size.height as f32 * overlap_fraction).round() as usize;

    let (x0, x1, y0, y1) = match direction {
        OverlapDirection::Left => (0, band_cols.min(size.width), 0, size.height),
        OverlapDirection::Right => (size.width.saturating_sub(band_cols), size.width, 0, size.height),
        OverlapDirection::Up => (0, size.width, 0, band_rows.min(size.height)),
        OverlapDirection::Down => (0, size.width, size.height.saturating_sub(band_rows), size.height),
    };

    let cols = size.width;
    let data = mask.as_slice_mut();
    for y in y0..y1 {
        for item in data[y * cols + x0..y * cols + x1].iter_mut() {
            *item = 255;
        }
    }

    Ok(mask)
}
