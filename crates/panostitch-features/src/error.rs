use panostitch_image::ImageError;

/// An error type for the features module.
#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    /// Error coming from image container operations.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error when the overlap fraction is outside the valid range.
    #[error("Overlap fraction {0} is outside [0, 1]")]
    InvalidOverlapFraction(f32),

    /// Error when a frame of the pair has no pixels.
    #[error("Cannot match an empty frame")]
    EmptyFrame,
}
