use panostitch_image::{ImageError, ImageSize};

/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(std::path::PathBuf),

    /// Error to open or manipulate the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to encode the JPEG image.
    #[error("Error with Jpeg encoding. {0}")]
    JpegEncodingError(#[from] jpeg_encoder::EncodingError),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] ImageError),

    /// Error to encode the PNG image.
    #[error("Failed to encode the png image. {0}")]
    PngEncodingError(String),

    /// Error to decode the PNG image.
    #[error("Failed to decode the png image. {0}")]
    PngDecodeError(String),

    /// Error when a frame handed to the recorder has the wrong size.
    #[error("Frame size {got} does not match the recorder size {expected}")]
    RecorderSizeMismatch {
        /// Size the recorder was opened with.
        expected: ImageSize,
        /// Size of the offending frame.
        got: ImageSize,
    },

    /// Error when the camera negotiated a pixel format we cannot decode.
    #[cfg(feature = "v4l")]
    #[error("Unsupported camera pixel format {0}")]
    UnsupportedPixelFormat(String),

    /// Error when a camera buffer is shorter than one frame.
    #[cfg(feature = "v4l")]
    #[error("Camera frame has {0} bytes, expected at least {1}")]
    ShortCameraFrame(usize, usize),
}
