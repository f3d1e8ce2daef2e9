use std::path::Path;

use jpeg_encoder::{ColorType, Encoder};
use panostitch_image::Image;

use crate::error::IoError;

/// Writes the given JPEG _(rgb8)_ data to the given file path.
///
/// # Arguments
///
/// - `file_path` - The path to the JPEG image.
/// - `image` - The image containing the JPEG image data.
/// - `quality` - The quality of the JPEG encoding, range from 0 (lowest) to 100 (highest).
pub fn write_image_jpeg_rgb8(
    file_path: impl AsRef<Path>,
    image: &Image<u8, 3>,
    quality: u8,
) -> Result<(), IoError> {
    let image_size = image.size();
    let encoder = Encoder::new_file(file_path, quality)?;
    encoder.encode(
        image.as_slice(),
        image_size.width as u16,
        image_size.height as u16,
        ColorType::Rgb,
    )?;
    Ok(())
}

/// Encodes the given image _(rgb8)_ into an in-memory JPEG stream.
///
/// # Arguments
///
/// - `image` - The image to encode.
/// - `quality` - The quality of the JPEG encoding, range from 0 (lowest) to 100 (highest).
///
/// # Returns
///
/// The encoded JPEG bytes.
pub fn encode_image_jpeg_rgb8(image: &Image<u8, 3>, quality: u8) -> Result<Vec<u8>, IoError> {
    let image_size = image.size();
    let mut buffer = Vec::new();
    let encoder = Encoder::new(&mut buffer, quality);
    encoder.encode(
        image.as_slice(),
        image_size.width as u16,
        image_size.height as u16,
        ColorType::Rgb,
    )?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panostitch_image::ImageSize;

    fn gradient() -> Image<u8, 3> {
        let size = ImageSize {
            width: 32,
            height: 24,
        };
        let mut data = vec![0u8; size.width * size.height * 3];
        for (i, value) in data.iter_mut().enumerate() {
            *value = (i % 255) as u8;
        }
        Image::new(size, data).unwrap()
    }

    #[test]
    fn encode_produces_a_jpeg_stream() -> Result<(), IoError> {
        let encoded = encode_image_jpeg_rgb8(&gradient(), 90)?;

        // JFIF streams start with the SOI marker and end with EOI.
        assert_eq!(&encoded[0..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);

        Ok(())
    }

    #[test]
    fn write_creates_the_file() -> Result<(), IoError> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("still.jpg");

        write_image_jpeg_rgb8(&file_path, &gradient(), 90)?;

        assert!(file_path.exists());
        assert!(std::fs::metadata(&file_path)?.len() > 0);

        Ok(())
    }
}
