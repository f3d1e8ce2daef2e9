//! Live camera capture through Video4Linux.
//!
//! Thin layer over memory-mapped streaming: format negotiation happens at
//! open, frames come out as packed RGB whatever the driver delivers. Only
//! `RGB3` and `YUYV` sources are handled, which covers the webcams this
//! pipeline targets.

use panostitch_image::{Image, ImageSize};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::error::IoError;

const FOURCC_RGB3: [u8; 4] = *b"RGB3";
const FOURCC_YUYV: [u8; 4] = *b"YUYV";

/// Configuration for a Video4Linux capture device.
pub struct V4lCaptureConfig {
    /// The device index, `/dev/video<index>`.
    pub index: usize,
    /// The desired image size.
    pub size: ImageSize,
    /// The desired frames per second.
    pub fps: u32,
}

impl Default for V4lCaptureConfig {
    fn default() -> Self {
        Self {
            index: 0,
            size: ImageSize {
                width: 640,
                height: 480,
            },
            fps: 30,
        }
    }
}

/// An opened capture device with a negotiated format.
pub struct V4lCamera {
    device: Device,
    size: ImageSize,
    fourcc: FourCC,
}

impl V4lCamera {
    /// Open and configure the device.
    ///
    /// Packed RGB is requested first; drivers that refuse it fall back to
    /// their preference, accepted when it is `YUYV`.
    ///
    /// # Errors
    ///
    /// I/O errors from the device, or [`IoError::UnsupportedPixelFormat`]
    /// when the driver insists on a format this module cannot decode.
    pub fn open(config: &V4lCaptureConfig) -> Result<Self, IoError> {
        let device = Device::new(config.index)?;

        let mut format = device.format()?;
        format.width = config.size.width as u32;
        format.height = config.size.height as u32;
        format.fourcc = FourCC::new(&FOURCC_RGB3);
        device.set_format(&format)?;

        let actual = device.format()?;
        if actual.fourcc != FourCC::new(&FOURCC_RGB3) && actual.fourcc != FourCC::new(&FOURCC_YUYV)
        {
            return Err(IoError::UnsupportedPixelFormat(
                String::from_utf8_lossy(&actual.fourcc.repr).into_owned(),
            ));
        }

        device.set_params(&Parameters::with_fps(config.fps))?;

        let size = ImageSize {
            width: actual.width as usize,
            height: actual.height as usize,
        };
        if size != config.size {
            log::warn!(
                "camera {} negotiated {} instead of the requested {}",
                config.index,
                size,
                config.size
            );
        }

        Ok(Self {
            device,
            size,
            fourcc: actual.fourcc,
        })
    }

    /// The negotiated frame size.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Start memory-mapped streaming.
    ///
    /// The stream borrows the camera, so keep the camera alive for as long
    /// as frames are read.
    pub fn stream(&self) -> Result<V4lStream<'_>, IoError> {
        Ok(V4lStream {
            stream: Stream::with_buffers(&self.device, Type::VideoCapture, 4)?,
            size: self.size,
            fourcc: self.fourcc,
        })
    }
}

/// A running capture stream producing RGB frames.
pub struct V4lStream<'a> {
    stream: Stream<'a>,
    size: ImageSize,
    fourcc: FourCC,
}

impl V4lStream<'_> {
    /// Block until the next frame arrives and convert it to packed RGB.
    pub fn read_frame(&mut self) -> Result<Image<u8, 3>, IoError> {
        let (buffer, _meta) = self.stream.next()?;

        if self.fourcc == FourCC::new(&FOURCC_YUYV) {
            yuyv_to_rgb(buffer, self.size)
        } else {
            let expected = self.size.width * self.size.height * 3;
            if buffer.len() < expected {
                return Err(IoError::ShortCameraFrame(buffer.len(), expected));
            }
            Ok(Image::new(self.size, buffer[..expected].to_vec())?)
        }
    }
}

/// Convert one packed YUYV 4:2:2 buffer to RGB using BT.601 coefficients.
fn yuyv_to_rgb(buffer: &[u8], size: ImageSize) -> Result<Image<u8, 3>, IoError> {
    let expected = size.width * size.height * 2;
    if buffer.len() < expected {
        return Err(IoError::ShortCameraFrame(buffer.len(), expected));
    }

    let mut rgb = Vec::with_capacity(size.width * size.height * 3);
    for quad in buffer[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (
            quad[0] as f32,
            quad[1] as f32 - 128.0,
            quad[2] as f32,
            quad[3] as f32 - 128.0,
        );
        for y in [y0, y1] {
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }

    Ok(Image::new(size, rgb)?)
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
