//! Motion JPEG video recording.
//!
//! Composited frames are JPEG-compressed and appended to an AVI container,
//! one `00dc` chunk per frame plus a standard `idx1` index. The format is
//! deliberately boring so the files open in any player without relying on
//! system media libraries.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use panostitch_image::{Image, ImageSize};

use crate::error::IoError;
use crate::jpeg::encode_image_jpeg_rgb8;

/// Flag marking the AVI as carrying an index chunk.
const AVIF_HASINDEX: u32 = 0x10;

/// Index flag marking every motion JPEG frame as a keyframe.
const AVIIF_KEYFRAME: u32 = 0x10;

/// An AVI motion JPEG writer for the composited output stream.
///
/// All frames must match the size the recorder was opened with. The file
/// becomes playable once [`VideoRecorder::finalize`] ran, which also
/// happens on drop as a backstop.
pub struct VideoRecorder {
    writer: BufWriter<File>,
    size: ImageSize,
    quality: u8,
    frames: u32,
    index: Vec<(u32, u32)>,
    riff_size_pos: u64,
    total_frames_pos: u64,
    stream_length_pos: u64,
    movi_size_pos: u64,
    movi_fourcc_pos: u64,
    finalized: bool,
}

impl VideoRecorder {
    /// Open a recorder writing to `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Output file, conventionally with an `avi` extension.
    /// * `size` - Size every recorded frame must have.
    /// * `fps` - Playback rate the container advertises.
    /// * `quality` - JPEG quality, range from 0 (lowest) to 100 (highest).
    pub fn new(
        path: impl AsRef<Path>,
        size: ImageSize,
        fps: u32,
        quality: u8,
    ) -> Result<Self, IoError> {
        let file = File::create(path)?;
        let mut recorder = Self {
            writer: BufWriter::new(file),
            size,
            quality,
            frames: 0,
            index: Vec::new(),
            riff_size_pos: 0,
            total_frames_pos: 0,
            stream_length_pos: 0,
            movi_size_pos: 0,
            movi_fourcc_pos: 0,
            finalized: false,
        };
        recorder.write_headers(fps)?;
        Ok(recorder)
    }

    /// Number of frames recorded so far.
    pub fn frames_written(&self) -> u32 {
        self.frames
    }

    /// The frame size this recorder accepts.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Compress one frame and append it to the stream.
    pub fn write_frame(&mut self, frame: &Image<u8, 3>) -> Result<(), IoError> {
        if frame.size() != self.size {
            return Err(IoError::RecorderSizeMismatch {
                expected: self.size,
                got: frame.size(),
            });
        }

        let jpeg = encode_image_jpeg_rgb8(frame, self.quality)?;

        let chunk_pos = self.writer.stream_position()?;
        self.writer.write_all(b"00dc")?;
        self.writer.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.writer.write_all(&jpeg)?;
        if jpeg.len() % 2 == 1 {
            self.writer.write_all(&[0])?;
        }

        self.index
            .push(((chunk_pos - self.movi_fourcc_pos) as u32, jpeg.len() as u32));
        self.frames += 1;
        Ok(())
    }

    /// Write the index and patch the container sizes, closing the stream.
    ///
    /// Idempotent, later calls are no-ops.
    pub fn finalize(&mut self) -> Result<(), IoError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let index_pos = self.writer.stream_position()?;

        self.writer.write_all(b"idx1")?;
        self.writer
            .write_all(&((self.index.len() * 16) as u32).to_le_bytes())?;
        for (offset, length) in &self.index {
            self.writer.write_all(b"00dc")?;
            self.writer.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(&length.to_le_bytes())?;
        }

        let end_pos = self.writer.stream_position()?;

        self.patch_u32(self.riff_size_pos, (end_pos - 8) as u32)?;
        self.patch_u32(self.total_frames_pos, self.frames)?;
        self.patch_u32(self.stream_length_pos, self.frames)?;
        self.patch_u32(
            self.movi_size_pos,
            (index_pos - self.movi_size_pos - 4) as u32,
        )?;

        self.writer.seek(SeekFrom::Start(end_pos))?;
        self.writer.flush()?;
        Ok(())
    }

    fn patch_u32(&mut self, pos: u64, value: u32) -> Result<(), IoError> {
        self.writer.seek(SeekFrom::Start(pos))?;
        self.writer.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_headers(&mut self, fps: u32) -> Result<(), IoError> {
        let (width, height) = (self.size.width as u32, self.size.height as u32);
        let w = &mut self.writer;

        w.write_all(b"RIFF")?;
        self.riff_size_pos = w.stream_position()?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(b"AVI ")?;

        // hdrl list: one main header and one video stream description.
        w.write_all(b"LIST")?;
        w.write_all(&192u32.to_le_bytes())?;
        w.write_all(b"hdrl")?;

        w.write_all(b"avih")?;
        w.write_all(&56u32.to_le_bytes())?;
        w.write_all(&(1_000_000 / fps.max(1)).to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&AVIF_HASINDEX.to_le_bytes())?;
        self.total_frames_pos = w.stream_position()?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&1u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&width.to_le_bytes())?;
        w.write_all(&height.to_le_bytes())?;
        w.write_all(&[0u8; 16])?;

        w.write_all(b"LIST")?;
        w.write_all(&116u32.to_le_bytes())?;
        w.write_all(b"strl")?;

        w.write_all(b"strh")?;
        w.write_all(&56u32.to_le_bytes())?;
        w.write_all(b"vids")?;
        w.write_all(b"MJPG")?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&1u32.to_le_bytes())?;
        w.write_all(&fps.max(1).to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        self.stream_length_pos = w.stream_position()?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&u32::MAX.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&(width as u16).to_le_bytes())?;
        w.write_all(&(height as u16).to_le_bytes())?;

        w.write_all(b"strf")?;
        w.write_all(&40u32.to_le_bytes())?;
        w.write_all(&40u32.to_le_bytes())?;
        w.write_all(&(width as i32).to_le_bytes())?;
        w.write_all(&(height as i32).to_le_bytes())?;
        w.write_all(&1u16.to_le_bytes())?;
        w.write_all(&24u16.to_le_bytes())?;
        w.write_all(b"MJPG")?;
        w.write_all(&(width * height * 3).to_le_bytes())?;
        w.write_all(&[0u8; 16])?;

        w.write_all(b"LIST")?;
        self.movi_size_pos = w.stream_position()?;
        w.write_all(&0u32.to_le_bytes())?;
        self.movi_fourcc_pos = w.stream_position()?;
        w.write_all(b"movi")?;

        Ok(())
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.finalize() {
                log::warn!("failed to finalize video recording: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(size: ImageSize, shade: u8) -> Image<u8, 3> {
        Image::from_size_val(size, shade).unwrap()
    }

    const SIZE: ImageSize = ImageSize {
        width: 32,
        height: 24,
    };

    fn u32_at(bytes: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
    }

    #[test]
    fn container_structure_is_patched_on_finalize() -> Result<(), IoError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.avi");

        let mut recorder = VideoRecorder::new(&path, SIZE, 20, 85)?;
        for shade in [10, 120, 240] {
            recorder.write_frame(&frame(SIZE, shade))?;
        }
        assert_eq!(recorder.frames_written(), 3);
        recorder.finalize()?;
        drop(recorder);

        let bytes = std::fs::read(&path)?;

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(&bytes[24..28], b"avih");
        assert_eq!(&bytes[220..224], b"movi");

        // Patched sizes: whole-file RIFF size and both frame counts.
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(u32_at(&bytes, 48), 3);

        // The index chunk sits at the end, one entry per frame.
        let idx_pos = bytes.len() - 8 - 3 * 16;
        assert_eq!(&bytes[idx_pos..idx_pos + 4], b"idx1");
        assert_eq!(u32_at(&bytes, idx_pos + 4), 3 * 16);

        Ok(())
    }

    #[test]
    fn frame_chunks_carry_jpeg_data() -> Result<(), IoError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.avi");

        let mut recorder = VideoRecorder::new(&path, SIZE, 20, 85)?;
        recorder.write_frame(&frame(SIZE, 200))?;
        recorder.finalize()?;
        drop(recorder);

        let bytes = std::fs::read(&path)?;

        // First movi chunk directly follows the "movi" fourcc.
        assert_eq!(&bytes[224..228], b"00dc");
        let jpeg_len = u32_at(&bytes, 228) as usize;
        assert_eq!(&bytes[232..234], &[0xFF, 0xD8]);
        assert_eq!(&bytes[232 + jpeg_len - 2..232 + jpeg_len], &[0xFF, 0xD9]);

        Ok(())
    }

    #[test]
    fn wrong_frame_size_is_rejected() -> Result<(), IoError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.avi");

        let mut recorder = VideoRecorder::new(&path, SIZE, 20, 85)?;
        let odd = frame(
            ImageSize {
                width: 16,
                height: 16,
            },
            0,
        );

        let result = recorder.write_frame(&odd);
        assert!(matches!(
            result,
            Err(IoError::RecorderSizeMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn drop_finalizes_the_container() -> Result<(), IoError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dropped.avi");

        {
            let mut recorder = VideoRecorder::new(&path, SIZE, 20, 85)?;
            recorder.write_frame(&frame(SIZE, 60))?;
        }

        let bytes = std::fs::read(&path)?;
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(u32_at(&bytes, 48), 1);

        Ok(())
    }
}
