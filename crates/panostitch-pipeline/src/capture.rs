use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use panostitch_image::{Image, ImageSize};
use panostitch_imgproc::rotate::rotate_180;
use panostitch_io::png::read_image_png_rgb8;
use panostitch_io::telemetry::{TelemetryCategory, TelemetryClient, TelemetryPhase};

use crate::error::PipelineError;
use crate::sync::{lock_unpoisoned, WorkerCell};

/// Overlap between neighbouring views of the synthetic scene.
const SYNTHETIC_OVERLAP: f64 = 0.8;

/// Where a frame source pulls its frames from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    /// A Video4Linux capture device, by device index.
    #[cfg(feature = "v4l")]
    Device {
        /// Index of the `/dev/video*` node.
        index: usize,
    },
    /// PNG frames looped from a directory, in file name order.
    CannedDirectory(PathBuf),
    /// A procedurally generated test scene.
    Synthetic,
}

/// Settings of one frame source.
#[derive(Clone, Debug)]
pub struct FrameSourceConfig {
    /// Camera id, also the slot written in the shared frame store.
    pub camera_id: usize,
    /// Requested capture size.
    pub size: ImageSize,
    /// Capture rate requested from a live device.
    pub fps: u32,
    /// The camera is mounted upside down, rotate every frame.
    pub inverted: bool,
    /// Frame origin.
    pub backend: CaptureBackend,
}

/// One camera worker.
///
/// The thread opens its backend once at startup, then captures exactly one
/// frame per coordinator trigger into its slot of the shared frame store.
/// An unavailable backend degrades to the synthetic scene with a warning, a
/// failed capture publishes an empty frame. Neither stops the worker.
pub(crate) struct FrameSource {
    cell: Arc<WorkerCell>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    pub fn spawn(
        config: FrameSourceConfig,
        frames: Arc<Mutex<Vec<Image<u8, 3>>>>,
        telemetry: TelemetryClient,
    ) -> Result<Self, PipelineError> {
        let cell = Arc::new(WorkerCell::new());
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", config.camera_id))
            .spawn({
                let cell = cell.clone();
                move || capture_worker(config, cell, frames, telemetry)
            })
            .map_err(|e| PipelineError::ThreadSpawnError("capture".into(), e))?;
        Ok(Self {
            cell,
            handle: Some(handle),
        })
    }

    pub fn cell(&self) -> &Arc<WorkerCell> {
        &self.cell
    }

    /// Ask the worker to exit. Follow up with [`FrameSource::join`].
    pub fn cancel(&self) {
        self.cell.cancel();
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("a capture worker exited by panic");
            }
        }
    }
}

fn capture_worker(
    config: FrameSourceConfig,
    cell: Arc<WorkerCell>,
    frames: Arc<Mutex<Vec<Image<u8, 3>>>>,
    telemetry: TelemetryClient,
) {
    let camera_id = config.camera_id;
    match config.backend.clone() {
        #[cfg(feature = "v4l")]
        CaptureBackend::Device { index } => {
            use panostitch_io::v4l_capture::{V4lCamera, V4lCaptureConfig};
            let device_config = V4lCaptureConfig {
                index,
                size: config.size,
                fps: config.fps,
            };
            let camera = match V4lCamera::open(&device_config) {
                Ok(camera) => camera,
                Err(e) => {
                    log::warn!(
                        "camera {camera_id}: cannot open device {index}: {e}, \
                         using the synthetic scene instead"
                    );
                    return run_synthetic(&config, &cell, &frames, &telemetry);
                }
            };
            let mut stream = match camera.stream() {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!(
                        "camera {camera_id}: cannot start streaming from device {index}: {e}, \
                         using the synthetic scene instead"
                    );
                    return run_synthetic(&config, &cell, &frames, &telemetry);
                }
            };
            run_capture_loop(&config, &cell, &frames, &telemetry, move || {
                stream.read_frame().unwrap_or_else(|e| {
                    log::warn!("camera {camera_id}: capture failed: {e}");
                    Image::empty()
                })
            });
        }
        CaptureBackend::CannedDirectory(dir) => {
            let canned = load_canned_frames(&dir);
            if canned.is_empty() {
                log::warn!(
                    "camera {camera_id}: no usable frames under {}, \
                     using the synthetic scene instead",
                    dir.display()
                );
                run_synthetic(&config, &cell, &frames, &telemetry);
            } else {
                log::info!(
                    "camera {camera_id}: looping {} canned frames from {}",
                    canned.len(),
                    dir.display()
                );
                let mut cursor = 0;
                run_capture_loop(&config, &cell, &frames, &telemetry, move || {
                    let frame = canned[cursor % canned.len()].clone();
                    cursor += 1;
                    frame
                });
            }
        }
        CaptureBackend::Synthetic => run_synthetic(&config, &cell, &frames, &telemetry),
    }
}

fn run_synthetic(
    config: &FrameSourceConfig,
    cell: &WorkerCell,
    frames: &Mutex<Vec<Image<u8, 3>>>,
    telemetry: &TelemetryClient,
) {
    let camera_id = config.camera_id;
    let size = config.size;
    let mut tick = 0;
    run_capture_loop(config, cell, frames, telemetry, move || {
        let frame = synthetic_frame(size, camera_id, tick);
        tick += 1;
        frame
    });
}

/// Capture one frame per trigger until cancelled.
fn run_capture_loop(
    config: &FrameSourceConfig,
    cell: &WorkerCell,
    frames: &Mutex<Vec<Image<u8, 3>>>,
    telemetry: &TelemetryClient,
    mut produce: impl FnMut() -> Image<u8, 3>,
) {
    let camera_id = config.camera_id;
    let mut last_seen = 0;
    while let Some(cycle) = cell.await_trigger(last_seen) {
        last_seen = cycle;
        telemetry.send(TelemetryCategory::Capture, camera_id, TelemetryPhase::Start);
        let mut frame = produce();
        if config.inverted && !frame.is_empty() {
            frame = match rotate_180(&frame) {
                Ok(rotated) => rotated,
                Err(e) => {
                    log::warn!("camera {camera_id}: failed to rotate the frame: {e}");
                    Image::empty()
                }
            };
        }
        telemetry.send(TelemetryCategory::Capture, camera_id, TelemetryPhase::End);

        let mut store = lock_unpoisoned(frames);
        if let Some(slot) = store.get_mut(camera_id) {
            *slot = frame;
        }
        drop(store);

        cell.mark_done(cycle);
    }
    log::debug!("capture worker {camera_id} stopped");
}

/// Load every PNG under `dir`, sorted by file name. Unreadable files are
/// skipped, an unreadable directory yields an empty list.
fn load_canned_frames(dir: &Path) -> Vec<Image<u8, 3>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cannot read the canned frame directory {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        match read_image_png_rgb8(path) {
            Ok(frame) => frames.push(frame),
            Err(e) => log::warn!("skipping canned frame {}: {e}", path.display()),
        }
    }
    frames
}

/// Procedural capture scene.
///
/// Every camera looks at the same plane of high-contrast blocks, offset by
/// its grid position so neighbouring views overlap the way the default
/// topology expects. A bright marker sweeps the plane so consecutive
/// frames differ.
fn synthetic_frame(size: ImageSize, camera_id: usize, tick: u64) -> Image<u8, 3> {
    let cols = size.width;
    let rows = size.height;
    let column = (camera_id % 2) as f64;
    let row = (camera_id / 2) as f64;
    let offset_x = (column * cols as f64 * (1.0 - SYNTHETIC_OVERLAP)) as i64;
    let offset_y = (row * rows as f64 * (1.0 - SYNTHETIC_OVERLAP)) as i64;

    let mut data = vec![0u8; cols * rows * 3];
    for y in 0..rows {
        for x in 0..cols {
            let pixel = scene_pixel(x as i64 + offset_x, y as i64 + offset_y, tick);
            let at = (y * cols + x) * 3;
            data[at..at + 3].copy_from_slice(&pixel);
        }
    }
    match Image::new(size, data) {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("cannot build a synthetic frame: {e}");
            Image::empty()
        }
    }
}

fn scene_pixel(x: i64, y: i64, tick: u64) -> [u8; 3] {
    // 12px blocks with an 8px bright core, hashed for contrast.
    let bx = x.div_euclid(12);
    let by = y.div_euclid(12);
    let in_core = x.rem_euclid(12) < 8 && y.rem_euclid(12) < 8;
    let hash = bx.wrapping_mul(31).wrapping_add(by.wrapping_mul(17)) as u64;
    let mut pixel = if in_core {
        [
            (hash.wrapping_mul(97) % 200 + 40) as u8,
            (hash.wrapping_mul(57) % 200 + 40) as u8,
            (hash.wrapping_mul(23) % 200 + 40) as u8,
        ]
    } else {
        [12, 12, 16]
    };
    // A 5px wide marker column sweeping the plane.
    let marker_x = (tick * 5 % 600) as i64;
    if (x - marker_x).abs() < 3 && y.rem_euclid(48) < 6 {
        pixel = [255, 255, 255];
    }
    pixel
}

#[cfg(test)]
mod tests {
    use super::*;
    use panostitch_io::png::write_image_png_rgb8;
    use std::time::{Duration, Instant};

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn run_one_cycle(source: &FrameSource) {
        source.cell().trigger();
        assert!(source.cell().wait_done(source.cell().current_cycle(), deadline()));
    }

    fn store_for(cameras: usize) -> Arc<Mutex<Vec<Image<u8, 3>>>> {
        Arc::new(Mutex::new(vec![Image::empty(); cameras]))
    }

    fn source_config(backend: CaptureBackend) -> FrameSourceConfig {
        FrameSourceConfig {
            camera_id: 0,
            size: ImageSize {
                width: 64,
                height: 48,
            },
            fps: 30,
            inverted: false,
            backend,
        }
    }

    #[test]
    fn synthetic_source_publishes_frames() -> Result<(), PipelineError> {
        let frames = store_for(1);
        let mut source = FrameSource::spawn(
            source_config(CaptureBackend::Synthetic),
            frames.clone(),
            TelemetryClient::default(),
        )?;

        run_one_cycle(&source);

        let store = frames.lock().unwrap();
        assert!(!store[0].is_empty());
        assert_eq!(store[0].cols(), 64);
        assert_eq!(store[0].rows(), 48);
        drop(store);

        source.cancel();
        source.join();
        Ok(())
    }

    #[test]
    fn inverted_sources_rotate_their_frames() -> Result<(), Box<dyn std::error::Error>> {
        let frames = store_for(1);
        let mut upright = FrameSource::spawn(
            source_config(CaptureBackend::Synthetic),
            frames.clone(),
            TelemetryClient::default(),
        )?;
        run_one_cycle(&upright);
        let reference = frames.lock().unwrap()[0].clone();
        upright.cancel();
        upright.join();

        let mut config = source_config(CaptureBackend::Synthetic);
        config.inverted = true;
        let mut inverted =
            FrameSource::spawn(config, frames.clone(), TelemetryClient::default())?;
        run_one_cycle(&inverted);
        let flipped = frames.lock().unwrap()[0].clone();
        inverted.cancel();
        inverted.join();

        let expected = rotate_180(&reference)?;
        assert_eq!(flipped, expected);
        Ok(())
    }

    #[test]
    fn canned_directory_loops_in_name_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let size = ImageSize {
            width: 4,
            height: 4,
        };
        let red = Image::from_size_val(size, 0u8).map(|mut f| {
            for pixel in f.as_slice_mut().chunks_exact_mut(3) {
                pixel[0] = 255;
            }
            f
        })?;
        let blue = Image::from_size_val(size, 0u8).map(|mut f| {
            for pixel in f.as_slice_mut().chunks_exact_mut(3) {
                pixel[2] = 255;
            }
            f
        })?;
        write_image_png_rgb8(dir.path().join("000.png"), &red)?;
        write_image_png_rgb8(dir.path().join("001.png"), &blue)?;

        let frames = store_for(1);
        let mut source = FrameSource::spawn(
            source_config(CaptureBackend::CannedDirectory(dir.path().to_path_buf())),
            frames.clone(),
            TelemetryClient::default(),
        )?;

        let mut first_channels = Vec::new();
        for _ in 0..3 {
            run_one_cycle(&source);
            let store = frames.lock().unwrap();
            let pixel = [
                store[0].get_pixel(0, 0, 0).unwrap(),
                store[0].get_pixel(0, 0, 2).unwrap(),
            ];
            first_channels.push(pixel);
        }
        source.cancel();
        source.join();

        assert_eq!(first_channels, vec![[255, 0], [0, 255], [255, 0]]);
        Ok(())
    }

    #[test]
    fn a_missing_directory_degrades_to_the_synthetic_scene() -> Result<(), PipelineError> {
        let frames = store_for(1);
        let mut source = FrameSource::spawn(
            source_config(CaptureBackend::CannedDirectory(PathBuf::from(
                "/definitely/not/here",
            ))),
            frames.clone(),
            TelemetryClient::default(),
        )?;

        run_one_cycle(&source);
        assert!(!frames.lock().unwrap()[0].is_empty());

        source.cancel();
        source.join();
        Ok(())
    }

    #[test]
    fn neighbouring_synthetic_views_share_content() {
        let size = ImageSize {
            width: 100,
            height: 80,
        };
        let left = synthetic_frame(size, 0, 0);
        let right = synthetic_frame(size, 1, 0);
        // Camera 1 sits 20 columns to the right of camera 0.
        for y in 0..80 {
            for x in 0..60 {
                assert_eq!(
                    left.get_pixel(x + 20, y, 0).unwrap(),
                    right.get_pixel(x, y, 0).unwrap(),
                    "mismatch at ({x}, {y})"
                );
            }
        }
    }
}
