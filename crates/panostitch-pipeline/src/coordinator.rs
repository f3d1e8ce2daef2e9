use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use panostitch_features::Homography;
use panostitch_image::{Image, ImageSize};
use panostitch_io::fps_counter::FpsCounter;
use panostitch_io::recorder::VideoRecorder;
use panostitch_io::telemetry::{TelemetryCategory, TelemetryClient, TelemetryPhase};

use crate::capture::{CaptureBackend, FrameSource, FrameSourceConfig};
use crate::config::StitchConfig;
use crate::error::PipelineError;
use crate::sync::{lock_unpoisoned, WorkerCell};
use crate::topology::CameraTopology;
use crate::tracker::{HomographyTracker, TrackerPhase};

/// Longest wait for every camera to deliver a frame in one capture cycle.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wait for every pair to finish one estimation round.
pub const HOMOGRAPHY_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between homography estimation rounds.
const ESTIMATION_PAUSE: Duration = Duration::from_millis(10);

enum RecordingState {
    /// Recording requested, waiting for the first composite to fix the size.
    Pending { path: PathBuf },
    Open(VideoRecorder),
}

/// Owner of a stitching run.
///
/// The coordinator spawns one [`FrameSource`] per camera and one
/// [`HomographyTracker`] per overlapping pair. Capture runs in lockstep,
/// one cycle per [`PipelineCoordinator::capture_and_stitch`] call, while
/// estimation rounds keep running on their own cadence in the background.
/// Per-cycle failures degrade to the previous output and retry, so after a
/// successful [`PipelineCoordinator::start`] the pipeline only goes down
/// when told to.
pub struct PipelineCoordinator {
    config: Arc<Mutex<StitchConfig>>,
    topology: CameraTopology,
    backends: Vec<CaptureBackend>,
    telemetry: TelemetryClient,
    frames: Arc<Mutex<Vec<Image<u8, 3>>>>,
    sources: Vec<FrameSource>,
    trackers: Vec<HomographyTracker>,
    driver: Option<JoinHandle<()>>,
    driver_cancelled: Arc<AtomicBool>,
    recording: Option<RecordingState>,
    last_output: Option<Image<u8, 3>>,
    fps: FpsCounter,
    running: bool,
}

impl PipelineCoordinator {
    /// Build a coordinator for the configured rig with the default frame
    /// origin per camera: the matching Video4Linux device when the `v4l`
    /// feature is enabled, the synthetic scene otherwise.
    ///
    /// Workers are not spawned until [`PipelineCoordinator::start`].
    ///
    /// # Errors
    ///
    /// The camera count must be 1, 2 or 4 and the per-camera settings must
    /// cover every camera.
    pub fn new(config: StitchConfig) -> Result<Self, PipelineError> {
        let backends = (0..config.camera_count).map(default_backend).collect();
        Self::with_backends(config, backends)
    }

    /// Build a coordinator with an explicit frame origin per camera.
    ///
    /// # Errors
    ///
    /// As [`PipelineCoordinator::new`], and the backend list must cover
    /// every camera.
    pub fn with_backends(
        config: StitchConfig,
        backends: Vec<CaptureBackend>,
    ) -> Result<Self, PipelineError> {
        let topology = CameraTopology::for_camera_count(config.camera_count)?;
        if config.cameras.len() < config.camera_count {
            return Err(PipelineError::CameraSettingsMismatch {
                settings: config.cameras.len(),
                cameras: config.camera_count,
            });
        }
        if backends.len() != config.camera_count {
            return Err(PipelineError::BackendMismatch {
                backends: backends.len(),
                cameras: config.camera_count,
            });
        }

        let telemetry = TelemetryClient::with_port(config.telemetry_port);
        let frames = Arc::new(Mutex::new(vec![Image::empty(); config.camera_count]));
        Ok(Self {
            config: Arc::new(Mutex::new(config)),
            topology,
            backends,
            telemetry,
            frames,
            sources: Vec::new(),
            trackers: Vec::new(),
            driver: None,
            driver_cancelled: Arc::new(AtomicBool::new(false)),
            recording: None,
            last_output: None,
            fps: FpsCounter::new(),
            running: false,
        })
    }

    /// Spawn every worker thread and begin estimating.
    ///
    /// This is where the fatal failures of a run happen. Once started,
    /// per-cycle trouble (a slow camera, a failed estimate, a failed
    /// composite) is logged and retried instead.
    ///
    /// # Errors
    ///
    /// The pipeline is already running, or a worker thread could not be
    /// spawned. A partial startup is torn down before returning.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running {
            return Err(PipelineError::AlreadyStarted);
        }
        let config = lock_unpoisoned(&self.config).clone();
        log::info!(
            "starting the stitching pipeline: {} cameras, {} tracked pairs",
            config.camera_count,
            self.topology.pairs().len()
        );

        if let Err(e) = self.spawn_workers(&config) {
            self.shutdown_workers();
            return Err(e);
        }
        self.fps.reset();
        self.running = true;
        Ok(())
    }

    fn spawn_workers(&mut self, config: &StitchConfig) -> Result<(), PipelineError> {
        for (camera_id, backend) in self.backends.iter().enumerate() {
            let settings = config.cameras[camera_id];
            let source = FrameSource::spawn(
                FrameSourceConfig {
                    camera_id,
                    size: settings.size(),
                    fps: config.capture_fps,
                    inverted: settings.inverted,
                    backend: backend.clone(),
                },
                self.frames.clone(),
                self.telemetry.clone(),
            )?;
            self.sources.push(source);
        }

        for (pair_id, pair) in self.topology.pairs().iter().enumerate() {
            let tracker = HomographyTracker::spawn(
                pair_id,
                *pair,
                self.config.clone(),
                self.frames.clone(),
                self.telemetry.clone(),
            )?;
            self.trackers.push(tracker);
        }

        if !self.trackers.is_empty() {
            let cells: Vec<Arc<WorkerCell>> =
                self.trackers.iter().map(|t| t.cell().clone()).collect();
            self.driver_cancelled.store(false, Ordering::SeqCst);
            let driver = std::thread::Builder::new()
                .name("homography-driver".into())
                .spawn({
                    let cancelled = self.driver_cancelled.clone();
                    move || homography_driver(cells, cancelled)
                })
                .map_err(|e| PipelineError::ThreadSpawnError("homography driver".into(), e))?;
            self.driver = Some(driver);
        }
        Ok(())
    }

    /// Run one capture cycle and composite the result.
    ///
    /// Triggers every camera, waits for the capture barrier, snapshots the
    /// frames and the current homographies and stitches them. On success
    /// the composite becomes the new output, is recorded when a recording
    /// is active and is returned. Any per-cycle failure returns the
    /// previous output instead, so the caller always holds the best frame
    /// available.
    pub fn capture_and_stitch(&mut self) -> Option<Image<u8, 3>> {
        if !self.running {
            log::warn!("capture requested before the pipeline was started");
            return self.last_output.clone();
        }

        self.telemetry
            .send(TelemetryCategory::Stitch, 0, TelemetryPhase::Start);
        let composite = self.run_cycle();
        self.telemetry
            .send(TelemetryCategory::Stitch, 0, TelemetryPhase::End);

        match composite {
            Some(frame) => {
                self.fps.update();
                self.record_frame(&frame);
                self.last_output = Some(frame.clone());
                Some(frame)
            }
            None => self.last_output.clone(),
        }
    }

    fn run_cycle(&mut self) -> Option<Image<u8, 3>> {
        for source in &self.sources {
            source.cell().trigger();
        }
        let deadline = Instant::now() + CAPTURE_TIMEOUT;
        for (camera_id, source) in self.sources.iter().enumerate() {
            let cycle = source.cell().current_cycle();
            if !source.cell().wait_done(cycle, deadline) {
                log::warn!(
                    "camera {camera_id} missed the {CAPTURE_TIMEOUT:?} capture deadline, \
                     dropping the cycle"
                );
                return None;
            }
        }

        let frames = lock_unpoisoned(&self.frames).clone();
        if frames.iter().any(|frame| frame.is_empty()) {
            log::warn!("dropping the cycle, at least one camera delivered an empty frame");
            return None;
        }

        let homographies: Vec<Option<Homography>> = self
            .trackers
            .iter()
            .map(|tracker| Some(tracker.current_homography()))
            .collect();

        let config = lock_unpoisoned(&self.config).clone();
        config.compositor().stitch(&frames, &homographies)
    }

    fn record_frame(&mut self, frame: &Image<u8, 3>) {
        let Some(state) = self.recording.take() else {
            return;
        };
        let mut recorder = match state {
            RecordingState::Open(recorder) => recorder,
            RecordingState::Pending { path } => {
                let config = lock_unpoisoned(&self.config);
                match VideoRecorder::new(
                    &path,
                    frame.size(),
                    config.recording_fps,
                    config.recording_quality,
                ) {
                    Ok(recorder) => {
                        log::info!(
                            "recording {} to {} at {} frames per second",
                            frame.size(),
                            path.display(),
                            config.recording_fps
                        );
                        recorder
                    }
                    Err(e) => {
                        log::error!("cannot start recording to {}: {e}", path.display());
                        return;
                    }
                }
            }
        };

        // The composite's crop can wobble a little between cycles, the
        // container wants one fixed size.
        let outcome = match fit_frame(frame, recorder.size()) {
            Some(fitted) => recorder.write_frame(&fitted),
            None => Ok(()),
        };
        match outcome {
            Ok(()) => self.recording = Some(RecordingState::Open(recorder)),
            Err(e) => {
                log::error!("recording failed, closing the file: {e}");
                if let Err(e) = recorder.finalize() {
                    log::error!("failed to finalize the aborted recording: {e}");
                }
            }
        }
    }

    /// The most recent composite, if any cycle has succeeded yet.
    pub fn stitched_frame(&self) -> Option<Image<u8, 3>> {
        self.last_output.clone()
    }

    /// Smoothed output rate over the recent capture cycles.
    pub fn fps(&self) -> f32 {
        self.fps.fps()
    }

    /// Whether [`PipelineCoordinator::start`] has run and
    /// [`PipelineCoordinator::stop`] has not.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The camera rig layout of this run.
    pub fn topology(&self) -> &CameraTopology {
        &self.topology
    }

    /// Value copies of the current pair homographies, in topology order.
    pub fn homographies(&self) -> Vec<Homography> {
        self.trackers
            .iter()
            .map(|tracker| tracker.current_homography())
            .collect()
    }

    /// What each pair worker is doing right now, in topology order.
    pub fn tracker_phases(&self) -> Vec<TrackerPhase> {
        self.trackers.iter().map(|tracker| tracker.phase()).collect()
    }

    /// Mean estimation latency per pair, in topology order. `None` entries
    /// have not completed a cycle yet.
    pub fn pair_latencies(&self) -> Vec<Option<Duration>> {
        self.trackers
            .iter()
            .map(|tracker| tracker.average_latency())
            .collect()
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> StitchConfig {
        lock_unpoisoned(&self.config).clone()
    }

    /// Mutate the live settings. Tuning fields apply from the next
    /// estimation or compositing cycle, structural fields (camera count,
    /// sizes) only take effect on the next start.
    pub fn update_config(&self, update: impl FnOnce(&mut StitchConfig)) {
        update(&mut lock_unpoisoned(&self.config));
    }

    /// Queue a recording of the composited output. The file is created
    /// when the next composite fixes the canvas size.
    ///
    /// # Errors
    ///
    /// A recording is already in progress.
    pub fn start_recording(&mut self, path: impl Into<PathBuf>) -> Result<(), PipelineError> {
        if self.recording.is_some() {
            return Err(PipelineError::RecordingInProgress);
        }
        self.recording = Some(RecordingState::Pending { path: path.into() });
        Ok(())
    }

    /// Finish and close the current recording, if one is open.
    ///
    /// # Errors
    ///
    /// Returns an error when the recorded file cannot be finalized.
    pub fn stop_recording(&mut self) -> Result<(), PipelineError> {
        match self.recording.take() {
            Some(RecordingState::Open(mut recorder)) => {
                log::info!(
                    "finalizing the recording after {} frames",
                    recorder.frames_written()
                );
                recorder.finalize()?;
                Ok(())
            }
            Some(RecordingState::Pending { path }) => {
                log::warn!("recording to {} never received a frame", path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Stop every worker and close an active recording. Idempotent, and
    /// called on drop. The pipeline can be started again afterwards.
    pub fn stop(&mut self) {
        if self.running {
            log::info!("stopping the stitching pipeline");
        }
        self.shutdown_workers();
        if let Err(e) = self.stop_recording() {
            log::error!("failed to finalize the recording while stopping: {e}");
        }
        self.running = false;
    }

    fn shutdown_workers(&mut self) {
        self.driver_cancelled.store(true, Ordering::SeqCst);
        for source in &self.sources {
            source.cancel();
        }
        for tracker in &self.trackers {
            tracker.cancel();
        }
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                log::warn!("the homography driver exited by panic");
            }
        }
        for source in &mut self.sources {
            source.join();
        }
        for tracker in &mut self.trackers {
            tracker.join();
        }
        self.sources.clear();
        self.trackers.clear();
    }
}

impl Drop for PipelineCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn default_backend(camera_id: usize) -> CaptureBackend {
    #[cfg(feature = "v4l")]
    return CaptureBackend::Device { index: camera_id };
    #[cfg(not(feature = "v4l"))]
    {
        let _ = camera_id;
        CaptureBackend::Synthetic
    }
}

/// Keeps estimation rounds running until cancelled. Every round triggers
/// all pair workers and waits for the slowest, a round that misses the
/// deadline is abandoned and retried.
fn homography_driver(cells: Vec<Arc<WorkerCell>>, cancelled: Arc<AtomicBool>) {
    while !cancelled.load(Ordering::SeqCst) {
        for cell in &cells {
            cell.trigger();
        }
        let deadline = Instant::now() + HOMOGRAPHY_TIMEOUT;
        for cell in &cells {
            let cycle = cell.current_cycle();
            if !cell.wait_done(cycle, deadline) {
                if cancelled.load(Ordering::SeqCst) || cell.is_cancelled() {
                    return;
                }
                log::warn!(
                    "an estimation round missed the {HOMOGRAPHY_TIMEOUT:?} deadline, retrying"
                );
                break;
            }
        }
        std::thread::sleep(ESTIMATION_PAUSE);
    }
}

/// Copy `frame` into a canvas of exactly `size`, cropping or black-padding
/// the edges. `None` only when the canvas cannot be allocated.
fn fit_frame(frame: &Image<u8, 3>, size: ImageSize) -> Option<Image<u8, 3>> {
    if frame.size() == size {
        return Some(frame.clone());
    }
    let mut fitted = match Image::from_size_val(size, 0u8) {
        Ok(fitted) => fitted,
        Err(e) => {
            log::error!("cannot allocate a {size} recording frame: {e}");
            return None;
        }
    };
    let cols = frame.cols().min(size.width);
    let rows = frame.rows().min(size.height);
    let src = frame.as_slice();
    let dst = fitted.as_slice_mut();
    for y in 0..rows {
        let src_at = y * frame.cols() * 3;
        let dst_at = y * size.width * 3;
        dst[dst_at..dst_at + cols * 3].copy_from_slice(&src[src_at..src_at + cols * 3]);
    }
    Some(fitted)
}
