use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use panostitch_features::{FeatureMatcher, Homography};
use panostitch_image::Image;
use panostitch_io::telemetry::{TelemetryCategory, TelemetryClient, TelemetryPhase};

use crate::config::StitchConfig;
use crate::error::PipelineError;
use crate::sync::{lock_unpoisoned, WorkerCell};
use crate::topology::CameraPair;

/// Number of recent estimation latencies kept for diagnostics.
const LATENCY_WINDOW: usize = 5;

/// What a tracker worker is doing right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerPhase {
    /// Waiting for the next trigger.
    Idle,
    /// Running a feature match on the latest frame pair.
    Estimating,
    /// The last cycle folded a fresh estimate into the homography.
    Updated,
}

struct TrackerShared {
    current: Mutex<Homography>,
    phase: AtomicU8,
    latencies: Mutex<VecDeque<Duration>>,
}

const PHASE_IDLE: u8 = 0;
const PHASE_ESTIMATING: u8 = 1;
const PHASE_UPDATED: u8 = 2;

/// One homography worker.
///
/// Tracks the projective transform of a single camera pair. Every trigger
/// snapshots the pair's latest frames and the current settings, runs the
/// feature matcher and folds an accepted estimate into the published
/// homography with exponential smoothing. A failed estimation keeps the
/// previous value, so readers always see the best transform so far.
pub(crate) struct HomographyTracker {
    cell: Arc<WorkerCell>,
    shared: Arc<TrackerShared>,
    handle: Option<JoinHandle<()>>,
}

impl HomographyTracker {
    pub fn spawn(
        pair_id: usize,
        pair: CameraPair,
        config: Arc<Mutex<StitchConfig>>,
        frames: Arc<Mutex<Vec<Image<u8, 3>>>>,
        telemetry: TelemetryClient,
    ) -> Result<Self, PipelineError> {
        let cell = Arc::new(WorkerCell::new());
        let shared = Arc::new(TrackerShared {
            current: Mutex::new(Homography::identity()),
            phase: AtomicU8::new(PHASE_IDLE),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        });
        let handle = std::thread::Builder::new()
            .name(format!("homography-{}-{}", pair.a, pair.b))
            .spawn({
                let cell = cell.clone();
                let shared = shared.clone();
                move || tracker_worker(pair_id, pair, config, frames, telemetry, cell, shared)
            })
            .map_err(|e| PipelineError::ThreadSpawnError("homography".into(), e))?;
        Ok(Self {
            cell,
            shared,
            handle: Some(handle),
        })
    }

    pub fn cell(&self) -> &Arc<WorkerCell> {
        &self.cell
    }

    /// Value copy of the pair's current homography.
    pub fn current_homography(&self) -> Homography {
        *lock_unpoisoned(&self.shared.current)
    }

    /// The worker's current phase.
    pub fn phase(&self) -> TrackerPhase {
        match self.shared.phase.load(Ordering::Relaxed) {
            PHASE_ESTIMATING => TrackerPhase::Estimating,
            PHASE_UPDATED => TrackerPhase::Updated,
            _ => TrackerPhase::Idle,
        }
    }

    /// Mean of the recent estimation latencies, `None` before the first
    /// cycle completes.
    pub fn average_latency(&self) -> Option<Duration> {
        let latencies = lock_unpoisoned(&self.shared.latencies);
        if latencies.is_empty() {
            return None;
        }
        let total: Duration = latencies.iter().sum();
        Some(total / latencies.len() as u32)
    }

    /// Ask the worker to exit. Follow up with [`HomographyTracker::join`].
    pub fn cancel(&self) {
        self.cell.cancel();
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("a homography worker exited by panic");
            }
        }
    }
}

fn tracker_worker(
    pair_id: usize,
    pair: CameraPair,
    config: Arc<Mutex<StitchConfig>>,
    frames: Arc<Mutex<Vec<Image<u8, 3>>>>,
    telemetry: TelemetryClient,
    cell: Arc<WorkerCell>,
    shared: Arc<TrackerShared>,
) {
    let mut last_seen = 0;
    while let Some(cycle) = cell.await_trigger(last_seen) {
        last_seen = cycle;
        shared.phase.store(PHASE_ESTIMATING, Ordering::Relaxed);
        let started = Instant::now();

        let updated = run_estimation(pair_id, pair, &config, &frames, &telemetry, &shared);

        let mut latencies = lock_unpoisoned(&shared.latencies);
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(started.elapsed());
        drop(latencies);

        let phase = if updated { PHASE_UPDATED } else { PHASE_IDLE };
        shared.phase.store(phase, Ordering::Relaxed);
        cell.mark_done(cycle);
    }
    log::debug!("homography worker {}-{} stopped", pair.a, pair.b);
}

/// One estimation cycle. Returns whether a fresh estimate was folded in.
fn run_estimation(
    pair_id: usize,
    pair: CameraPair,
    config: &Mutex<StitchConfig>,
    frames: &Mutex<Vec<Image<u8, 3>>>,
    telemetry: &TelemetryClient,
    shared: &TrackerShared,
) -> bool {
    let (frame_a, frame_b) = {
        let store = lock_unpoisoned(frames);
        match (store.get(pair.a), store.get(pair.b)) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => {
                log::warn!("pair {}-{} is missing from the frame store", pair.a, pair.b);
                return false;
            }
        }
    };
    if frame_a.is_empty() || frame_b.is_empty() {
        log::debug!("pair {}-{} skipped, no frames captured yet", pair.a, pair.b);
        return false;
    }

    let snapshot = lock_unpoisoned(config).clone();
    let matcher = FeatureMatcher::new(snapshot.matcher_config());

    let started_wall = SystemTime::now();
    telemetry.send_at(
        TelemetryCategory::Homography,
        pair_id,
        TelemetryPhase::Start,
        started_wall,
    );

    let updated = match matcher.compute_homography(&frame_a, &frame_b, pair.directions()) {
        Ok(report) => {
            telemetry.send_at(
                TelemetryCategory::Homography,
                pair_id,
                TelemetryPhase::Detect,
                started_wall + report.detect_elapsed,
            );
            telemetry.send_at(
                TelemetryCategory::Homography,
                pair_id,
                TelemetryPhase::Match,
                started_wall + report.detect_elapsed + report.match_elapsed,
            );
            match report.homography {
                Some(estimate) => {
                    let mut current = lock_unpoisoned(&shared.current);
                    *current = current.blend(&estimate, snapshot.smoothing_alpha);
                    true
                }
                None => {
                    log::debug!(
                        "pair {}-{} produced no estimate this cycle ({} of {} matches kept)",
                        pair.a,
                        pair.b,
                        report.stats.kept_matches,
                        report.stats.raw_matches
                    );
                    false
                }
            }
        }
        Err(e) => {
            log::warn!("pair {}-{} estimation failed: {e}", pair.a, pair.b);
            false
        }
    };
    telemetry.send(TelemetryCategory::Homography, pair_id, TelemetryPhase::End);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use panostitch_features::OverlapDirection;
    use panostitch_image::ImageSize;

    fn test_pair() -> CameraPair {
        CameraPair {
            a: 0,
            b: 1,
            direction_a: OverlapDirection::Right,
            direction_b: OverlapDirection::Left,
        }
    }

    /// High-contrast block texture sampled at a world offset, the same
    /// construction the feature matcher tests use.
    fn textured_frame(size: ImageSize, shift_x: i64) -> Image<u8, 3> {
        let mut data = vec![0u8; size.width * size.height * 3];
        for y in 0..size.height {
            for x in 0..size.width {
                let world_x = x as i64 + shift_x;
                let bx = world_x.div_euclid(10);
                let by = (y as i64).div_euclid(10);
                let lit = world_x.rem_euclid(10) < 7 && (y as i64).rem_euclid(10) < 7;
                let value = if lit {
                    (bx.wrapping_mul(67).wrapping_add(by.wrapping_mul(41)) as u64 % 200 + 40) as u8
                } else {
                    10
                };
                let at = (y * size.width + x) * 3;
                data[at] = value;
                data[at + 1] = value / 2;
                data[at + 2] = 255 - value;
            }
        }
        Image::new(size, data).unwrap()
    }

    fn preloaded_store(shift: i64) -> Arc<Mutex<Vec<Image<u8, 3>>>> {
        let size = ImageSize {
            width: 160,
            height: 120,
        };
        Arc::new(Mutex::new(vec![
            textured_frame(size, 0),
            textured_frame(size, shift),
        ]))
    }

    fn config_with_alpha(alpha: f64) -> Arc<Mutex<StitchConfig>> {
        Arc::new(Mutex::new(StitchConfig {
            camera_count: 2,
            smoothing_alpha: alpha,
            ..StitchConfig::default()
        }))
    }

    fn run_one_cycle(tracker: &HomographyTracker) {
        tracker.cell().trigger();
        assert!(tracker.cell().wait_done(
            tracker.cell().current_cycle(),
            Instant::now() + Duration::from_secs(20)
        ));
    }

    #[test]
    fn a_known_translation_is_recovered() -> Result<(), PipelineError> {
        let frames = preloaded_store(20);
        let mut tracker = HomographyTracker::spawn(
            0,
            test_pair(),
            config_with_alpha(1.0),
            frames,
            TelemetryClient::default(),
        )?;

        run_one_cycle(&tracker);
        let homography = tracker.current_homography();
        let (tx, ty) = homography.translation();
        assert!((tx + 20.0).abs() < 0.5, "tx = {tx}");
        assert!(ty.abs() < 0.5, "ty = {ty}");
        assert_eq!(tracker.phase(), TrackerPhase::Updated);
        assert!(tracker.average_latency().is_some());

        tracker.cancel();
        tracker.join();
        Ok(())
    }

    #[test]
    fn smoothing_folds_estimates_in_gradually() -> Result<(), PipelineError> {
        let frames = preloaded_store(20);
        let mut tracker = HomographyTracker::spawn(
            0,
            test_pair(),
            config_with_alpha(0.5),
            frames,
            TelemetryClient::default(),
        )?;

        run_one_cycle(&tracker);
        let (tx, _) = tracker.current_homography().translation();
        assert!((tx + 10.0).abs() < 0.5, "tx = {tx}");

        run_one_cycle(&tracker);
        let (tx, _) = tracker.current_homography().translation();
        assert!((tx + 15.0).abs() < 0.5, "tx = {tx}");

        tracker.cancel();
        tracker.join();
        Ok(())
    }

    #[test]
    fn featureless_frames_keep_the_previous_value() -> Result<(), Box<dyn std::error::Error>> {
        let size = ImageSize {
            width: 160,
            height: 120,
        };
        let frames = Arc::new(Mutex::new(vec![
            Image::from_size_val(size, 80u8)?,
            Image::from_size_val(size, 80u8)?,
        ]));
        let mut tracker = HomographyTracker::spawn(
            0,
            test_pair(),
            config_with_alpha(1.0),
            frames,
            TelemetryClient::default(),
        )?;

        run_one_cycle(&tracker);
        assert_eq!(tracker.current_homography(), Homography::identity());
        assert_eq!(tracker.phase(), TrackerPhase::Idle);

        tracker.cancel();
        tracker.join();
        Ok(())
    }

    #[test]
    fn empty_frames_are_skipped() -> Result<(), PipelineError> {
        let frames = Arc::new(Mutex::new(vec![Image::empty(), Image::empty()]));
        let mut tracker = HomographyTracker::spawn(
            0,
            test_pair(),
            config_with_alpha(1.0),
            frames,
            TelemetryClient::default(),
        )?;

        run_one_cycle(&tracker);
        assert_eq!(tracker.current_homography(), Homography::identity());

        tracker.cancel();
        tracker.join();
        Ok(())
    }
}
