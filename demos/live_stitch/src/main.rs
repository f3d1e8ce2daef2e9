use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use panostitch_io::png::write_image_png_rgb8;
use panostitch_pipeline::{CameraSettings, CaptureBackend, PipelineCoordinator, StitchConfig};

#[derive(FromArgs)]
/// Stitch frames from a camera rig into a panoramic video stream.
struct Args {
    /// path of a configuration file to load
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// number of cameras when no configuration file is given
    #[argh(option, short = 'n', default = "2")]
    cameras: usize,

    /// capture width per camera
    #[argh(option, default = "640")]
    width: usize,

    /// capture height per camera
    #[argh(option, default = "480")]
    height: usize,

    /// loop canned PNG frames from this directory instead of live capture,
    /// one numbered subdirectory per camera
    #[argh(option)]
    canned: Option<PathBuf>,

    /// record the stitched output to this AVI file
    #[argh(option, short = 'r')]
    record: Option<PathBuf>,

    /// save the final stitched frame to this PNG file on exit
    #[argh(option, short = 's')]
    snapshot: Option<PathBuf>,

    /// the duration in seconds to run, default until Ctrl-C
    #[argh(option, short = 'd')]
    duration: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => StitchConfig::load(path)?,
        None => StitchConfig {
            camera_count: args.cameras,
            cameras: vec![
                CameraSettings {
                    width: args.width,
                    height: args.height,
                    inverted: false,
                };
                args.cameras
            ],
            ..StitchConfig::default()
        },
    };

    let mut coordinator = match &args.canned {
        Some(dir) => {
            let backends = (0..config.camera_count)
                .map(|camera_id| CaptureBackend::CannedDirectory(dir.join(camera_id.to_string())))
                .collect();
            PipelineCoordinator::with_backends(config, backends)?
        }
        None => PipelineCoordinator::new(config)?,
    };

    // create a cancel token to stop the stitching loop
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            log::info!("received Ctrl-C, stopping");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    // we launch a timer to cancel the token after a certain duration
    if let Some(duration_secs) = args.duration {
        std::thread::spawn({
            let cancel_token = cancel_token.clone();
            move || {
                std::thread::sleep(Duration::from_secs(duration_secs));
                log::info!("the {duration_secs}s timer ran out, stopping");
                cancel_token.store(true, Ordering::SeqCst);
            }
        });
    }

    coordinator.start()?;
    if let Some(path) = &args.record {
        coordinator.start_recording(path.clone())?;
    }

    let mut frames = 0u64;
    while !cancel_token.load(Ordering::SeqCst) {
        if coordinator.capture_and_stitch().is_some() {
            frames += 1;
            if frames % 30 == 0 {
                log::info!(
                    "{frames} stitched frames, {:.1} fps, trackers {:?}",
                    coordinator.fps(),
                    coordinator.tracker_phases()
                );
            }
        }
    }

    coordinator.stop_recording()?;
    if let Some(path) = &args.snapshot {
        match coordinator.stitched_frame() {
            Some(frame) => {
                write_image_png_rgb8(path, &frame)?;
                log::info!("saved the final stitched frame to {}", path.display());
            }
            None => log::warn!("no stitched frame to save"),
        }
    }
    coordinator.stop();

    log::info!("stitched {frames} frames in total");
    Ok(())
}
