#![deny(missing_docs)]
//! Pipeline orchestration for panostitch
//!
//! Owns the threads of a stitching run: one frame source per camera, one
//! homography tracker per overlapping pair and the coordinator that drives
//! capture cycles in lockstep, folds the current estimates into composites
//! and feeds the optional video recording. Capture waits at most five
//! seconds per cycle, estimation rounds fifteen, and either timeout only
//! costs the cycle, never the run.

/// Frame capture workers and their backends.
pub mod capture;

/// Runtime settings and their text file format.
pub mod config;

/// Cycle orchestration across the worker threads.
pub mod coordinator;

/// Error types for the pipeline module.
pub mod error;

mod sync;

/// Camera rig layouts.
pub mod topology;

/// Pairwise homography workers.
pub mod tracker;

pub use crate::capture::{CaptureBackend, FrameSourceConfig};
pub use crate::config::{CameraSettings, StitchConfig};
pub use crate::coordinator::{PipelineCoordinator, CAPTURE_TIMEOUT, HOMOGRAPHY_TIMEOUT};
pub use crate::error::PipelineError;
pub use crate::topology::{CameraPair, CameraTopology};
pub use crate::tracker::TrackerPhase;
