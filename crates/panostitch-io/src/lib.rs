#![deny(missing_docs)]
//! I/O boundary of the panostitch pipeline
//!
//! Covers everything that crosses the process edge: loading canned frames
//! and saving stills, recording composited output as motion JPEG video,
//! shipping latency telemetry over UDP and, behind the `v4l` feature,
//! pulling live frames from Video4Linux capture devices.

/// Error types for the io module.
pub mod error;

/// Exponentially smoothed frames-per-second measurement.
pub mod fps_counter;

/// JPEG still encoding.
pub mod jpeg;

/// PNG reading and writing.
pub mod png;

/// Motion JPEG video recording.
pub mod recorder;

/// Fire-and-forget latency telemetry datagrams.
pub mod telemetry;

/// Video4Linux live camera capture.
#[cfg(feature = "v4l")]
pub mod v4l_capture;

pub use crate::error::IoError;
