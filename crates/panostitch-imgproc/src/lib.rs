#![deny(missing_docs)]
//! Pixel-level operations for the panostitch stitching pipeline

/// Color space conversions.
pub mod color;

/// Image cropping operations.
pub mod crop;

/// Pixel sampling with sub-pixel interpolation.
pub mod interpolation;

/// Parallel row iterators over image buffers.
pub mod parallel;

/// Image resizing operations.
pub mod resize;

/// Image rotation operations.
pub mod rotate;

/// 3x3 projective transform helpers.
pub mod warp;
