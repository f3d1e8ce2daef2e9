#![deny(missing_docs)]
//! Panorama compositing for panostitch
//!
//! Projects the frames of a stitching cycle onto one shared canvas using the
//! current pairwise homographies, merges overlapping regions under a
//! configurable blending policy and crops the result to its content bounds.

/// Blending policies for overlapping camera contributions.
pub mod blend;

/// The canvas compositor.
pub mod compositor;

pub use crate::blend::{combine, BlendMode, Contribution};
pub use crate::compositor::Compositor;
