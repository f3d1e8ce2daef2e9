#![deny(missing_docs)]
//! Image types for the panostitch stitching pipeline

/// image representation for the stitching pipeline.
pub mod image;

/// Error types for the image module.
pub mod error;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
