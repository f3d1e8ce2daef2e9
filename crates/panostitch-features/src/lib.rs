#![deny(missing_docs)]
//! Feature detection, matching and homography estimation for panostitch
//!
//! The crate covers the geometry half of the stitching pipeline: detecting
//! keypoints restricted to the overlap region of a camera pair, matching
//! their binary descriptors, filtering the matches by a distance tolerance
//! band and robustly fitting the 3x3 projective transform between the two
//! views.

/// Keypoint detection and binary descriptor extraction.
pub mod detector;

/// Error types for the features module.
pub mod error;

/// The end-to-end frame pair to homography routine.
pub mod feature_matcher;

/// The 3x3 projective transform type.
pub mod homography;

/// Overlap region-of-interest masks.
pub mod mask;

/// Descriptor matching strategies and match filtering.
pub mod matcher;

/// Robust homography fitting.
pub mod ransac;

pub use crate::detector::{detect_and_describe, DetectorParams, Keypoint};
pub use crate::error::FeatureError;
pub use crate::feature_matcher::{FeatureMatcher, MatchReport, MatcherConfig};
pub use crate::homography::Homography;
pub use crate::mask::{overlap_mask, OverlapDirection};
pub use crate::matcher::{
    filter_matches_by_tolerance, match_features, DescriptorMatch, MatchStats, MatcherStrategy,
};
pub use crate::ransac::{fit_homography, RansacParams};
