use std::path::Path;
use std::str::FromStr;

use panostitch_compose::{BlendMode, Compositor};
use panostitch_features::{DetectorParams, MatcherConfig, MatcherStrategy, RansacParams};
use panostitch_image::ImageSize;
use panostitch_io::telemetry::TELEMETRY_PORT;

use crate::error::PipelineError;

/// Upper bound on the camera count a configuration file may ask for.
const MAX_CAMERAS: usize = 16;

/// Capture settings of one camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    /// Capture width in pixels.
    pub width: usize,
    /// Capture height in pixels.
    pub height: usize,
    /// The camera is mounted upside down, rotate its frames by 180 degrees.
    pub inverted: bool,
}

impl CameraSettings {
    /// The settings as an image size.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            inverted: false,
        }
    }
}

/// Every tunable of a stitching run.
///
/// The on-disk form is a plain text file of `Key: value` lines, one
/// setting per line, with `#` starting a comment:
///
/// ```text
/// CameraCount: 2
/// Camera1Inverted: true
/// BlendMode: 2
/// OverlapFraction: 0.8
/// ```
///
/// Parsing is tolerant: unknown keys, malformed values and out-of-range
/// values are logged and skipped so an old or hand-edited file never takes
/// the pipeline down. Missing keys keep their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct StitchConfig {
    /// Number of cameras in the rig.
    pub camera_count: usize,
    /// Per-camera capture settings, indexed by camera id.
    pub cameras: Vec<CameraSettings>,
    /// Capture rate requested from live cameras.
    pub capture_fps: u32,
    /// Blend policy code, resolved by [`StitchConfig::blend_mode`].
    pub blend_code: u8,
    /// Falloff rate of the exponential blend.
    pub exp_blend_weight: f64,
    /// Sample source frames with bilinear interpolation while compositing.
    pub interpolate: bool,
    /// Contrast threshold of the corner detector.
    pub detector_threshold: u8,
    /// Number of detector pyramid levels.
    pub detector_octaves: usize,
    /// Skip keypoint orientation and sample descriptors axis-aligned.
    pub upright_features: bool,
    /// Upper bound on keypoints kept per frame.
    pub max_keypoints: usize,
    /// Matcher algorithm code, resolved by [`StitchConfig::matcher_strategy`].
    pub matcher_code: u8,
    /// Number of trees of the approximate matcher.
    pub matcher_trees: usize,
    /// Precision demanded of the automatic matcher choice.
    pub target_precision: f32,
    /// Half-width of the match distance filter relative to the spread.
    pub match_tolerance: f32,
    /// Fraction of each frame searched for features, from the shared edge.
    pub overlap_fraction: f32,
    /// RANSAC inlier threshold in pixels.
    pub ransac_threshold: f64,
    /// Exponential smoothing factor for accepted homographies, in `[0, 1]`.
    /// One replaces the old estimate outright, zero freezes it.
    pub smoothing_alpha: f64,
    /// Render a side-by-side match visualization during estimation.
    pub show_matches: bool,
    /// Playback rate recorded video advertises.
    pub recording_fps: u32,
    /// JPEG quality of recorded video, 0 to 100.
    pub recording_quality: u8,
    /// UDP port latency telemetry is sent to.
    pub telemetry_port: u16,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            camera_count: 4,
            cameras: vec![CameraSettings::default(); 4],
            capture_fps: 30,
            blend_code: 0,
            exp_blend_weight: 1.0,
            interpolate: true,
            detector_threshold: 20,
            detector_octaves: 4,
            upright_features: false,
            max_keypoints: 500,
            matcher_code: 2,
            matcher_trees: 4,
            target_precision: 0.9,
            match_tolerance: 0.5,
            overlap_fraction: 0.8,
            ransac_threshold: 3.0,
            smoothing_alpha: 0.2,
            show_matches: false,
            recording_fps: 20,
            recording_quality: 85,
            telemetry_port: TELEMETRY_PORT,
        }
    }
}

impl StitchConfig {
    /// Load a configuration file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Only failure to read the file itself is an error. Bad lines inside
    /// it are skipped with a log message.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::ConfigFileError(path.to_path_buf(), e))?;
        let mut config = Self::default();
        config.apply_text(&text);
        Ok(config)
    }

    /// Write the configuration as `Key: value` lines.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_text())
            .map_err(|e| PipelineError::ConfigFileError(path.to_path_buf(), e))
    }

    /// Apply `Key: value` lines on top of the current values.
    pub fn apply_text(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => self.apply_entry(key.trim(), value.trim()),
                None => log::warn!("ignoring configuration line without a separator: {line}"),
            }
        }
        // Per-camera entries beyond the final camera count are dropped,
        // missing ones filled with defaults.
        self.cameras
            .resize(self.camera_count, CameraSettings::default());
    }

    /// Serialize every setting as `Key: value` lines in a stable order,
    /// under a comment header.
    pub fn to_text(&self) -> String {
        let mut lines = vec![
            "# panostitch configuration".to_string(),
            format!("CameraCount: {}", self.camera_count),
        ];
        for (index, camera) in self.cameras.iter().enumerate() {
            lines.push(format!("Camera{index}Width: {}", camera.width));
            lines.push(format!("Camera{index}Height: {}", camera.height));
            lines.push(format!("Camera{index}Inverted: {}", camera.inverted));
        }
        lines.extend([
            format!("CaptureFps: {}", self.capture_fps),
            format!("BlendMode: {}", self.blend_code),
            format!("ExpBlendWeight: {}", self.exp_blend_weight),
            format!("Interpolate: {}", self.interpolate),
            format!("DetectorThreshold: {}", self.detector_threshold),
            format!("DetectorOctaves: {}", self.detector_octaves),
            format!("UprightFeatures: {}", self.upright_features),
            format!("MaxKeypoints: {}", self.max_keypoints),
            format!("MatcherAlgorithm: {}", self.matcher_code),
            format!("MatcherTrees: {}", self.matcher_trees),
            format!("TargetPrecision: {}", self.target_precision),
            format!("MatchTolerance: {}", self.match_tolerance),
            format!("OverlapFraction: {}", self.overlap_fraction),
            format!("RansacThreshold: {}", self.ransac_threshold),
            format!("SmoothingAlpha: {}", self.smoothing_alpha),
            format!("ShowMatches: {}", self.show_matches),
            format!("RecordingFps: {}", self.recording_fps),
            format!("RecordingQuality: {}", self.recording_quality),
            format!("TelemetryPort: {}", self.telemetry_port),
        ]);
        lines.join("\n") + "\n"
    }

    fn apply_entry(&mut self, key: &str, value: &str) {
        if let Some(rest) = key.strip_prefix("Camera") {
            if let Some((index, field)) = split_camera_key(rest) {
                self.apply_camera_entry(index, field, value);
                return;
            }
        }
        match key {
            "CameraCount" => {
                if let Some(count) =
                    parse_or_skip::<usize>(key, value).filter(|c| (1..=MAX_CAMERAS).contains(c))
                {
                    self.camera_count = count;
                } else {
                    log::warn!("ignoring out-of-range {key}: {value}");
                }
            }
            "CaptureFps" => {
                if let Some(fps) = parse_or_skip::<u32>(key, value).filter(|f| *f > 0) {
                    self.capture_fps = fps;
                }
            }
            "BlendMode" => {
                if let Some(code) = parse_or_skip(key, value) {
                    self.blend_code = code;
                }
            }
            "ExpBlendWeight" => {
                if let Some(weight) = parse_or_skip::<f64>(key, value).filter(|w| *w >= 0.0) {
                    self.exp_blend_weight = weight;
                }
            }
            "Interpolate" => {
                if let Some(flag) = parse_bool(key, value) {
                    self.interpolate = flag;
                }
            }
            "DetectorThreshold" => {
                if let Some(threshold) = parse_or_skip(key, value) {
                    self.detector_threshold = threshold;
                }
            }
            "DetectorOctaves" => {
                if let Some(octaves) = parse_or_skip::<usize>(key, value).filter(|o| *o > 0) {
                    self.detector_octaves = octaves;
                }
            }
            "UprightFeatures" => {
                if let Some(flag) = parse_bool(key, value) {
                    self.upright_features = flag;
                }
            }
            "MaxKeypoints" => {
                if let Some(count) = parse_or_skip::<usize>(key, value).filter(|c| *c > 0) {
                    self.max_keypoints = count;
                }
            }
            "MatcherAlgorithm" => {
                if let Some(code) = parse_or_skip(key, value) {
                    self.matcher_code = code;
                }
            }
            "MatcherTrees" => {
                if let Some(trees) = parse_or_skip::<usize>(key, value).filter(|t| *t > 0) {
                    self.matcher_trees = trees;
                }
            }
            "TargetPrecision" => {
                if let Some(precision) =
                    parse_or_skip::<f32>(key, value).filter(|p| (0.0..=1.0).contains(p))
                {
                    self.target_precision = precision;
                }
            }
            "MatchTolerance" => {
                if let Some(tolerance) = parse_or_skip::<f32>(key, value).filter(|t| *t >= 0.0) {
                    self.match_tolerance = tolerance;
                }
            }
            "OverlapFraction" => {
                if let Some(fraction) =
                    parse_or_skip::<f32>(key, value).filter(|f| (0.0..=1.0).contains(f) && *f > 0.0)
                {
                    self.overlap_fraction = fraction;
                } else {
                    log::warn!("ignoring out-of-range {key}: {value}");
                }
            }
            "RansacThreshold" => {
                if let Some(threshold) = parse_or_skip::<f64>(key, value).filter(|t| *t > 0.0) {
                    self.ransac_threshold = threshold;
                }
            }
            "SmoothingAlpha" => {
                if let Some(alpha) =
                    parse_or_skip::<f64>(key, value).filter(|a| (0.0..=1.0).contains(a))
                {
                    self.smoothing_alpha = alpha;
                } else {
                    log::warn!("ignoring out-of-range {key}: {value}");
                }
            }
            "ShowMatches" => {
                if let Some(flag) = parse_bool(key, value) {
                    self.show_matches = flag;
                }
            }
            "RecordingFps" => {
                if let Some(fps) = parse_or_skip::<u32>(key, value).filter(|f| *f > 0) {
                    self.recording_fps = fps;
                }
            }
            "RecordingQuality" => {
                if let Some(quality) = parse_or_skip::<u8>(key, value).filter(|q| *q <= 100) {
                    self.recording_quality = quality;
                }
            }
            "TelemetryPort" => {
                if let Some(port) = parse_or_skip(key, value) {
                    self.telemetry_port = port;
                }
            }
            unknown => log::debug!("ignoring unknown configuration key {unknown}"),
        }
    }

    fn apply_camera_entry(&mut self, index: usize, field: &str, value: &str) {
        if index >= MAX_CAMERAS {
            log::warn!("ignoring settings for out-of-range camera {index}");
            return;
        }
        if index >= self.cameras.len() {
            self.cameras.resize(index + 1, CameraSettings::default());
        }
        let camera = &mut self.cameras[index];
        match field {
            "Width" => {
                if let Some(width) = parse_or_skip::<usize>(field, value).filter(|w| *w > 0) {
                    camera.width = width;
                }
            }
            "Height" => {
                if let Some(height) = parse_or_skip::<usize>(field, value).filter(|h| *h > 0) {
                    camera.height = height;
                }
            }
            "Inverted" => {
                if let Some(flag) = parse_bool(field, value) {
                    camera.inverted = flag;
                }
            }
            unknown => log::debug!("ignoring unknown camera setting {unknown}"),
        }
    }

    /// The blend policy the codes select: 0 overlay, 1 average, 2 linear,
    /// 3 exponential. Unknown codes fall back to overlay.
    pub fn blend_mode(&self) -> BlendMode {
        match self.blend_code {
            1 => BlendMode::Average,
            2 => BlendMode::Linear,
            3 => BlendMode::Exponential {
                weight: self.exp_blend_weight,
            },
            _ => BlendMode::Overlay,
        }
    }

    /// The matcher strategy the codes select: 0 exhaustive, 1 kd-tree
    /// forest, anything else automatic.
    pub fn matcher_strategy(&self) -> MatcherStrategy {
        match self.matcher_code {
            0 => MatcherStrategy::Exhaustive,
            1 => MatcherStrategy::KdTrees {
                trees: self.matcher_trees,
            },
            _ => MatcherStrategy::Auto {
                target_precision: self.target_precision,
            },
        }
    }

    /// The matcher configuration one camera pair runs under these settings.
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            detector: DetectorParams {
                threshold: self.detector_threshold,
                octaves: self.detector_octaves,
                upright: self.upright_features,
                max_keypoints: self.max_keypoints,
            },
            strategy: self.matcher_strategy(),
            tolerance: self.match_tolerance,
            overlap_fraction: self.overlap_fraction,
            ransac: RansacParams {
                reproj_threshold: self.ransac_threshold,
                ..RansacParams::default()
            },
            show_matches: self.show_matches,
        }
    }

    /// The compositor these settings select.
    pub fn compositor(&self) -> Compositor {
        Compositor::new(self.blend_mode(), self.interpolate)
    }
}

/// Split the tail of a `Camera{i}{Field}` key into index and field name.
fn split_camera_key(rest: &str) -> Option<(usize, &str)> {
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let index = rest[..digits_end].parse().ok()?;
    Some((index, &rest[digits_end..]))
}

fn parse_or_skip<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring malformed value for {key}: {value}");
            None
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => {
            log::warn!("ignoring malformed value for {key}: {value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_four_camera_rig() {
        let config = StitchConfig::default();
        assert_eq!(config.camera_count, 4);
        assert_eq!(config.cameras.len(), 4);
        assert_eq!(config.cameras[0].size().width, 800);
        assert_eq!(config.overlap_fraction, 0.8);
        assert_eq!(config.smoothing_alpha, 0.2);
        assert!(matches!(config.blend_mode(), BlendMode::Overlay));
        assert!(matches!(
            config.matcher_strategy(),
            MatcherStrategy::Auto { .. }
        ));
    }

    #[test]
    fn round_trip_preserves_every_field() -> Result<(), Box<dyn std::error::Error>> {
        let config = StitchConfig {
            camera_count: 2,
            cameras: vec![
                CameraSettings {
                    width: 640,
                    height: 480,
                    inverted: false,
                },
                CameraSettings {
                    width: 320,
                    height: 240,
                    inverted: true,
                },
            ],
            capture_fps: 15,
            blend_code: 3,
            exp_blend_weight: 2.5,
            interpolate: false,
            detector_threshold: 35,
            detector_octaves: 2,
            upright_features: true,
            max_keypoints: 250,
            matcher_code: 1,
            matcher_trees: 8,
            target_precision: 0.75,
            match_tolerance: 0.25,
            overlap_fraction: 0.6,
            ransac_threshold: 1.5,
            smoothing_alpha: 0.4,
            show_matches: true,
            recording_fps: 25,
            recording_quality: 70,
            telemetry_port: 9100,
        };

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stitch.cfg");
        config.save(&path)?;
        let loaded = StitchConfig::load(&path)?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn bad_lines_are_skipped_and_defaults_kept() {
        let mut config = StitchConfig::default();
        config.apply_text(
            "Nonsense: 12\n\
             DetectorThreshold: banana\n\
             OverlapFraction: 7.0\n\
             SmoothingAlpha: -1\n\
             just some words\n",
        );
        assert_eq!(config, StitchConfig::default());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let mut config = StitchConfig::default();
        config.apply_text("# a comment\n\n  # another\nMatchTolerance: 0.9\n");
        assert_eq!(config.match_tolerance, 0.9);
    }

    #[test]
    fn camera_count_trims_and_grows_the_settings_list() {
        let mut config = StitchConfig::default();
        config.apply_text("Camera1Inverted: true\nCameraCount: 2\n");
        assert_eq!(config.cameras.len(), 2);
        assert!(config.cameras[1].inverted);

        let mut config = StitchConfig::default();
        config.apply_text("CameraCount: 1\nCamera3Width: 100\n");
        assert_eq!(config.cameras.len(), 1);
    }

    #[test]
    fn blend_and_matcher_codes_resolve() {
        let mut config = StitchConfig::default();
        config.apply_text("BlendMode: 3\nExpBlendWeight: 2\nMatcherAlgorithm: 1\nMatcherTrees: 6\n");
        assert!(matches!(
            config.blend_mode(),
            BlendMode::Exponential { weight } if weight == 2.0
        ));
        assert!(matches!(
            config.matcher_strategy(),
            MatcherStrategy::KdTrees { trees: 6 }
        ));
    }

    #[test]
    fn matcher_config_carries_the_tunables_over() {
        let mut config = StitchConfig::default();
        config.apply_text("DetectorThreshold: 40\nRansacThreshold: 2.5\nShowMatches: 1\n");
        let matcher = config.matcher_config();
        assert_eq!(matcher.detector.threshold, 40);
        assert_eq!(matcher.ransac.reproj_threshold, 2.5);
        assert!(matcher.show_matches);
    }
}
