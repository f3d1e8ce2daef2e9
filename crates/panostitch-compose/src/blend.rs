/// Floor applied to blending weights so a weighted sum never degenerates.
const WEIGHT_FLOOR: f64 = 1e-3;

/// Policy for merging overlapping camera contributions into one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlendMode {
    /// The lowest-indexed contributing camera wins outright.
    Overlay,
    /// Arithmetic mean of every contribution.
    Average,
    /// Contributions weighted by how close they sit to their own frame
    /// center, fading each camera out towards its edges.
    Linear,
    /// Center weighting with an exponential falloff, steeper for larger
    /// `weight` values.
    Exponential {
        /// Falloff rate, zero behaves like [`BlendMode::Average`].
        weight: f64,
    },
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Overlay
    }
}

/// One camera's sample of a canvas pixel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Contribution {
    /// Sampled color, in channel order of the source frame.
    pub color: [f32; 3],
    /// Distance of the sample from its frame center, normalized so the
    /// center is zero and the corners are one.
    pub center_distance: f64,
}

/// Merge the contributions of one canvas pixel.
///
/// Contributions are ordered by camera index. Returns `None` when no camera
/// reaches the pixel, leaving it background.
pub fn combine(mode: &BlendMode, contributions: &[Contribution]) -> Option<[f32; 3]> {
    let first = contributions.first()?;

    match *mode {
        BlendMode::Overlay => Some(first.color),
        BlendMode::Average => {
            let mut sum = [0.0f32; 3];
            for c in contributions {
                for ch in 0..3 {
                    sum[ch] += c.color[ch];
                }
            }
            let n = contributions.len() as f32;
            Some([sum[0] / n, sum[1] / n, sum[2] / n])
        }
        BlendMode::Linear => Some(weighted(contributions, |d| (1.0 - d).max(WEIGHT_FLOOR))),
        BlendMode::Exponential { weight } => {
            Some(weighted(contributions, |d| {
                (-weight * d).exp().max(WEIGHT_FLOOR)
            }))
        }
    }
}

fn weighted(contributions: &[Contribution], weight_of: impl Fn(f64) -> f64) -> [f32; 3] {
    let mut sum = [0.0f64; 3];
    let mut total = 0.0f64;
    for c in contributions {
        let w = weight_of(c.center_distance);
        total += w;
        for ch in 0..3 {
            sum[ch] += w * c.color[ch] as f64;
        }
    }
    [
        (sum[0] / total) as f32,
        (sum[1] / total) as f32,
        (sum[2] / total) as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(color: [f32; 3], center_distance: f64) -> Contribution {
        Contribution {
            color,
            center_distance,
        }
    }

    #[test]
    fn no_contribution_stays_background() {
        assert!(combine(&BlendMode::Average, &[]).is_none());
    }

    #[test]
    fn overlay_takes_the_first_camera() {
        let merged = combine(
            &BlendMode::Overlay,
            &[at([10.0, 20.0, 30.0], 0.9), at([200.0, 0.0, 0.0], 0.1)],
        )
        .unwrap();

        assert_eq!(merged, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn average_is_the_arithmetic_mean() {
        let merged = combine(
            &BlendMode::Average,
            &[at([100.0, 0.0, 40.0], 0.0), at([200.0, 60.0, 60.0], 1.0)],
        )
        .unwrap();

        assert_eq!(merged, [150.0, 30.0, 50.0]);
    }

    #[test]
    fn linear_favors_the_centered_camera() {
        let merged = combine(
            &BlendMode::Linear,
            &[at([0.0, 0.0, 0.0], 0.0), at([100.0, 100.0, 100.0], 0.9)],
        )
        .unwrap();

        assert!(merged[0] < 50.0);
    }

    #[test]
    fn exponential_with_zero_weight_matches_average() {
        let contributions = [at([80.0, 10.0, 0.0], 0.2), at([160.0, 30.0, 0.0], 0.8)];

        let exp = combine(&BlendMode::Exponential { weight: 0.0 }, &contributions).unwrap();
        let avg = combine(&BlendMode::Average, &contributions).unwrap();

        for ch in 0..3 {
            assert!((exp[ch] - avg[ch]).abs() < 1e-4);
        }
    }
}
