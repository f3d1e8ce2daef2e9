use panostitch_features::OverlapDirection;

use crate::error::PipelineError;

/// A camera pair whose overlap is tracked by its own homography.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraPair {
    /// Index of the reference camera of the pair.
    pub a: usize,
    /// Index of the dependent camera of the pair.
    pub b: usize,
    /// Edge of camera `a` shared with camera `b`.
    pub direction_a: OverlapDirection,
    /// Edge of camera `b` shared with camera `a`.
    pub direction_b: OverlapDirection,
}

impl CameraPair {
    fn new(a: usize, b: usize, direction_a: OverlapDirection, direction_b: OverlapDirection) -> Self {
        Self {
            a,
            b,
            direction_a,
            direction_b,
        }
    }

    /// The overlap directions in the order the matcher expects them.
    pub fn directions(&self) -> (OverlapDirection, OverlapDirection) {
        (self.direction_a, self.direction_b)
    }
}

/// The pairwise layout of a camera rig.
///
/// Cameras are numbered left to right, then top to bottom: two cameras sit
/// side by side, four form a two by two grid. The pair list is in the order
/// the compositor consumes the homographies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraTopology {
    camera_count: usize,
    pairs: Vec<CameraPair>,
}

impl CameraTopology {
    /// Build the layout for a camera count.
    ///
    /// # Errors
    ///
    /// Counts other than 1, 2 and 4 have no layout and are rejected.
    pub fn for_camera_count(count: usize) -> Result<Self, PipelineError> {
        use panostitch_features::OverlapDirection::{Down, Left, Right, Up};
        let pairs = match count {
            1 => Vec::new(),
            2 => vec![CameraPair::new(0, 1, Right, Left)],
            4 => vec![
                CameraPair::new(0, 1, Right, Left),
                CameraPair::new(0, 2, Down, Up),
                CameraPair::new(1, 3, Down, Up),
                CameraPair::new(2, 3, Right, Left),
            ],
            other => return Err(PipelineError::UnsupportedCameraCount(other)),
        };
        Ok(Self {
            camera_count: count,
            pairs,
        })
    }

    /// Number of cameras in the rig.
    pub fn camera_count(&self) -> usize {
        self.camera_count
    }

    /// The tracked pairs in compositor order.
    pub fn pairs(&self) -> &[CameraPair] {
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panostitch_features::OverlapDirection::{Down, Left, Right, Up};

    #[test]
    fn a_single_camera_tracks_no_pairs() -> Result<(), PipelineError> {
        let topology = CameraTopology::for_camera_count(1)?;
        assert!(topology.pairs().is_empty());
        Ok(())
    }

    #[test]
    fn two_cameras_share_one_horizontal_edge() -> Result<(), PipelineError> {
        let topology = CameraTopology::for_camera_count(2)?;
        assert_eq!(topology.pairs(), &[CameraPair::new(0, 1, Right, Left)]);
        Ok(())
    }

    #[test]
    fn four_cameras_form_a_grid() -> Result<(), PipelineError> {
        let topology = CameraTopology::for_camera_count(4)?;
        assert_eq!(
            topology.pairs(),
            &[
                CameraPair::new(0, 1, Right, Left),
                CameraPair::new(0, 2, Down, Up),
                CameraPair::new(1, 3, Down, Up),
                CameraPair::new(2, 3, Right, Left),
            ]
        );
        Ok(())
    }

    #[test]
    fn unsupported_counts_are_rejected() {
        for count in [0, 3, 5, 6] {
            assert!(matches!(
                CameraTopology::for_camera_count(count),
                Err(PipelineError::UnsupportedCameraCount(c)) if c == count
            ));
        }
    }
}
