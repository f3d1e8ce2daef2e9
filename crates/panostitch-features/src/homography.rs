use panostitch_imgproc::warp::{determinant3x3, inverse3x3, transform_point};

/// A 3x3 projective transform between two camera image planes.
///
/// Stored row-major. For a camera pair (a, b) the matrix maps pixel
/// coordinates of frame `a` into frame `b`. A well-formed homography is
/// always invertible; trackers start from the identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography([f64; 9]);

impl Homography {
    /// The identity transform.
    pub fn identity() -> Self {
        Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Create a homography from its row-major elements.
    pub fn from_array(elements: [f64; 9]) -> Self {
        Self(elements)
    }

    /// The row-major elements of the transform.
    pub fn as_array(&self) -> &[f64; 9] {
        &self.0
    }

    /// The element at the given row and column.
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.0[row * 3 + col]
    }

    /// The translation terms (top-right column) of the transform.
    pub fn translation(&self) -> (f64, f64) {
        (self.0[2], self.0[5])
    }

    /// The determinant of the transform.
    pub fn determinant(&self) -> f64 {
        determinant3x3(&self.0)
    }

    /// Whether the transform can be inverted.
    pub fn is_invertible(&self) -> bool {
        self.determinant().abs() >= 1e-12
    }

    /// The inverse transform, or `None` when the matrix is singular.
    pub fn try_inverse(&self) -> Option<Self> {
        inverse3x3(&self.0).map(Self)
    }

    /// Apply the transform to a 2D point.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        transform_point(x, y, &self.0)
    }

    /// The matrix product `self x rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0; 9];
        for (row, out_row) in out.chunks_exact_mut(3).enumerate() {
            for (col, out_val) in out_row.iter_mut().enumerate() {
                *out_val = a[row * 3] * b[col]
                    + a[row * 3 + 1] * b[3 + col]
                    + a[row * 3 + 2] * b[6 + col];
            }
        }
        Self(out)
    }

    /// Blend a fresh estimate into this transform with exponential smoothing.
    ///
    /// Returns `alpha * estimate + (1 - alpha) * self`, element-wise. Callers
    /// must skip the blend entirely when no estimate is available so the old
    /// value is retained unchanged.
    pub fn blend(&self, estimate: &Self, alpha: f64) -> Self {
        let mut out = [0.0; 9];
        for ((dst, old), new) in out.iter_mut().zip(self.0.iter()).zip(estimate.0.iter()) {
            *dst = alpha * new + (1.0 - alpha) * old;
        }
        Self(out)
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for Homography {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "[[{:.4}, {:.4}, {:.4}], [{:.4}, {:.4}, {:.4}], [{:.4}, {:.4}, {:.4}]]",
            self.0[0],
            self.0[1],
            self.0[2],
            self.0[3],
            self.0[4],
            self.0[5],
            self.0[6],
            self.0[7],
            self.0[8],
        )
    }
}
