/// Compute the determinant of a 3x3 matrix stored in row-major order.
pub fn determinant3x3(m: &[f64; 9]) -> f64 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6])
}

/// Compute the adjugate of a 3x3 matrix stored in row-major order.
pub fn adjugate3x3(m: &[f64; 9]) -> [f64; 9] {
    [
        m[4] * m[8] - m[5] * m[7],
        m[2] * m[7] - m[1] * m[8],
        m[1] * m[5] - m[2] * m[4],
        m[5] * m[6] - m[3] * m[8],
        m[0] * m[8] - m[2] * m[6],
        m[2] * m[3] - m[0] * m[5],
        m[3] * m[7] - m[4] * m[6],
        m[1] * m[6] - m[0] * m[7],
        m[0] * m[4] - m[1] * m[3],
    ]
}

/// Invert a 3x3 matrix stored in row-major order.
///
/// # Returns
///
/// The inverse matrix, or `None` when the matrix is singular.
pub fn inverse3x3(m: &[f64; 9]) -> Option<[f64; 9]> {
    let det = determinant3x3(m);
    if det.abs() < 1e-12 {
        return None;
    }

    let adj = adjugate3x3(m);
    let mut inv = [0.0; 9];
    for (dst, src) in inv.iter_mut().zip(adj.iter()) {
        *dst = src / det;
    }

    Some(inv)
}

/// Apply a 3x3 projective transform to a 2D point.
///
/// The homogeneous coordinate is divided out; a vanishing denominator maps
/// the point to infinity, which downstream bounds checks reject.
pub fn transform_point(x: f64, y: f64, m: &[f64; 9]) -> (f64, f64) {
    let w = m[6] * x + m[7] * y + m[8];
    let u = (m[0] * x + m[1] * y + m[2]) / w;
    let v = (m[3] * x + m[4] * y + m[5]) / w;
    (u, v)
}
