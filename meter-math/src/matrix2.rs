//! Local linear maps between pixel and sky offsets.
//!
//! Jacobians here map pixel offsets to sky offsets. Column `j` holds the
//! derivative of the sky coordinates with respect to pixel axis `j`.

use nalgebra::Matrix2;
use thiserror::Error;

/// A Jacobian that collapses the plane and cannot be inverted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular matrix: determinant={determinant:.6e}")]
pub struct SingularMatrixError {
    pub determinant: f64,
}

const DETERMINANT_EPSILON: f64 = 1e-14;

/// Inverse of `matrix`, refusing degenerate or non-finite input.
pub fn invert_matrix(matrix: &Matrix2<f64>) -> Result<Matrix2<f64>, SingularMatrixError> {
    let determinant = matrix.determinant();
    let singular = SingularMatrixError { determinant };
    if !determinant.is_finite() || determinant.abs() < DETERMINANT_EPSILON {
        return Err(singular);
    }
    matrix.try_inverse().ok_or(singular)
}

/// Area of the parallelogram spanned by the matrix columns.
///
/// For a pixel-to-sky Jacobian this is the solid angle covered by one pixel
/// (arcsec² when the Jacobian is in arcsec/pixel).
pub fn pixel_area(matrix: &Matrix2<f64>) -> f64 {
    matrix.determinant().abs()
}

/// Singular values of a 2x2 matrix as `(min, max)`.
///
/// Uses the closed form for the 2x2 case:
///
/// ```text
/// s² = (S ± sqrt(S² - 4 det²)) / 2,   S = a² + b² + c² + d²
/// ```
pub fn singular_values(matrix: &Matrix2<f64>) -> (f64, f64) {
    let frob = matrix.iter().map(|v| v * v).sum::<f64>();
    let det = matrix.determinant();

    // Rounding can push the discriminant slightly negative for isotropic matrices
    let disc = (frob * frob - 4.0 * det * det).max(0.0).sqrt();
    let s_max = ((frob + disc) / 2.0).sqrt();
    let s_min = ((frob - disc) / 2.0).max(0.0).sqrt();

    (s_min, s_max)
}

/// Smallest linear scale of the mapping (minimum singular value).
pub fn min_linear_scale(matrix: &Matrix2<f64>) -> f64 {
    singular_values(matrix).0
}

/// Largest linear scale of the mapping (maximum singular value).
pub fn max_linear_scale(matrix: &Matrix2<f64>) -> f64 {
    singular_values(matrix).1
}

/// Counter-clockwise rotation by `angle_rad`.
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let (sin, cos) = angle_rad.sin_cos();
    Matrix2::new(cos, -sin, sin, cos)
}

/// Independent scaling of the two axes; a negative factor flips that axis.
pub fn scale_matrix(sx: f64, sy: f64) -> Matrix2<f64> {
    Matrix2::new(sx, 0.0, 0.0, sy)
}
