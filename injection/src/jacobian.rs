//! Local linear WCS used while rendering a single object.

use nalgebra::{Matrix2, Vector2};

use meter_math::{
    invert_matrix, max_linear_scale, min_linear_scale, pixel_area, SingularMatrixError,
};

/// Linear pixel-to-sky mapping in arcseconds per pixel.
///
/// `(u, v) = J · (dx, dy)` where `(dx, dy)` is a pixel offset and `(u, v)`
/// are sky offsets on the local tangent plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JacobianWcs {
    matrix: Matrix2<f64>,
}

impl JacobianWcs {
    pub fn new(dudx: f64, dudy: f64, dvdx: f64, dvdy: f64) -> Self {
        Self {
            matrix: Matrix2::new(dudx, dudy, dvdx, dvdy),
        }
    }

    pub fn from_matrix(matrix: Matrix2<f64>) -> Self {
        Self { matrix }
    }

    /// Square pixels of side `scale` arcseconds, axes aligned.
    pub fn from_pixel_scale(scale: f64) -> Self {
        Self::new(scale, 0.0, 0.0, scale)
    }

    pub fn matrix(&self) -> &Matrix2<f64> {
        &self.matrix
    }

    /// Sky area of one pixel in arcsec².
    pub fn pixel_area(&self) -> f64 {
        pixel_area(&self.matrix)
    }

    pub fn min_linear_scale(&self) -> f64 {
        min_linear_scale(&self.matrix)
    }

    pub fn max_linear_scale(&self) -> f64 {
        max_linear_scale(&self.matrix)
    }

    pub fn to_sky(&self, dx: f64, dy: f64) -> (f64, f64) {
        let uv = self.matrix * Vector2::new(dx, dy);
        (uv.x, uv.y)
    }

    pub fn to_pixel(&self, u: f64, v: f64) -> Result<(f64, f64), SingularMatrixError> {
        let d = invert_matrix(&self.matrix)? * Vector2::new(u, v);
        Ok((d.x, d.y))
    }
}
