//! meter-math - Linear algebra helpers for local coordinate transforms
//!
//! Source injection works with the local linear approximation of a
//! sky-to-pixel mapping: a 2x2 Jacobian in arcseconds per pixel. This crate
//! holds the small amount of matrix math needed to reason about those
//! Jacobians:
//!
//! - **Inversion** with explicit singular-matrix errors
//! - **Pixel area** (absolute determinant)
//! - **Linear scales** from the singular values of the Jacobian
//! - **Construction** helpers for rotation and scaling matrices
//!
//! # Example
//!
//! ```
//! use meter_math::{min_linear_scale, pixel_area, scale_matrix};
//!
//! let jac = scale_matrix(0.2, 0.3);
//! assert!((pixel_area(&jac) - 0.06).abs() < 1e-12);
//! assert!((min_linear_scale(&jac) - 0.2).abs() < 1e-12);
//! ```

pub mod matrix2;

pub use matrix2::{
    invert_matrix, max_linear_scale, min_linear_scale, pixel_area, rotation_matrix,
    scale_matrix, singular_values, SingularMatrixError,
};
