//! Pixel-level image processing used around source injection.
//!
//! - **aperture_photometry**: circular aperture sums for PSF normalization
//!   and for measuring injected sources
//! - **convolve2d**: direct-space 2D convolution
//! - **io**: 8-bit display stretches and PNG export

pub mod aperture_photometry;
pub mod convolve2d;
pub mod io;

pub use aperture_photometry::{aperture_sum, collect_aperture_pixels};
pub use convolve2d::convolve2d;
pub use io::{linear_stretch_to_u8, save_u8_image};
