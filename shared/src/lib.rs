//! Image toolkit shared by the source injection crates.
//!
//! Provides the pieces of an astronomical exposure that injection works
//! against:
//!
//! - **geom**: pixel points, inclusive integer boxes and sky positions
//! - **mask**: named bitmask planes
//! - **exposure**: pixel data + mask + WCS + PSF
//! - **wcs**: sky/pixel transforms and their local linearization
//! - **psf**: position-dependent PSF kernels and aperture fluxes
//! - **image_proc**: aperture sums, convolution and PNG export

pub mod exposure;
pub mod geom;
pub mod image_proc;
pub mod mask;
pub mod psf;
pub mod wcs;

pub use exposure::{Exposure, ExposureError, ImagePixel, MaskedImage};
pub use geom::{Box2I, Point2D, Point2I, SpherePoint};
pub use mask::{Mask, MaskError, MaskPixel};
pub use psf::{GaussianPsf, ImagePsf, KernelImage, Psf, PsfError};
pub use wcs::{SkyWcs, TanWcs, WcsError};
