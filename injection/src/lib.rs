//! Synthetic source injection.
//!
//! Draws PSF-convolved point and extended sources into an [`Exposure`] at
//! given sky positions, flagging every touched pixel in a dedicated mask
//! plane so downstream measurement can tell injected light from real light.
//!
//! - **profile**: surface-brightness models (point, Gaussian, exponential, sheared, sums)
//! - **jacobian**: local linear pixel-to-sky mapping
//! - **render**: PSF convolution, stamp sizing and drawing
//! - **inject**: the per-object injection loop
//! - **catalog**: magnitude catalogs turned into profiles
//! - **config**: run settings and synthetic exposures
//! - **summary**: post-injection flux report
//!
//! ```
//! use source_injection::config::SyntheticExposureConfig;
//! use source_injection::inject::{inject_sources, DEFAULT_CALIB_FLUX_RADIUS};
//! use source_injection::profile::Gaussian;
//! use shared::geom::Point2D;
//!
//! let mut exposure = SyntheticExposureConfig::default().build().unwrap();
//! let position = exposure.wcs().pixel_to_sky(&Point2D::new(200.0, 300.0)).unwrap();
//! let galaxy = Gaussian::from_fwhm(1000.0, 1.0).unwrap();
//!
//! inject_sources(&mut exposure, [(position, galaxy)], DEFAULT_CALIB_FLUX_RADIUS).unwrap();
//! assert!(exposure.image_sum() > 990.0);
//! ```
//!
//! [`Exposure`]: shared::exposure::Exposure

pub mod catalog;
pub mod config;
pub mod inject;
pub mod jacobian;
pub mod profile;
pub mod render;
pub mod summary;

pub use catalog::{mag_to_flux, CatalogEntry, CatalogError, InjectionCatalog, SourceType};
pub use config::{ConfigError, InjectionConfig, SyntheticExposureConfig};
pub use inject::{
    inject_source, inject_sources, inject_sources_with_config, InjectionContext, InjectionError,
    InjectionOutcome, SkipReason, DEFAULT_CALIB_FLUX_RADIUS, FAKE_MASK_PLANE,
};
pub use jacobian::JacobianWcs;
pub use profile::{DeltaFunction, Exponential, Gaussian, Profile, ProfileError, Sheared, Sum};
pub use render::{
    convolve, draw_image, good_image_size, Convolution, DrawError, DrawMethod, DrawOptions,
    KernelProfile,
};
pub use summary::InjectionSummary;
