//! Shared fixtures for the injection integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use nalgebra::Matrix2;
use ndarray::Array2;
use shared::exposure::Exposure;
use shared::geom::{Point2D, SpherePoint};
use shared::mask::MaskPixel;
use shared::wcs::{SkyWcs, TanWcs, WcsError};
use source_injection::config::SyntheticExposureConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 200x160 exposure at 0.2"/pixel with its lower-left pixel at (1000, 2000).
pub fn exposure_config() -> SyntheticExposureConfig {
    SyntheticExposureConfig {
        width: 200,
        height: 160,
        x0: 1000,
        y0: 2000,
        ra_deg: 53.1,
        dec_deg: -27.8,
        pixel_scale_arcsec: 0.2,
        psf_fwhm_pixels: 3.0,
        ..SyntheticExposureConfig::default()
    }
}

pub fn test_exposure() -> Exposure {
    exposure_config().build().unwrap()
}

/// Sky position of pixel `(x, y)` in the exposure's pixel frame.
pub fn sky_at(exposure: &Exposure, x: f64, y: f64) -> SpherePoint {
    exposure.wcs().pixel_to_sky(&Point2D::new(x, y)).unwrap()
}

pub fn snapshot(exposure: &Exposure) -> (Array2<f32>, Array2<MaskPixel>) {
    (exposure.image().clone(), exposure.mask().array().clone())
}

/// Wraps a WCS and scales its local linearization by `factor`.
///
/// Point mappings and the nominal scale are untouched, which mimics a
/// solution that is locally folded or stretched far from its fit region.
#[derive(Debug)]
pub struct ScaledJacobianWcs {
    pub inner: TanWcs,
    pub factor: f64,
}

impl SkyWcs for ScaledJacobianWcs {
    fn sky_to_pixel(&self, sky: &SpherePoint) -> Result<Point2D, WcsError> {
        self.inner.sky_to_pixel(sky)
    }

    fn pixel_to_sky(&self, pixel: &Point2D) -> Result<SpherePoint, WcsError> {
        self.inner.pixel_to_sky(pixel)
    }

    fn pixel_scale(&self) -> f64 {
        self.inner.pixel_scale()
    }

    fn linearize_pixel_to_sky(&self, sky: &SpherePoint) -> Result<Matrix2<f64>, WcsError> {
        Ok(self.inner.linearize_pixel_to_sky(sky)? * self.factor)
    }
}

/// Exposure whose local Jacobian is `factor` times the true one.
pub fn exposure_with_scaled_jacobian(factor: f64) -> Exposure {
    let config = exposure_config();
    let mut exposure = config.build().unwrap();
    let inner = TanWcs::from_pixel_scale(
        SpherePoint::from_degrees(config.ra_deg, config.dec_deg),
        config.bbox().true_center(),
        config.pixel_scale_arcsec,
        0.0,
    )
    .unwrap();
    exposure.set_wcs(Arc::new(ScaledJacobianWcs { inner, factor }));
    exposure
}
