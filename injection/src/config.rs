//! Injection settings and synthetic exposure descriptions.
//!
//! Both are plain serde structs persisted as pretty-printed JSON.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::exposure::{Exposure, ExposureError};
use shared::geom::{Box2I, Point2I, SpherePoint};
use shared::psf::GaussianPsf;
use shared::wcs::{TanWcs, WcsError};

use crate::inject::{DEFAULT_CALIB_FLUX_RADIUS, FAKE_MASK_PLANE};

/// Zero point used to turn catalog magnitudes into instrumental flux.
pub const DEFAULT_ZERO_POINT: f64 = 27.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot build WCS: {0}")]
    Wcs(#[from] WcsError),

    #[error("cannot build exposure: {0}")]
    Exposure(#[from] ExposureError),
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Parameters of one injection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Radius in pixels of the aperture used to normalize PSF kernels
    pub calib_flux_radius: f64,
    /// Mask plane marking injected pixels
    pub mask_plane_name: String,
    /// Magnitude zero point for catalog fluxes
    pub zero_point: f64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            calib_flux_radius: DEFAULT_CALIB_FLUX_RADIUS,
            mask_plane_name: FAKE_MASK_PLANE.to_string(),
            zero_point: DEFAULT_ZERO_POINT,
        }
    }
}

impl InjectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.calib_flux_radius.is_finite() && self.calib_flux_radius > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "calib_flux_radius must be positive, got {}",
                self.calib_flux_radius
            )));
        }
        if self.mask_plane_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mask_plane_name must not be empty".to_string(),
            ));
        }
        if !self.zero_point.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "zero_point must be finite, got {}",
                self.zero_point
            )));
        }
        Ok(())
    }

    /// Load and validate a config from JSON.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}

/// Blank exposure with a gnomonic WCS and a Gaussian PSF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticExposureConfig {
    pub width: usize,
    pub height: usize,
    /// Pixel coordinates of the lower-left pixel
    pub x0: i32,
    pub y0: i32,
    /// Sky position of the image centre in degrees
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub pixel_scale_arcsec: f64,
    pub rotation_deg: f64,
    /// Radial distortion coefficient per pixel²
    pub distortion: f64,
    pub psf_fwhm_pixels: f64,
    /// Change of PSF sigma per pixel along x
    pub psf_sigma_gradient: f64,
    /// Constant level every pixel starts at
    pub background: f32,
}

impl Default for SyntheticExposureConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            x0: 0,
            y0: 0,
            ra_deg: 150.0,
            dec_deg: 2.2,
            pixel_scale_arcsec: 0.2,
            rotation_deg: 0.0,
            distortion: 0.0,
            psf_fwhm_pixels: 3.5,
            psf_sigma_gradient: 0.0,
            background: 0.0,
        }
    }
}

impl SyntheticExposureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "image must have positive dimensions, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.pixel_scale_arcsec.is_finite() && self.pixel_scale_arcsec > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pixel_scale_arcsec must be positive, got {}",
                self.pixel_scale_arcsec
            )));
        }
        if !(self.psf_fwhm_pixels.is_finite() && self.psf_fwhm_pixels > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "psf_fwhm_pixels must be positive, got {}",
                self.psf_fwhm_pixels
            )));
        }
        if !(-90.0..=90.0).contains(&self.dec_deg) {
            return Err(ConfigError::Invalid(format!(
                "dec_deg must lie in [-90, 90], got {}",
                self.dec_deg
            )));
        }
        Ok(())
    }

    pub fn bbox(&self) -> Box2I {
        Box2I::from_dimensions(Point2I::new(self.x0, self.y0), self.width, self.height)
    }

    /// Build the exposure, with the WCS reference pixel at the image centre.
    ///
    /// The PSF is only defined inside the image bounds.
    pub fn build(&self) -> Result<Exposure, ConfigError> {
        self.validate()?;
        let bbox = self.bbox();

        let wcs = TanWcs::from_pixel_scale(
            SpherePoint::from_degrees(self.ra_deg, self.dec_deg),
            bbox.true_center(),
            self.pixel_scale_arcsec,
            self.rotation_deg.to_radians(),
        )?
        .with_distortion(self.distortion);

        let psf = GaussianPsf::with_fwhm(self.psf_fwhm_pixels)
            .with_sigma_gradient(self.psf_sigma_gradient)
            .with_valid_region(bbox);

        let mut exposure = Exposure::new(bbox, Arc::new(wcs), Arc::new(psf))?;
        exposure.image_mut().fill(self.background);
        Ok(exposure)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::geom::Point2D;
    use tempfile::tempdir;

    #[test]
    fn test_injection_defaults() {
        let config = InjectionConfig::default();
        assert_eq!(config.calib_flux_radius, 12.0);
        assert_eq!(config.mask_plane_name, "FAKE");
        assert_eq!(config.zero_point, 27.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_injection_partial_json_uses_defaults() {
        let config: InjectionConfig = serde_json::from_str(r#"{"zero_point": 31.4}"#).unwrap();
        assert_eq!(config.zero_point, 31.4);
        assert_eq!(config.calib_flux_radius, 12.0);
    }

    #[test]
    fn test_injection_validation() {
        let bad_radius = InjectionConfig {
            calib_flux_radius: 0.0,
            ..InjectionConfig::default()
        };
        assert!(matches!(bad_radius.validate(), Err(ConfigError::Invalid(_))));

        let bad_plane = InjectionConfig {
            mask_plane_name: "  ".to_string(),
            ..InjectionConfig::default()
        };
        assert!(matches!(bad_plane.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("injection.json");

        let config = InjectionConfig {
            calib_flux_radius: 8.5,
            mask_plane_name: "INJECTED".to_string(),
            zero_point: 25.0,
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(InjectionConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"calib_flux_radius": -1.0}"#).unwrap();
        assert!(matches!(
            InjectionConfig::load_from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            InjectionConfig::load_from_file(&path),
            Err(ConfigError::Parse(_))
        ));

        assert!(matches!(
            InjectionConfig::load_from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_build_synthetic_exposure() {
        let config = SyntheticExposureConfig {
            width: 64,
            height: 48,
            x0: 10,
            y0: 20,
            background: 3.0,
            ..SyntheticExposureConfig::default()
        };
        let exposure = config.build().unwrap();

        assert_eq!(exposure.bbox(), config.bbox());
        assert_eq!(exposure.image().dim(), (48, 64));
        assert!(exposure.image().iter().all(|&v| v == 3.0));
        assert_relative_eq!(exposure.wcs().pixel_scale(), 0.2, epsilon = 1e-9);

        let centre = SpherePoint::from_degrees(config.ra_deg, config.dec_deg);
        let pixel = exposure.wcs().sky_to_pixel(&centre).unwrap();
        assert_relative_eq!(pixel.x, 41.5, epsilon = 1e-6);
        assert_relative_eq!(pixel.y, 43.5, epsilon = 1e-6);

        // PSF is undefined outside the image
        assert!(exposure
            .psf()
            .compute_kernel_image(&Point2D::new(0.0, 0.0))
            .is_err());
    }

    #[test]
    fn test_build_rejects_empty_image() {
        let config = SyntheticExposureConfig {
            width: 0,
            ..SyntheticExposureConfig::default()
        };
        assert!(matches!(config.build(), Err(ConfigError::Invalid(_))));
    }
}
