//! Point spread function models.
//!
//! The injector needs two things from a PSF: a kernel image evaluated at a
//! pixel position, and the flux the PSF places inside a circular aperture.
//! Evaluation outside the region where a model is valid fails with
//! [`PsfError::InvalidPosition`], which callers can tell apart from every
//! other failure.

use std::fmt;
use std::f64::consts::PI;

use ndarray::Array2;
use thiserror::Error;

use crate::geom::{Box2I, Point2D};
use crate::image_proc::aperture_photometry::aperture_sum;

/// Errors from PSF evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PsfError {
    /// Position is outside the domain where the model can be evaluated.
    #[error("cannot evaluate PSF at ({x:.3}, {y:.3}): position outside the model domain")]
    InvalidPosition { x: f64, y: f64 },

    #[error("invalid aperture radius {0}")]
    InvalidRadius(f64),

    #[error("PSF aperture flux at ({x:.3}, {y:.3}) is not positive: {flux}")]
    NonPositiveFlux { x: f64, y: f64, flux: f64 },

    #[error("invalid kernel image: {0}")]
    InvalidKernel(String),
}

impl PsfError {
    pub fn invalid_position(p: &Point2D) -> Self {
        PsfError::InvalidPosition { x: p.x, y: p.y }
    }

    /// True for the recoverable out-of-domain failure.
    pub fn is_invalid_position(&self) -> bool {
        matches!(self, PsfError::InvalidPosition { .. })
    }
}

/// PSF evaluated on a pixel grid, centred on the middle pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelImage {
    array: Array2<f64>,
}

impl KernelImage {
    /// Wrap an array with odd dimensions and finite values.
    pub fn new(array: Array2<f64>) -> Result<Self, PsfError> {
        let (rows, cols) = array.dim();
        if rows % 2 == 0 || cols % 2 == 0 {
            return Err(PsfError::InvalidKernel(format!(
                "kernel dimensions must be odd, got {rows}x{cols}"
            )));
        }
        if array.iter().any(|v| !v.is_finite()) {
            return Err(PsfError::InvalidKernel(
                "kernel contains non-finite values".to_string(),
            ));
        }
        Ok(Self { array })
    }

    pub fn array(&self) -> &Array2<f64> {
        &self.array
    }

    pub fn into_array(self) -> Array2<f64> {
        self.array
    }

    pub fn dim(&self) -> (usize, usize) {
        self.array.dim()
    }

    /// Distance in pixels from the centre pixel to the edge, as `(rows, cols)`.
    pub fn half_size(&self) -> (usize, usize) {
        let (rows, cols) = self.array.dim();
        (rows / 2, cols / 2)
    }

    pub fn sum(&self) -> f64 {
        self.array.sum()
    }

    /// Divide every pixel by `divisor`.
    pub fn normalize_by(&mut self, divisor: f64) {
        self.array.mapv_inplace(|v| v / divisor);
    }
}

/// Interface for position-dependent PSF models.
pub trait Psf: Send + Sync + fmt::Debug {
    /// Kernel image at `position`, normalized to unit sum.
    fn compute_kernel_image(&self, position: &Point2D) -> Result<KernelImage, PsfError>;

    /// Fraction of the PSF flux within `radius` pixels of its centre at `position`.
    fn compute_aperture_flux(&self, radius: f64, position: &Point2D) -> Result<f64, PsfError>;
}

fn check_radius(radius: f64) -> Result<(), PsfError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(PsfError::InvalidRadius(radius))
    }
}

/// Circular Gaussian PSF whose width may vary linearly across the image.
#[derive(Debug, Clone)]
pub struct GaussianPsf {
    /// Width in pixels at `x = 0`
    sigma: f64,
    /// Change of sigma per pixel along x
    sigma_gradient: f64,
    /// Kernel half-width in pixels
    kernel_radius: usize,
    valid_region: Option<Box2I>,
}

impl GaussianPsf {
    /// Constant-width PSF with a kernel extending to five sigma.
    pub fn new(sigma: f64) -> Self {
        Self {
            sigma,
            sigma_gradient: 0.0,
            kernel_radius: (5.0 * sigma).ceil().max(1.0) as usize,
            valid_region: None,
        }
    }

    /// PSF with the given full width at half maximum in pixels.
    pub fn with_fwhm(fwhm: f64) -> Self {
        Self::new(fwhm / (2.0 * (2.0 * 2.0_f64.ln()).sqrt()))
    }

    pub fn with_sigma_gradient(mut self, gradient: f64) -> Self {
        self.sigma_gradient = gradient;
        self
    }

    pub fn with_kernel_radius(mut self, radius: usize) -> Self {
        self.kernel_radius = radius.max(1);
        self
    }

    /// Restrict evaluation to positions inside `region`.
    pub fn with_valid_region(mut self, region: Box2I) -> Self {
        self.valid_region = Some(region);
        self
    }

    pub fn kernel_radius(&self) -> usize {
        self.kernel_radius
    }

    /// Gaussian width at `position`, or the out-of-domain error.
    pub fn sigma_at(&self, position: &Point2D) -> Result<f64, PsfError> {
        if !position.is_finite() {
            return Err(PsfError::invalid_position(position));
        }
        if let Some(region) = &self.valid_region {
            if !region.contains_point(position) {
                return Err(PsfError::invalid_position(position));
            }
        }

        let sigma = self.sigma + self.sigma_gradient * position.x;
        if sigma.is_finite() && sigma > 0.0 {
            Ok(sigma)
        } else {
            Err(PsfError::invalid_position(position))
        }
    }

    /// Analytically normalized samples on a `(2 r + 1)²` grid.
    fn sampled(sigma: f64, half_width: usize) -> Array2<f64> {
        let size = 2 * half_width + 1;
        let c = half_width as f64;
        let norm = 1.0 / (2.0 * PI * sigma * sigma);
        Array2::from_shape_fn((size, size), |(row, col)| {
            let dx = col as f64 - c;
            let dy = row as f64 - c;
            norm * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        })
    }
}

impl Psf for GaussianPsf {
    fn compute_kernel_image(&self, position: &Point2D) -> Result<KernelImage, PsfError> {
        let sigma = self.sigma_at(position)?;
        let mut kernel = KernelImage::new(Self::sampled(sigma, self.kernel_radius))?;
        let total = kernel.sum();
        kernel.normalize_by(total);
        Ok(kernel)
    }

    fn compute_aperture_flux(&self, radius: f64, position: &Point2D) -> Result<f64, PsfError> {
        check_radius(radius)?;
        let sigma = self.sigma_at(position)?;

        let half_width = self.kernel_radius.max(radius.ceil() as usize + 1);
        let samples = Self::sampled(sigma, half_width);
        let c = half_width as f64;
        let flux = aperture_sum(&samples.view(), c, c, radius);

        if flux > 0.0 {
            Ok(flux)
        } else {
            Err(PsfError::NonPositiveFlux {
                x: position.x,
                y: position.y,
                flux,
            })
        }
    }
}

/// PSF defined by a single fixed kernel image.
#[derive(Debug, Clone)]
pub struct ImagePsf {
    kernel: KernelImage,
    valid_region: Option<Box2I>,
}

impl ImagePsf {
    /// Use `kernel` everywhere; it is normalized to unit sum.
    pub fn new(kernel: Array2<f64>) -> Result<Self, PsfError> {
        let mut kernel = KernelImage::new(kernel)?;
        let total = kernel.sum();
        if !(total > 0.0) {
            return Err(PsfError::InvalidKernel(format!(
                "kernel sum must be positive, got {total}"
            )));
        }
        kernel.normalize_by(total);
        Ok(Self {
            kernel,
            valid_region: None,
        })
    }

    pub fn with_valid_region(mut self, region: Box2I) -> Self {
        self.valid_region = Some(region);
        self
    }

    fn check_position(&self, position: &Point2D) -> Result<(), PsfError> {
        match &self.valid_region {
            Some(region) if !region.contains_point(position) => {
                Err(PsfError::invalid_position(position))
            }
            _ => Ok(()),
        }
    }
}

impl Psf for ImagePsf {
    fn compute_kernel_image(&self, position: &Point2D) -> Result<KernelImage, PsfError> {
        self.check_position(position)?;
        Ok(self.kernel.clone())
    }

    fn compute_aperture_flux(&self, radius: f64, position: &Point2D) -> Result<f64, PsfError> {
        check_radius(radius)?;
        self.check_position(position)?;

        let (rows, cols) = self.kernel.half_size();
        let flux = aperture_sum(&self.kernel.array().view(), cols as f64, rows as f64, radius);
        if flux > 0.0 {
            Ok(flux)
        } else {
            Err(PsfError::NonPositiveFlux {
                x: position.x,
                y: position.y,
                flux,
            })
        }
    }
}
