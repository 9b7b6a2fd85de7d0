//! Surface-brightness profiles that can be rendered into an exposure.
//!
//! Profiles are defined in sky coordinates: offsets `(u, v)` in arcseconds
//! from the profile centre on the local tangent plane, with surface
//! brightness in flux per arcsec². Rendering maps pixel offsets onto sky
//! offsets through a [`JacobianWcs`].

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::fmt;
use std::sync::Arc;

use nalgebra::Matrix2;
use ndarray::Array2;
use thiserror::Error;

use crate::jacobian::JacobianWcs;
use shared::geom::Point2D;

/// Fraction of flux allowed to fall outside [`Profile::max_radius`].
pub const FOLDING_THRESHOLD: f64 = 5e-3;

/// Ratio of half-light radius to scale radius for an exponential disk.
const EXPONENTIAL_HLR_FACTOR: f64 = 1.678_346_990_016_660_5;

/// Sub-sample spacing is at most `max_radius / SAMPLES_PER_RADIUS`.
const SAMPLES_PER_RADIUS: f64 = 16.0;

/// Cap on sub-samples per pixel side.
const MAX_SUBSAMPLES: usize = 32;

/// Errors from profile construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("flux must be finite, got {0}")]
    InvalidFlux(f64),

    #[error("{name} must be positive and finite, got {value}")]
    InvalidSize { name: &'static str, value: f64 },

    #[error("axis ratio must be in (0, 1], got {0}")]
    InvalidAxisRatio(f64),
}

fn check_flux(flux: f64) -> Result<(), ProfileError> {
    if flux.is_finite() {
        Ok(())
    } else {
        Err(ProfileError::InvalidFlux(flux))
    }
}

fn check_size(name: &'static str, value: f64) -> Result<(), ProfileError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ProfileError::InvalidSize { name, value })
    }
}

/// A renderable surface-brightness profile.
pub trait Profile: fmt::Debug + Send + Sync {
    /// Total flux.
    fn flux(&self) -> f64;

    /// Surface brightness at sky offset `(u, v)` arcseconds from the centre.
    fn surface_brightness(&self, u: f64, v: f64) -> f64;

    /// Radius in arcseconds enclosing all but [`FOLDING_THRESHOLD`] of the flux.
    fn max_radius(&self) -> f64;

    /// True for profiles with all flux at a single point.
    fn is_point(&self) -> bool {
        false
    }

    /// Accumulate flux per pixel onto `grid`.
    ///
    /// `center` is the profile centre in grid coordinates (column, row).
    /// The default is [`sample_surface_brightness`].
    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        sample_surface_brightness(self, grid, center, jacobian);
    }
}

/// Flux per pixel for an extended profile.
///
/// Profiles that are well resolved by the pixel grid are sampled at pixel
/// centres. Narrower ones are averaged over an `n × n` sub-pixel grid near
/// their centre, so their flux does not depend on where they fall within a
/// pixel.
pub fn sample_surface_brightness<P: Profile + ?Sized>(
    profile: &P,
    grid: &mut Array2<f64>,
    center: Point2D,
    jacobian: &JacobianWcs,
) {
    let area = jacobian.pixel_area();
    let pixel_size = jacobian.max_linear_scale();
    let extent = profile.max_radius();
    let n = subsamples_per_side(extent, pixel_size);

    // Beyond this sky distance from the centre a pixel holds no flux worth integrating
    let reach = 2.0 * extent + pixel_size * FRAC_1_SQRT_2;
    let step = 1.0 / n as f64;
    let weight = area / (n * n) as f64;

    for ((row, col), value) in grid.indexed_iter_mut() {
        let dx = col as f64 - center.x;
        let dy = row as f64 - center.y;
        let (u, v) = jacobian.to_sky(dx, dy);

        if n == 1 || u.hypot(v) > reach {
            *value += profile.surface_brightness(u, v) * area;
            continue;
        }

        let mut total = 0.0;
        for i in 0..n {
            let sy = dy + (i as f64 + 0.5) * step - 0.5;
            for j in 0..n {
                let sx = dx + (j as f64 + 0.5) * step - 0.5;
                let (u, v) = jacobian.to_sky(sx, sy);
                total += profile.surface_brightness(u, v);
            }
        }
        *value += total * weight;
    }
}

/// Sub-samples per pixel side for a profile of radius `extent` arcseconds on
/// pixels at most `pixel_size` arcseconds across.
fn subsamples_per_side(extent: f64, pixel_size: f64) -> usize {
    // Zero extent saturates to the cap, NaN falls back to one sample
    let n = (SAMPLES_PER_RADIUS * pixel_size / extent).ceil();
    (n as usize).clamp(1, MAX_SUBSAMPLES)
}

impl<T: Profile + ?Sized> Profile for Box<T> {
    fn flux(&self) -> f64 {
        (**self).flux()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        (**self).surface_brightness(u, v)
    }

    fn max_radius(&self) -> f64 {
        (**self).max_radius()
    }

    fn is_point(&self) -> bool {
        (**self).is_point()
    }

    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        (**self).sample(grid, center, jacobian)
    }
}

impl<T: Profile + ?Sized> Profile for Arc<T> {
    fn flux(&self) -> f64 {
        (**self).flux()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        (**self).surface_brightness(u, v)
    }

    fn max_radius(&self) -> f64 {
        (**self).max_radius()
    }

    fn is_point(&self) -> bool {
        (**self).is_point()
    }

    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        (**self).sample(grid, center, jacobian)
    }
}

impl<T: Profile + ?Sized> Profile for &T {
    fn flux(&self) -> f64 {
        (**self).flux()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        (**self).surface_brightness(u, v)
    }

    fn max_radius(&self) -> f64 {
        (**self).max_radius()
    }

    fn is_point(&self) -> bool {
        (**self).is_point()
    }

    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        (**self).sample(grid, center, jacobian)
    }
}

/// Point source.
///
/// All flux is deposited on the four pixels surrounding the centre with
/// bilinear weights, so sub-pixel positions shift the light centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaFunction {
    flux: f64,
}

impl DeltaFunction {
    pub fn new(flux: f64) -> Result<Self, ProfileError> {
        check_flux(flux)?;
        Ok(Self { flux })
    }

    pub fn with_flux(&self, flux: f64) -> Result<Self, ProfileError> {
        Self::new(flux)
    }
}

impl Profile for DeltaFunction {
    fn flux(&self) -> f64 {
        self.flux
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        if u == 0.0 && v == 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    fn max_radius(&self) -> f64 {
        0.0
    }

    fn is_point(&self) -> bool {
        true
    }

    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, _jacobian: &JacobianWcs) {
        let (rows, cols) = grid.dim();
        let x0 = center.x.floor();
        let y0 = center.y.floor();
        let fx = center.x - x0;
        let fy = center.y - y0;

        let corners = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1.0, y0, fx * (1.0 - fy)),
            (x0, y0 + 1.0, (1.0 - fx) * fy),
            (x0 + 1.0, y0 + 1.0, fx * fy),
        ];

        for (x, y, weight) in corners {
            if weight == 0.0 || x < 0.0 || y < 0.0 || x >= cols as f64 || y >= rows as f64 {
                continue;
            }
            grid[[y as usize, x as usize]] += self.flux * weight;
        }
    }
}

/// Circular Gaussian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    flux: f64,
    /// Arcseconds
    sigma: f64,
}

impl Gaussian {
    pub fn new(flux: f64, sigma: f64) -> Result<Self, ProfileError> {
        check_flux(flux)?;
        check_size("sigma", sigma)?;
        Ok(Self { flux, sigma })
    }

    pub fn from_fwhm(flux: f64, fwhm: f64) -> Result<Self, ProfileError> {
        check_size("fwhm", fwhm)?;
        Self::new(flux, fwhm / (2.0 * (2.0 * 2.0_f64.ln()).sqrt()))
    }

    pub fn from_half_light_radius(flux: f64, half_light_radius: f64) -> Result<Self, ProfileError> {
        check_size("half_light_radius", half_light_radius)?;
        Self::new(flux, half_light_radius / (2.0 * 2.0_f64.ln()).sqrt())
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Same shape, different total flux.
    pub fn with_flux(&self, flux: f64) -> Result<Self, ProfileError> {
        Self::new(flux, self.sigma)
    }
}

impl Profile for Gaussian {
    fn flux(&self) -> f64 {
        self.flux
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        let s2 = self.sigma * self.sigma;
        self.flux / (2.0 * PI * s2) * (-(u * u + v * v) / (2.0 * s2)).exp()
    }

    fn max_radius(&self) -> f64 {
        // Enclosed fraction is 1 - exp(-R² / 2σ²)
        self.sigma * (-2.0 * FOLDING_THRESHOLD.ln()).sqrt()
    }
}

/// Exponential disk, `I(r) ∝ exp(-r / r0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    flux: f64,
    /// Arcseconds
    scale_radius: f64,
}

impl Exponential {
    pub fn new(flux: f64, scale_radius: f64) -> Result<Self, ProfileError> {
        check_flux(flux)?;
        check_size("scale_radius", scale_radius)?;
        Ok(Self { flux, scale_radius })
    }

    pub fn from_half_light_radius(flux: f64, half_light_radius: f64) -> Result<Self, ProfileError> {
        check_size("half_light_radius", half_light_radius)?;
        Self::new(flux, half_light_radius / EXPONENTIAL_HLR_FACTOR)
    }

    pub fn scale_radius(&self) -> f64 {
        self.scale_radius
    }

    pub fn half_light_radius(&self) -> f64 {
        self.scale_radius * EXPONENTIAL_HLR_FACTOR
    }

    pub fn with_flux(&self, flux: f64) -> Result<Self, ProfileError> {
        Self::new(flux, self.scale_radius)
    }
}

/// Solve `(1 + x) e^{-x} = threshold` for `x` by Newton iteration.
fn exponential_folding_radius(threshold: f64) -> f64 {
    // f(x) = ln(1 + x) - x - ln(t), f'(x) = -x / (1 + x)
    let target = threshold.ln();
    let mut x = -target;
    for _ in 0..50 {
        let f = (1.0 + x).ln() - x - target;
        let step = f / (-x / (1.0 + x));
        x -= step;
        if step.abs() < 1e-12 {
            break;
        }
    }
    x
}

impl Profile for Exponential {
    fn flux(&self) -> f64 {
        self.flux
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        let r0 = self.scale_radius;
        self.flux / (2.0 * PI * r0 * r0) * (-(u * u + v * v).sqrt() / r0).exp()
    }

    fn max_radius(&self) -> f64 {
        self.scale_radius * exponential_folding_radius(FOLDING_THRESHOLD)
    }
}

/// Area-preserving elliptical distortion of another profile.
///
/// The major axis lies at `position_angle` radians from the +u axis; the
/// minor-to-major axis ratio is `axis_ratio`.
#[derive(Debug)]
pub struct Sheared {
    inner: Box<dyn Profile>,
    axis_ratio: f64,
    cos_pa: f64,
    sin_pa: f64,
}

impl Sheared {
    pub fn new(
        inner: Box<dyn Profile>,
        axis_ratio: f64,
        position_angle: f64,
    ) -> Result<Self, ProfileError> {
        if !(axis_ratio > 0.0 && axis_ratio <= 1.0) {
            return Err(ProfileError::InvalidAxisRatio(axis_ratio));
        }
        if !position_angle.is_finite() {
            return Err(ProfileError::InvalidSize {
                name: "position_angle",
                value: position_angle,
            });
        }
        let (sin_pa, cos_pa) = position_angle.sin_cos();
        Ok(Self {
            inner,
            axis_ratio,
            cos_pa,
            sin_pa,
        })
    }

    pub fn axis_ratio(&self) -> f64 {
        self.axis_ratio
    }
}

impl Profile for Sheared {
    fn flux(&self) -> f64 {
        self.inner.flux()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        // Rotate into the major/minor frame, then squash the major axis in
        // and stretch the minor axis out by the same factor
        let major = u * self.cos_pa + v * self.sin_pa;
        let minor = -u * self.sin_pa + v * self.cos_pa;
        let root_q = self.axis_ratio.sqrt();
        self.inner
            .surface_brightness(major * root_q, minor / root_q)
    }

    fn max_radius(&self) -> f64 {
        self.inner.max_radius() / self.axis_ratio.sqrt()
    }

    fn is_point(&self) -> bool {
        self.inner.is_point()
    }

    /// Samples the inner profile through a sheared Jacobian, so point
    /// components of the inner profile keep their own deposit.
    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        let root_q = self.axis_ratio.sqrt();
        // Sky offset to the inner profile's frame, as in surface_brightness; det = 1
        let shear = Matrix2::new(
            root_q * self.cos_pa,
            root_q * self.sin_pa,
            -self.sin_pa / root_q,
            self.cos_pa / root_q,
        );
        let sheared = JacobianWcs::from_matrix(shear * jacobian.matrix());
        self.inner.sample(grid, center, &sheared);
    }
}

/// Superposition of profiles sharing one centre, e.g. bulge plus disk.
#[derive(Debug, Default)]
pub struct Sum {
    components: Vec<Box<dyn Profile>>,
}

impl Sum {
    pub fn new(components: Vec<Box<dyn Profile>>) -> Self {
        Self { components }
    }

    pub fn push(&mut self, component: Box<dyn Profile>) {
        self.components.push(component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Profile for Sum {
    fn flux(&self) -> f64 {
        self.components.iter().map(|c| c.flux()).sum()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        self.components
            .iter()
            .map(|c| c.surface_brightness(u, v))
            .sum()
    }

    fn max_radius(&self) -> f64 {
        self.components
            .iter()
            .map(|c| c.max_radius())
            .fold(0.0, f64::max)
    }

    fn is_point(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(|c| c.is_point())
    }

    fn sample(&self, grid: &mut Array2<f64>, center: Point2D, jacobian: &JacobianWcs) {
        for component in &self.components {
            component.sample(grid, center, jacobian);
        }
    }
}
