//! Sky-to-pixel coordinate transforms.
//!
//! [`SkyWcs`] is the interface the injector needs from a world coordinate
//! system: forward and reverse mapping, the local linear approximation at a
//! sky position, and a nominal pixel scale. [`TanWcs`] is a gnomonic
//! (tangent plane) projection with an optional radial distortion term, which
//! is enough to produce spatially varying local pixel scales.

use std::fmt;

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use thiserror::Error;

use crate::geom::{radians_to_arcsec, Point2D, SpherePoint};
use meter_math::{invert_matrix, pixel_area, rotation_matrix, scale_matrix, SingularMatrixError};

/// Half-step in pixels used for finite-difference linearization.
pub const LINEARIZE_STEP_PIXELS: f64 = 0.5;

const DISTORTION_MAX_ITERATIONS: usize = 50;

/// Errors from coordinate transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WcsError {
    #[error("sky position {position} lies behind the projection plane")]
    BehindProjection { position: SpherePoint },

    #[error("singular CD matrix: {0}")]
    SingularCd(#[from] SingularMatrixError),

    #[error("distortion cannot be inverted at intermediate radius {radius:.3} pixels")]
    NoSolution { radius: f64 },

    #[error("non-finite pixel position ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

impl WcsError {
    /// True when the mapping is undefined at one position, as opposed to a
    /// malformed solution.
    pub fn is_undefined_position(&self) -> bool {
        matches!(
            self,
            WcsError::BehindProjection { .. } | WcsError::NoSolution { .. } | WcsError::NonFinite { .. }
        )
    }
}

/// Mapping between the celestial sphere and pixel coordinates.
pub trait SkyWcs: Send + Sync + fmt::Debug {
    /// Pixel position of a sky point.
    fn sky_to_pixel(&self, sky: &SpherePoint) -> Result<Point2D, WcsError>;

    /// Sky point at a pixel position.
    fn pixel_to_sky(&self, pixel: &Point2D) -> Result<SpherePoint, WcsError>;

    /// Nominal pixel scale in arcseconds per pixel.
    fn pixel_scale(&self) -> f64;

    /// Local linear approximation of the pixel-to-sky mapping at `sky`.
    ///
    /// Returned in arcseconds per pixel. Rows are the east and north
    /// tangent-plane axes at `sky`; columns are the pixel x and y axes.
    /// The default implementation takes central differences of
    /// [`SkyWcs::pixel_to_sky`] around the pixel position of `sky`.
    fn linearize_pixel_to_sky(&self, sky: &SpherePoint) -> Result<Matrix2<f64>, WcsError> {
        let center = self.sky_to_pixel(sky)?;
        let h = LINEARIZE_STEP_PIXELS;
        let mut jacobian = Matrix2::zeros();

        for (axis, step) in [Point2D::new(h, 0.0), Point2D::new(0.0, h)]
            .into_iter()
            .enumerate()
        {
            let plus = tangent_offset(sky, &self.pixel_to_sky(&(center + step))?)?;
            let minus = tangent_offset(sky, &self.pixel_to_sky(&(center - step))?)?;

            jacobian[(0, axis)] = radians_to_arcsec(plus.0 - minus.0) / (2.0 * h);
            jacobian[(1, axis)] = radians_to_arcsec(plus.1 - minus.1) / (2.0 * h);
        }

        Ok(jacobian)
    }
}

fn tangent_offset(center: &SpherePoint, point: &SpherePoint) -> Result<(f64, f64), WcsError> {
    center
        .gnomonic_offset(point)
        .ok_or(WcsError::BehindProjection { position: *point })
}

/// Gnomonic projection with a linear CD matrix and radial distortion.
///
/// Pixel offsets `d` from the reference pixel are distorted as
/// `d_u = d * (1 + k |d|²)` before the CD matrix maps them onto the tangent
/// plane. A negative `k` folds the mapping back on itself far from the
/// centre, which is how multivalued regions arise in real fitted solutions.
#[derive(Debug, Clone)]
pub struct TanWcs {
    crval: SpherePoint,
    crpix: Point2D,
    /// Degrees per pixel
    cd: Matrix2<f64>,
    cd_inverse: Matrix2<f64>,
    frame: Matrix3<f64>,
    distortion: f64,
}

impl TanWcs {
    /// Projection with reference sky point `crval` at pixel `crpix` and CD matrix in degrees/pixel.
    pub fn new(crval: SpherePoint, crpix: Point2D, cd: Matrix2<f64>) -> Result<Self, WcsError> {
        let cd_inverse = invert_matrix(&cd)?;
        Ok(Self {
            crval,
            crpix,
            cd,
            cd_inverse,
            frame: crval.tangent_frame(),
            distortion: 0.0,
        })
    }

    /// North-up projection with RA increasing to the left, rotated by `rotation` radians.
    pub fn from_pixel_scale(
        crval: SpherePoint,
        crpix: Point2D,
        scale_arcsec: f64,
        rotation: f64,
    ) -> Result<Self, WcsError> {
        let s = scale_arcsec / 3600.0;
        Self::new(crval, crpix, rotation_matrix(rotation) * scale_matrix(-s, s))
    }

    /// Set the radial distortion coefficient `k` (per pixel²).
    pub fn with_distortion(mut self, k: f64) -> Self {
        self.distortion = k;
        self
    }

    pub fn crval(&self) -> SpherePoint {
        self.crval
    }

    pub fn crpix(&self) -> Point2D {
        self.crpix
    }

    pub fn cd(&self) -> Matrix2<f64> {
        self.cd
    }

    pub fn distortion(&self) -> f64 {
        self.distortion
    }

    /// Solve `r + k r³ = r_u` for the undistorted-to-distorted radius.
    fn undistort_radius(&self, radius_u: f64) -> Result<f64, WcsError> {
        let k = self.distortion;
        if k == 0.0 || radius_u == 0.0 {
            return Ok(radius_u);
        }

        let mut r = radius_u;
        for _ in 0..DISTORTION_MAX_ITERATIONS {
            let f = r + k * r * r * r - radius_u;
            let df = 1.0 + 3.0 * k * r * r;
            if df <= 0.0 {
                break;
            }
            let step = f / df;
            r -= step;
            if step.abs() <= 1e-12 * radius_u.max(1.0) {
                // Only the branch nearest the centre is accepted
                if 1.0 + 3.0 * k * r * r > 0.0 && r >= 0.0 {
                    return Ok(r);
                }
                break;
            }
        }

        Err(WcsError::NoSolution { radius: radius_u })
    }
}

impl SkyWcs for TanWcs {
    fn sky_to_pixel(&self, sky: &SpherePoint) -> Result<Point2D, WcsError> {
        let local = self.frame.transpose() * sky.to_unit_vector();
        if local.z <= 0.0 {
            return Err(WcsError::BehindProjection { position: *sky });
        }

        let xi = (local.x / local.z).to_degrees();
        let eta = (local.y / local.z).to_degrees();
        let d_u = self.cd_inverse * Vector2::new(xi, eta);

        let radius_u = d_u.norm();
        let d = if radius_u > 0.0 {
            d_u * (self.undistort_radius(radius_u)? / radius_u)
        } else {
            d_u
        };

        Ok(Point2D::new(self.crpix.x + d.x, self.crpix.y + d.y))
    }

    fn pixel_to_sky(&self, pixel: &Point2D) -> Result<SpherePoint, WcsError> {
        if !pixel.is_finite() {
            return Err(WcsError::NonFinite {
                x: pixel.x,
                y: pixel.y,
            });
        }

        let d = Vector2::new(pixel.x - self.crpix.x, pixel.y - self.crpix.y);
        let d_u = d * (1.0 + self.distortion * d.norm_squared());
        let plane = self.cd * d_u;

        let local = Vector3::new(plane.x.to_radians(), plane.y.to_radians(), 1.0);
        Ok(SpherePoint::from_vector(&(self.frame * local)))
    }

    fn pixel_scale(&self) -> f64 {
        pixel_area(&self.cd).sqrt() * 3600.0
    }
}
