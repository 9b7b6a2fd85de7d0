//! Pixel and sky geometry primitives.
//!
//! Pixel coordinates follow the convention that integer values sit on pixel
//! centres, so pixel `(x, y)` covers `[x - 0.5, x + 0.5) × [y - 0.5, y + 0.5)`.
//! Integer boxes are inclusive on both ends.

use std::fmt;
use std::ops::{Add, BitAnd, Sub};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Arcseconds in one radian.
pub const ARCSEC_PER_RADIAN: f64 = 180.0 * 3600.0 / std::f64::consts::PI;

/// Convert arcseconds to radians.
pub fn arcsec_to_radians(arcsec: f64) -> f64 {
    arcsec / ARCSEC_PER_RADIAN
}

/// Convert radians to arcseconds.
pub fn radians_to_arcsec(radians: f64) -> f64 {
    radians * ARCSEC_PER_RADIAN
}

/// A point on the celestial sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpherePoint {
    /// Right ascension in radians
    pub ra: f64,
    /// Declination in radians
    pub dec: f64,
}

impl SpherePoint {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            ra: ra_deg.to_radians(),
            dec: dec_deg.to_radians(),
        }
    }

    pub fn ra_degrees(&self) -> f64 {
        self.ra.to_degrees()
    }

    pub fn dec_degrees(&self) -> f64 {
        self.dec.to_degrees()
    }

    /// Unit vector in the equatorial cartesian frame.
    pub fn to_unit_vector(&self) -> Vector3<f64> {
        let (sin_dec, cos_dec) = self.dec.sin_cos();
        let (sin_ra, cos_ra) = self.ra.sin_cos();
        Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
    }

    /// Inverse of [`SpherePoint::to_unit_vector`]; the input need not be normalized.
    pub fn from_vector(v: &Vector3<f64>) -> Self {
        let n = v.normalize();
        let ra = n.y.atan2(n.x).rem_euclid(2.0 * std::f64::consts::PI);
        let dec = n.z.clamp(-1.0, 1.0).asin();
        Self { ra, dec }
    }

    /// Great-circle separation in radians.
    pub fn separation(&self, other: &SpherePoint) -> f64 {
        let a = self.to_unit_vector();
        let b = other.to_unit_vector();
        // atan2 form stays accurate at both small and large separations
        a.cross(&b).norm().atan2(a.dot(&b))
    }

    /// Rotation whose columns are the local east, north and radial unit vectors.
    ///
    /// Transforming a celestial unit vector by the transpose of this matrix
    /// yields coordinates in a frame whose Z axis points at `self`, Y axis
    /// towards the celestial north pole and X axis east.
    pub fn tangent_frame(&self) -> Matrix3<f64> {
        let z = self.to_unit_vector();

        let north = Vector3::new(0.0, 0.0, 1.0);
        let mut east = north.cross(&z);
        if east.norm() < 1e-12 {
            // At the poles any meridian will do; pick the one through ra = 0
            east = Vector3::new(0.0, 1.0, 0.0);
        }
        let east = east.normalize();
        let y = z.cross(&east).normalize();
        let x = y.cross(&z).normalize();

        Matrix3::from_columns(&[x, y, z])
    }

    /// Gnomonic offset of `other` on the tangent plane at `self`, in radians.
    ///
    /// Returns `None` when `other` lies on or behind the tangent plane.
    pub fn gnomonic_offset(&self, other: &SpherePoint) -> Option<(f64, f64)> {
        let local = self.tangent_frame().transpose() * other.to_unit_vector();
        if local.z <= 0.0 {
            return None;
        }
        Some((local.x / local.z, local.y / local.z))
    }
}

impl fmt::Display for SpherePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({:.6}°, {:+.6}°)",
            self.ra_degrees(),
            self.dec_degrees()
        )
    }
}

/// Floating point pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Integer pixel whose lower-left corner region contains this point (floor on both axes).
    pub fn floor(&self) -> Point2I {
        Point2I::new(self.x.floor() as i32, self.y.floor() as i32)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

impl Add for Point2D {
    type Output = Point2D;

    fn add(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2D {
    type Output = Point2D;

    fn sub(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Integer pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point2I {
    pub x: i32,
    pub y: i32,
}

impl Point2I {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<Point2I> for Point2D {
    fn from(p: Point2I) -> Self {
        Point2D::new(p.x as f64, p.y as f64)
    }
}

impl fmt::Display for Point2I {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Inclusive integer bounding box in pixel coordinates.
///
/// A box is empty when `max < min` on either axis. All empty boxes compare
/// equal to [`Box2I::empty`] after normalization through [`Box2I::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Box2I {
    pub min: Point2I,
    pub max: Point2I,
}

impl Box2I {
    /// Box spanning `min..=max`. Inverted corners produce the empty box.
    pub fn new(min: Point2I, max: Point2I) -> Self {
        if max.x < min.x || max.y < min.y {
            return Self::empty();
        }
        Self { min, max }
    }

    /// Box with the given corner and size. Zero size produces the empty box.
    pub fn from_dimensions(min: Point2I, width: usize, height: usize) -> Self {
        if width == 0 || height == 0 {
            return Self::empty();
        }
        Self::new(
            min,
            Point2I::new(min.x + width as i32 - 1, min.y + height as i32 - 1),
        )
    }

    /// Box containing the single pixel `p`.
    pub fn from_point(p: Point2I) -> Self {
        Self { min: p, max: p }
    }

    pub fn empty() -> Self {
        Self {
            min: Point2I::new(0, 0),
            max: Point2I::new(-1, -1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y
    }

    pub fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.max.x - self.min.x + 1) as usize
        }
    }

    pub fn height(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.max.y - self.min.y + 1) as usize
        }
    }

    /// Number of pixels in the box.
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Array shape `(rows, cols)` for ndarray storage of this box.
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn contains(&self, p: Point2I) -> bool {
        !self.is_empty()
            && p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
    }

    /// True when `other` is entirely inside this box. Empty boxes are contained everywhere.
    pub fn contains_box(&self, other: &Box2I) -> bool {
        other.is_empty() || (self.contains(other.min) && self.contains(other.max))
    }

    /// True when the floating point position lies within `[min, max]` on both axes.
    pub fn contains_point(&self, p: &Point2D) -> bool {
        !self.is_empty()
            && p.x >= self.min.x as f64
            && p.x <= self.max.x as f64
            && p.y >= self.min.y as f64
            && p.y <= self.max.y as f64
    }

    pub fn intersection(&self, other: &Box2I) -> Box2I {
        if self.is_empty() || other.is_empty() {
            return Box2I::empty();
        }
        Box2I::new(
            Point2I::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            Point2I::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        )
    }

    /// Grow the box by `border` pixels on every side.
    pub fn dilated_by(&self, border: i32) -> Box2I {
        if self.is_empty() {
            return *self;
        }
        Box2I::new(
            Point2I::new(self.min.x.saturating_sub(border), self.min.y.saturating_sub(border)),
            Point2I::new(self.max.x.saturating_add(border), self.max.y.saturating_add(border)),
        )
    }

    /// Floating point centre of the box, `(min + max) / 2` on each axis.
    pub fn true_center(&self) -> Point2D {
        Point2D::new(
            (self.min.x + self.max.x) as f64 / 2.0,
            (self.min.y + self.max.y) as f64 / 2.0,
        )
    }

    /// Nearest position inside `[min, max]` on both axes.
    pub fn clamp_point(&self, p: &Point2D) -> Point2D {
        Point2D::new(
            p.x.clamp(self.min.x as f64, self.max.x as f64),
            p.y.clamp(self.min.y as f64, self.max.y as f64),
        )
    }

    /// Row/column offset of pixel `p` relative to `min`, if contained.
    pub fn index_of(&self, p: Point2I) -> Option<[usize; 2]> {
        if !self.contains(p) {
            return None;
        }
        Some([(p.y - self.min.y) as usize, (p.x - self.min.x) as usize])
    }
}

impl BitAnd for Box2I {
    type Output = Box2I;

    fn bitand(self, rhs: Box2I) -> Box2I {
        self.intersection(&rhs)
    }
}

impl fmt::Display for Box2I {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Box2I(empty)")
        } else {
            write!(f, "Box2I({}..={})", self.min, self.max)
        }
    }
}
