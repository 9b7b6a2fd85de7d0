//! Rendering of PSF-convolved profiles onto pixel grids.
//!
//! A profile is sampled on a grid padded by the PSF kernel half-size and
//! then discretely convolved with the kernel, so the kernel is applied in
//! the pixel frame of the target image. No extra pixel response is folded
//! in: the PSF kernels handed to the renderer already include it.

use nalgebra::{Matrix2, Vector2};
use ndarray::{Array2, ArrayViewMut2};
use thiserror::Error;

use meter_math::{invert_matrix, SingularMatrixError};
use shared::geom::{Box2I, Point2D};
use shared::image_proc::convolve2d;
use shared::psf::KernelImage;

use crate::jacobian::JacobianWcs;
use crate::profile::Profile;

/// Smallest stamp width handed out by [`good_image_size`].
pub const MIN_STAMP_SIZE: usize = 3;

/// Largest stamp half-width; stamps are clipped to the exposure anyway.
pub const MAX_STAMP_HALF_WIDTH: usize = 1 << 28;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DrawError {
    #[error("target view has shape {shape:?} but bounds {bounds} need {expected:?}")]
    ShapeMismatch {
        shape: (usize, usize),
        expected: (usize, usize),
        bounds: Box2I,
    },

    #[error("pixel scale must be positive and finite, got {0}")]
    InvalidScale(f64),

    #[error("profile extent must be finite, got {0}")]
    InvalidExtent(f64),

    #[error("cannot draw into empty bounds")]
    EmptyBounds,

    #[error("local jacobian is singular: {0}")]
    SingularJacobian(#[from] SingularMatrixError),
}

/// A PSF kernel image treated as a profile in the target image's pixel frame.
#[derive(Debug, Clone)]
pub struct KernelProfile {
    kernel: KernelImage,
    jacobian: JacobianWcs,
    sky_to_pixel: Matrix2<f64>,
}

impl KernelProfile {
    pub fn new(kernel: KernelImage, jacobian: JacobianWcs) -> Result<Self, DrawError> {
        let sky_to_pixel = invert_matrix(jacobian.matrix())?;
        Ok(Self {
            kernel,
            jacobian,
            sky_to_pixel,
        })
    }

    pub fn kernel(&self) -> &KernelImage {
        &self.kernel
    }

    pub fn jacobian(&self) -> &JacobianWcs {
        &self.jacobian
    }

    /// Bilinear lookup at a pixel offset from the kernel centre.
    fn interpolate(&self, dx: f64, dy: f64) -> f64 {
        let array = self.kernel.array();
        let (rows, cols) = array.dim();
        let (half_rows, half_cols) = self.kernel.half_size();

        let x = dx + half_cols as f64;
        let y = dy + half_rows as f64;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let at = |row: f64, col: f64| -> f64 {
            if row < 0.0 || col < 0.0 || row >= rows as f64 || col >= cols as f64 {
                0.0
            } else {
                array[[row as usize, col as usize]]
            }
        };

        at(y0, x0) * (1.0 - fx) * (1.0 - fy)
            + at(y0, x0 + 1.0) * fx * (1.0 - fy)
            + at(y0 + 1.0, x0) * (1.0 - fx) * fy
            + at(y0 + 1.0, x0 + 1.0) * fx * fy
    }
}

impl Profile for KernelProfile {
    fn flux(&self) -> f64 {
        self.kernel.sum()
    }

    fn surface_brightness(&self, u: f64, v: f64) -> f64 {
        let d = self.sky_to_pixel * Vector2::new(u, v);
        self.interpolate(d.x, d.y) / self.jacobian.pixel_area()
    }

    fn max_radius(&self) -> f64 {
        let (half_rows, half_cols) = self.kernel.half_size();
        (half_rows as f64).hypot(half_cols as f64) * self.jacobian.max_linear_scale()
    }
}

/// A profile convolved with a PSF kernel.
#[derive(Debug)]
pub struct Convolution<'a> {
    profile: &'a dyn Profile,
    psf: KernelProfile,
}

/// Pair `profile` with `psf` for rendering.
pub fn convolve(profile: &dyn Profile, psf: KernelProfile) -> Convolution<'_> {
    Convolution { profile, psf }
}

impl<'a> Convolution<'a> {
    pub fn profile(&self) -> &dyn Profile {
        self.profile
    }

    pub fn psf(&self) -> &KernelProfile {
        &self.psf
    }

    pub fn flux(&self) -> f64 {
        self.profile.flux() * self.psf.flux()
    }

    /// Extent of the convolved light in arcseconds.
    pub fn max_radius(&self) -> f64 {
        self.profile.max_radius().hypot(self.psf.max_radius())
    }
}

/// Odd stamp width in pixels that holds the convolved profile.
///
/// `scale` is the smallest linear pixel scale of the local Jacobian in
/// arcseconds, so the stamp is wide enough along the finest pixel axis.
pub fn good_image_size(conv: &Convolution<'_>, scale: f64) -> Result<usize, DrawError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(DrawError::InvalidScale(scale));
    }
    let radius = conv.max_radius();
    if !(radius.is_finite() && radius >= 0.0) {
        return Err(DrawError::InvalidExtent(radius));
    }
    let half = ((radius / scale).ceil() as usize).min(MAX_STAMP_HALF_WIDTH);
    Ok((2 * half + 1).max(MIN_STAMP_SIZE))
}

/// Pixel response applied while drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMethod {
    /// Sample the convolved profile at pixel centres with no extra pixel
    /// convolution.
    #[default]
    NoPixel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOptions {
    /// Accumulate onto existing pixel values instead of overwriting them.
    pub add_to_image: bool,
    /// Profile centre relative to `bounds.true_center()`, in pixels.
    pub offset: Point2D,
    pub method: DrawMethod,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            add_to_image: false,
            offset: Point2D::new(0.0, 0.0),
            method: DrawMethod::NoPixel,
        }
    }
}

/// Render `conv` into `image`, whose pixels cover `bounds`.
///
/// The profile is centred at `bounds.true_center() + options.offset`.
/// Light falling outside `bounds` is discarded.
pub fn draw_image(
    conv: &Convolution<'_>,
    image: &mut ArrayViewMut2<'_, f32>,
    bounds: &Box2I,
    jacobian: &JacobianWcs,
    options: &DrawOptions,
) -> Result<(), DrawError> {
    if bounds.is_empty() {
        return Err(DrawError::EmptyBounds);
    }
    let (rows, cols) = bounds.shape();
    if image.dim() != (rows, cols) {
        return Err(DrawError::ShapeMismatch {
            shape: image.dim(),
            expected: (rows, cols),
            bounds: *bounds,
        });
    }

    let kernel = conv.psf().kernel();
    let (kernel_rows, kernel_cols) = kernel.dim();
    let (half_rows, half_cols) = kernel.half_size();

    // Centre in the padded grid's array coordinates
    let center = bounds.true_center() + options.offset;
    let padded_center = Point2D::new(
        center.x - bounds.min.x as f64 + half_cols as f64,
        center.y - bounds.min.y as f64 + half_rows as f64,
    );

    let mut padded = Array2::<f64>::zeros((rows + kernel_rows - 1, cols + kernel_cols - 1));
    match options.method {
        DrawMethod::NoPixel => conv.profile().sample(&mut padded, padded_center, jacobian),
    }

    let rendered = convolve2d(&padded.view(), &kernel.array().view());

    if options.add_to_image {
        image.zip_mut_with(&rendered, |pixel, &value| *pixel += value as f32);
    } else {
        image.zip_mut_with(&rendered, |pixel, &value| *pixel = value as f32);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DeltaFunction, Gaussian};
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use shared::geom::Point2I;

    fn gaussian_kernel(sigma: f64, radius: usize) -> KernelImage {
        let size = 2 * radius + 1;
        let c = radius as f64;
        let mut array = Array2::from_shape_fn((size, size), |(r, col)| {
            let dx = col as f64 - c;
            let dy = r as f64 - c;
            (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        });
        let total = array.sum();
        array.mapv_inplace(|v| v / total);
        KernelImage::new(array).unwrap()
    }

    fn delta_kernel() -> KernelImage {
        let mut array = Array2::zeros((3, 3));
        array[[1, 1]] = 1.0;
        KernelImage::new(array).unwrap()
    }

    #[test]
    fn test_kernel_profile_extent() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let psf = KernelProfile::new(gaussian_kernel(1.5, 7), jac).unwrap();
        assert_relative_eq!(psf.flux(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(psf.max_radius(), (98.0_f64).sqrt() * 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_kernel_profile_surface_brightness() {
        let jac = JacobianWcs::from_pixel_scale(0.5);
        let kernel = gaussian_kernel(1.0, 4);
        let peak = kernel.array()[[4, 4]];
        let psf = KernelProfile::new(kernel, jac).unwrap();

        assert_relative_eq!(psf.surface_brightness(0.0, 0.0), peak / 0.25, epsilon = 1e-12);
        // Beyond the kernel footprint
        assert_eq!(psf.surface_brightness(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_kernel_profile_rejects_singular_jacobian() {
        let jac = JacobianWcs::new(1.0, 2.0, 2.0, 4.0);
        assert!(matches!(
            KernelProfile::new(delta_kernel(), jac),
            Err(DrawError::SingularJacobian(_))
        ));
    }

    #[test]
    fn test_good_image_size_is_odd() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let gauss = Gaussian::new(1.0, 0.5).unwrap();
        let psf = KernelProfile::new(gaussian_kernel(1.5, 7), jac).unwrap();
        let conv = convolve(&gauss, psf);

        let size = good_image_size(&conv, 0.2).unwrap();
        let expected_radius = gauss.max_radius().hypot((98.0_f64).sqrt() * 0.2);
        assert_eq!(size, 2 * (expected_radius / 0.2).ceil() as usize + 1);
        assert_eq!(size % 2, 1);
    }

    #[test]
    fn test_good_image_size_minimum() {
        let jac = JacobianWcs::from_pixel_scale(1.0);
        let point = DeltaFunction::new(1.0).unwrap();
        let one_pixel = KernelImage::new(Array2::from_elem((1, 1), 1.0)).unwrap();
        let conv = convolve(&point, KernelProfile::new(one_pixel, jac).unwrap());

        assert_eq!(good_image_size(&conv, 1.0).unwrap(), MIN_STAMP_SIZE);
        assert!(matches!(
            good_image_size(&conv, 0.0),
            Err(DrawError::InvalidScale(_))
        ));
    }

    #[derive(Debug)]
    struct Unbounded;

    impl Profile for Unbounded {
        fn flux(&self) -> f64 {
            1.0
        }

        fn surface_brightness(&self, _u: f64, _v: f64) -> f64 {
            0.0
        }

        fn max_radius(&self) -> f64 {
            f64::INFINITY
        }
    }

    #[test]
    fn test_good_image_size_huge_extent() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let wide = Gaussian::new(1.0, 1e300).unwrap();
        let conv = convolve(&wide, KernelProfile::new(delta_kernel(), jac).unwrap());
        assert_eq!(
            good_image_size(&conv, 0.2).unwrap(),
            2 * MAX_STAMP_HALF_WIDTH + 1
        );

        let conv = convolve(&Unbounded, KernelProfile::new(delta_kernel(), jac).unwrap());
        assert!(matches!(
            good_image_size(&conv, 0.2),
            Err(DrawError::InvalidExtent(_))
        ));
    }

    #[test]
    fn test_draw_point_conserves_flux() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let point = DeltaFunction::new(500.0).unwrap();
        let conv = convolve(&point, KernelProfile::new(gaussian_kernel(1.2, 6), jac).unwrap());

        let bounds = Box2I::from_dimensions(Point2I::new(100, 200), 25, 25);
        let mut image = Array2::<f32>::zeros(bounds.shape());
        draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &DrawOptions::default()).unwrap();

        let total: f64 = image.iter().map(|&v| v as f64).sum();
        assert_relative_eq!(total, 500.0, max_relative = 1e-5);

        // Peak at the box centre
        let peak = image
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap();
        assert_eq!(peak, (12, 12));
    }

    #[test]
    fn test_draw_offset_moves_light() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let point = DeltaFunction::new(1.0).unwrap();
        let conv = convolve(&point, KernelProfile::new(delta_kernel(), jac).unwrap());

        let bounds = Box2I::from_dimensions(Point2I::new(0, 0), 9, 9);
        let mut image = Array2::<f32>::zeros(bounds.shape());
        let options = DrawOptions {
            offset: Point2D::new(2.0, -3.0),
            ..DrawOptions::default()
        };
        draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &options).unwrap();

        assert_relative_eq!(image[[1, 6]], 1.0);
        assert_relative_eq!(image.sum(), 1.0);
    }

    #[test]
    fn test_asymmetric_kernel_shifts_light() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let point = DeltaFunction::new(1.0).unwrap();
        let mut array = Array2::zeros((3, 3));
        array[[1, 2]] = 1.0;
        let conv = convolve(
            &point,
            KernelProfile::new(KernelImage::new(array).unwrap(), jac).unwrap(),
        );

        let bounds = Box2I::from_dimensions(Point2I::new(0, 0), 5, 5);
        let mut image = Array2::<f32>::zeros(bounds.shape());
        draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &DrawOptions::default()).unwrap();

        // Kernel mass one column right of centre moves the point one column right
        assert_relative_eq!(image[[2, 3]], 1.0);
    }

    #[test]
    fn test_draw_add_versus_overwrite() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let point = DeltaFunction::new(2.0).unwrap();
        let conv = convolve(&point, KernelProfile::new(delta_kernel(), jac).unwrap());

        let bounds = Box2I::from_dimensions(Point2I::new(-2, -2), 5, 5);
        let mut image = Array2::<f32>::from_elem(bounds.shape(), 1.0);

        let add = DrawOptions {
            add_to_image: true,
            ..DrawOptions::default()
        };
        draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &add).unwrap();
        assert_relative_eq!(image[[2, 2]], 3.0);
        assert_relative_eq!(image[[0, 0]], 1.0);

        draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &DrawOptions::default()).unwrap();
        assert_relative_eq!(image[[2, 2]], 2.0);
        assert_relative_eq!(image[[0, 0]], 0.0);
    }

    #[test]
    fn test_draw_rejects_mismatched_view() {
        let jac = JacobianWcs::from_pixel_scale(0.2);
        let point = DeltaFunction::new(1.0).unwrap();
        let conv = convolve(&point, KernelProfile::new(delta_kernel(), jac).unwrap());

        let bounds = Box2I::from_dimensions(Point2I::new(0, 0), 5, 5);
        let mut image = Array2::<f32>::zeros((4, 5));
        assert!(matches!(
            draw_image(&conv, &mut image.view_mut(), &bounds, &jac, &DrawOptions::default()),
            Err(DrawError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            draw_image(&conv, &mut image.view_mut(), &Box2I::empty(), &jac, &DrawOptions::default()),
            Err(DrawError::EmptyBounds)
        ));
    }
}
