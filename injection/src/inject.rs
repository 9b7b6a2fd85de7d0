//! Injection of synthetic sources into an exposure.
//!
//! Each object is placed at the pixel position its sky coordinate maps to,
//! convolved with the exposure PSF at that position, drawn additively into
//! the image and flagged in the injection mask plane. Objects that cannot be
//! placed reliably are skipped, including those the WCS cannot map to a
//! pixel; other collaborator failures abort the call with the pixels drawn
//! so far left in place.

use std::fmt;

use log::{debug, info};
use thiserror::Error;

use shared::exposure::{Exposure, ExposureError};
use shared::geom::{Box2I, Point2D, SpherePoint};
use shared::mask::{MaskError, MaskPixel};
use shared::psf::{KernelImage, Psf, PsfError};
use shared::wcs::{SkyWcs, WcsError};

use crate::config::{ConfigError, InjectionConfig};
use crate::jacobian::JacobianWcs;
use crate::profile::Profile;
use crate::render::{
    convolve, draw_image, good_image_size, DrawError, DrawMethod, DrawOptions, KernelProfile,
};

/// Mask plane set on every pixel an injected object was drawn into.
pub const FAKE_MASK_PLANE: &str = "FAKE";

/// Aperture radius in pixels used to normalize PSF kernels.
pub const DEFAULT_CALIB_FLUX_RADIUS: f64 = 12.0;

/// Local pixel scales outside `[MIN, MAX] * nominal` mark a multivalued WCS.
pub const MIN_SCALE_RATIO: f64 = 0.5;
pub const MAX_SCALE_RATIO: f64 = 2.0;

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("mask error: {0}")]
    Mask(#[from] MaskError),

    #[error("WCS error: {0}")]
    Wcs(#[from] WcsError),

    #[error("PSF error: {0}")]
    Psf(#[from] PsfError),

    #[error("exposure error: {0}")]
    Exposure(#[from] ExposureError),

    #[error("rendering error: {0}")]
    Draw(#[from] DrawError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Why an object was left out of the exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// WCS has no single pixel position for the object
    NoPixelPosition,
    /// Local WCS pixel scale too far from the nominal scale
    ScaleMismatch,
    /// PSF undefined at the object and at the nearest in-bounds position
    PsfUnavailable,
    /// Stamp does not overlap the exposure
    OffImage,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::NoPixelPosition => write!(f, "no pixel position"),
            SkipReason::ScaleMismatch => write!(f, "local pixel scale mismatch"),
            SkipReason::PsfUnavailable => write!(f, "PSF unavailable"),
            SkipReason::OffImage => write!(f, "stamp off image"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Drawn into the exposure over `bbox`
    Injected { bbox: Box2I },
    Skipped(SkipReason),
}

impl InjectionOutcome {
    pub fn is_injected(&self) -> bool {
        matches!(self, InjectionOutcome::Injected { .. })
    }
}

/// Values fixed for the duration of one injection call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectionContext {
    bitmask: MaskPixel,
    nominal_scale: f64,
    calib_flux_radius: f64,
}

impl InjectionContext {
    /// Register the injection mask plane and capture the nominal pixel scale.
    pub fn prepare(
        exposure: &mut Exposure,
        config: &InjectionConfig,
    ) -> Result<Self, InjectionError> {
        config.validate()?;

        let mask = exposure.mask_mut();
        mask.add_mask_plane(&config.mask_plane_name)?;
        let bitmask = mask.plane_bitmask(&config.mask_plane_name)?;
        info!("Adding mask plane with bitmask {bitmask}");

        Ok(Self {
            bitmask,
            nominal_scale: exposure.wcs().pixel_scale(),
            calib_flux_radius: config.calib_flux_radius,
        })
    }

    pub fn bitmask(&self) -> MaskPixel {
        self.bitmask
    }

    /// Arcseconds per pixel.
    pub fn nominal_scale(&self) -> f64 {
        self.nominal_scale
    }

    pub fn calib_flux_radius(&self) -> f64 {
        self.calib_flux_radius
    }

    fn accepts_scale(&self, local_scale: f64) -> bool {
        local_scale >= self.nominal_scale * MIN_SCALE_RATIO
            && local_scale <= self.nominal_scale * MAX_SCALE_RATIO
    }
}

/// Inject `objects` into `exposure` in order.
///
/// `objects` yields `(sky position, profile)` pairs and is consumed once.
/// Profile fluxes are in the units of a PSF normalized to unit flux within
/// `calib_flux_radius` pixels.
pub fn inject_sources<I, P>(
    exposure: &mut Exposure,
    objects: I,
    calib_flux_radius: f64,
) -> Result<(), InjectionError>
where
    I: IntoIterator<Item = (SpherePoint, P)>,
    P: Profile,
{
    let config = InjectionConfig {
        calib_flux_radius,
        ..InjectionConfig::default()
    };
    inject_sources_with_config(exposure, objects, &config)?;
    Ok(())
}

/// Like [`inject_sources`], with every setting taken from `config`.
///
/// Returns the outcome for each object in input order.
pub fn inject_sources_with_config<I, P>(
    exposure: &mut Exposure,
    objects: I,
    config: &InjectionConfig,
) -> Result<Vec<InjectionOutcome>, InjectionError>
where
    I: IntoIterator<Item = (SpherePoint, P)>,
    P: Profile,
{
    let context = InjectionContext::prepare(exposure, config)?;

    objects
        .into_iter()
        .map(|(position, profile)| inject_source(exposure, &context, &position, &profile))
        .collect()
}

/// Inject a single object using a prepared context.
pub fn inject_source(
    exposure: &mut Exposure,
    context: &InjectionContext,
    position: &SpherePoint,
    profile: &dyn Profile,
) -> Result<InjectionOutcome, InjectionError> {
    let wcs = exposure.wcs_handle();
    let psf = exposure.psf_handle();
    let bbox = exposure.bbox();

    let Some((pt, jacobian)) = locate(wcs.as_ref(), position)? else {
        return Ok(InjectionOutcome::Skipped(SkipReason::NoPixelPosition));
    };
    let posi = pt.floor();
    debug!("Adding fake source at {pt}");

    let local_scale = jacobian.pixel_area().sqrt();
    if !context.accepts_scale(local_scale) {
        debug!(
            "Local pixel scale {local_scale:.4} arcsec at {pt} is outside the accepted range around {:.4}; skipping",
            context.nominal_scale()
        );
        return Ok(InjectionOutcome::Skipped(SkipReason::ScaleMismatch));
    }

    let Some((mut kernel, psf_position)) = evaluate_psf(psf.as_ref(), &pt, &bbox)? else {
        info!("Cannot compute Psf for object at {pt}; skipping");
        return Ok(InjectionOutcome::Skipped(SkipReason::PsfUnavailable));
    };

    let aperture_flux = psf.compute_aperture_flux(context.calib_flux_radius(), &psf_position)?;
    kernel.normalize_by(aperture_flux);

    let conv = convolve(profile, KernelProfile::new(kernel, jacobian)?);
    let stamp_size = good_image_size(&conv, jacobian.min_linear_scale())?;
    let sub_bounds = Box2I::from_point(posi).dilated_by((stamp_size / 2) as i32) & bbox;

    if sub_bounds.is_empty() {
        return Ok(InjectionOutcome::Skipped(SkipReason::OffImage));
    }

    let options = DrawOptions {
        add_to_image: true,
        offset: pt - sub_bounds.true_center(),
        method: DrawMethod::NoPixel,
    };
    {
        let mut view = exposure.sub_image_mut(&sub_bounds)?;
        draw_image(&conv, &mut view, &sub_bounds, &jacobian, &options)?;
    }
    exposure.or_mask(&sub_bounds, context.bitmask())?;

    Ok(InjectionOutcome::Injected { bbox: sub_bounds })
}

/// Pixel position and local Jacobian of `position`.
///
/// Returns `None` when the WCS is undefined there: behind the projection,
/// in a folded region, or mapped to a non-finite pixel.
fn locate(
    wcs: &dyn SkyWcs,
    position: &SpherePoint,
) -> Result<Option<(Point2D, JacobianWcs)>, WcsError> {
    let located = wcs.sky_to_pixel(position).and_then(|pt| {
        if !pt.is_finite() {
            return Err(WcsError::NonFinite { x: pt.x, y: pt.y });
        }
        let jacobian = JacobianWcs::from_matrix(wcs.linearize_pixel_to_sky(position)?);
        Ok((pt, jacobian))
    });

    match located {
        Ok(found) => Ok(Some(found)),
        Err(err) if err.is_undefined_position() => {
            info!("Cannot map object at {position} to a pixel ({err}); skipping");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Kernel at `pt`, retrying once at the nearest position inside `bbox`.
///
/// Returns the kernel with the position it was evaluated at, or `None` when
/// the PSF is undefined at both. Errors other than an invalid position are
/// passed through.
fn evaluate_psf(
    psf: &dyn Psf,
    pt: &Point2D,
    bbox: &Box2I,
) -> Result<Option<(KernelImage, Point2D)>, PsfError> {
    match psf.compute_kernel_image(pt) {
        Ok(kernel) => Ok(Some((kernel, *pt))),
        Err(err) if err.is_invalid_position() => {
            let clamped = bbox.clamp_point(pt);
            if clamped == *pt {
                return Ok(None);
            }
            match psf.compute_kernel_image(&clamped) {
                Ok(kernel) => Ok(Some((kernel, clamped))),
                Err(err) if err.is_invalid_position() => Ok(None),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::geom::Point2I;
    use shared::psf::GaussianPsf;
    use shared::wcs::TanWcs;
    use std::sync::Arc;

    use crate::profile::DeltaFunction;
    use meter_math::SingularMatrixError;

    fn exposure(psf: GaussianPsf) -> Exposure {
        let bbox = Box2I::from_dimensions(Point2I::new(0, 0), 80, 80);
        let wcs = TanWcs::from_pixel_scale(
            SpherePoint::from_degrees(30.0, -10.0),
            bbox.true_center(),
            0.2,
            0.0,
        )
        .unwrap();
        Exposure::new(bbox, Arc::new(wcs), Arc::new(psf)).unwrap()
    }

    #[test]
    fn test_evaluate_psf_in_domain() {
        let psf = GaussianPsf::new(1.5);
        let bbox = Box2I::from_dimensions(Point2I::new(0, 0), 10, 10);
        let (kernel, at) = evaluate_psf(&psf, &Point2D::new(3.2, 4.7), &bbox)
            .unwrap()
            .unwrap();
        assert_eq!(at, Point2D::new(3.2, 4.7));
        assert_relative_eq!(kernel.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluate_psf_clamps_once() {
        let bbox = Box2I::from_dimensions(Point2I::new(0, 0), 10, 10);
        let psf = GaussianPsf::new(1.5).with_valid_region(bbox);

        let (_, at) = evaluate_psf(&psf, &Point2D::new(-3.0, 12.5), &bbox)
            .unwrap()
            .unwrap();
        assert_eq!(at, Point2D::new(0.0, 9.0));
    }

    #[test]
    fn test_evaluate_psf_gives_up_inside_bbox() {
        let bbox = Box2I::from_dimensions(Point2I::new(0, 0), 10, 10);
        let valid = Box2I::from_dimensions(Point2I::new(0, 0), 5, 5);
        let psf = GaussianPsf::new(1.5).with_valid_region(valid);

        // Already inside bbox, so clamping changes nothing
        assert!(evaluate_psf(&psf, &Point2D::new(7.0, 7.0), &bbox)
            .unwrap()
            .is_none());
        // Clamped into bbox but still outside the PSF domain
        assert!(evaluate_psf(&psf, &Point2D::new(20.0, 20.0), &bbox)
            .unwrap()
            .is_none());
    }

    #[derive(Debug)]
    struct BrokenPsf;

    impl Psf for BrokenPsf {
        fn compute_kernel_image(&self, _position: &Point2D) -> Result<KernelImage, PsfError> {
            Err(PsfError::InvalidKernel("model not fitted".to_string()))
        }

        fn compute_aperture_flux(&self, radius: f64, _position: &Point2D) -> Result<f64, PsfError> {
            Err(PsfError::InvalidRadius(radius))
        }
    }

    #[test]
    fn test_evaluate_psf_passes_other_errors() {
        let bbox = Box2I::from_dimensions(Point2I::new(0, 0), 10, 10);
        assert!(matches!(
            evaluate_psf(&BrokenPsf, &Point2D::new(1.0, 1.0), &bbox),
            Err(PsfError::InvalidKernel(_))
        ));
    }

    /// WCS that maps every sky point to the same fixed answer.
    #[derive(Debug)]
    struct FixedWcs(Result<Point2D, WcsError>);

    impl SkyWcs for FixedWcs {
        fn sky_to_pixel(&self, _sky: &SpherePoint) -> Result<Point2D, WcsError> {
            self.0.clone()
        }

        fn pixel_to_sky(&self, _pixel: &Point2D) -> Result<SpherePoint, WcsError> {
            Ok(SpherePoint::from_degrees(30.0, -10.0))
        }

        fn pixel_scale(&self) -> f64 {
            0.2
        }
    }

    #[test]
    fn test_locate_treats_undefined_positions_as_missing() {
        let sky = SpherePoint::from_degrees(30.0, -10.0);

        let nan = FixedWcs(Ok(Point2D::new(f64::NAN, 4.0)));
        assert!(locate(&nan, &sky).unwrap().is_none());

        let folded = FixedWcs(Err(WcsError::NoSolution { radius: 900.0 }));
        assert!(locate(&folded, &sky).unwrap().is_none());

        let exp = exposure(GaussianPsf::new(1.5));
        let antipode = SpherePoint::from_degrees(210.0, 10.0);
        assert!(locate(exp.wcs(), &antipode).unwrap().is_none());

        let centre = exp.wcs().pixel_to_sky(&Point2D::new(40.0, 40.0)).unwrap();
        let (pt, jacobian) = locate(exp.wcs(), &centre).unwrap().unwrap();
        assert_relative_eq!(pt.x, 40.0, epsilon = 1e-6);
        assert_relative_eq!(jacobian.pixel_area(), 0.04, max_relative = 1e-6);
    }

    #[test]
    fn test_locate_passes_malformed_wcs_errors() {
        let broken = FixedWcs(Err(WcsError::SingularCd(SingularMatrixError {
            determinant: 0.0,
        })));
        let sky = SpherePoint::from_degrees(30.0, -10.0);
        assert!(matches!(
            locate(&broken, &sky),
            Err(WcsError::SingularCd(_))
        ));
    }

    #[test]
    fn test_prepare_registers_plane_once() {
        let mut exp = exposure(GaussianPsf::new(1.5));
        let config = InjectionConfig::default();

        let first = InjectionContext::prepare(&mut exp, &config).unwrap();
        let planes = exp.mask().num_planes();
        let second = InjectionContext::prepare(&mut exp, &config).unwrap();

        assert_eq!(first.bitmask(), second.bitmask());
        assert_eq!(exp.mask().num_planes(), planes);
        assert_relative_eq!(first.nominal_scale(), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_scale_gate_bounds() {
        let context = InjectionContext {
            bitmask: 1,
            nominal_scale: 0.2,
            calib_flux_radius: 12.0,
        };
        assert!(context.accepts_scale(0.1));
        assert!(context.accepts_scale(0.4));
        assert!(!context.accepts_scale(0.099));
        assert!(!context.accepts_scale(0.401));
        assert!(!context.accepts_scale(f64::NAN));
    }

    #[test]
    fn test_inject_source_reports_stamp() {
        let mut exp = exposure(GaussianPsf::new(1.5));
        let context = InjectionContext::prepare(&mut exp, &InjectionConfig::default()).unwrap();
        let centre = exp.wcs().pixel_to_sky(&Point2D::new(40.0, 40.0)).unwrap();
        let star = DeltaFunction::new(1000.0).unwrap();

        let outcome = inject_source(&mut exp, &context, &centre, &star).unwrap();
        let InjectionOutcome::Injected { bbox } = outcome else {
            panic!("expected injection, got {outcome:?}");
        };
        assert!(bbox.contains(Point2I::new(40, 40)));
        assert_eq!(exp.mask().count_set(context.bitmask()), bbox.area());
    }
}
