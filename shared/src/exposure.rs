//! Exposures: pixel data, mask planes, WCS and PSF bundled together.

use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};
use thiserror::Error;

use crate::geom::{Box2I, Point2I};
use crate::mask::{Mask, MaskError, MaskPixel};
use crate::psf::Psf;
use crate::wcs::SkyWcs;

/// Image pixel type.
pub type ImagePixel = f32;

/// Errors from exposure construction and region access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExposureError {
    #[error("region {region} is not contained in the exposure bounds {bbox}")]
    OutsideImage { region: Box2I, bbox: Box2I },

    #[error("image shape {shape:?} does not match bounding box {bbox}")]
    ShapeMismatch { shape: (usize, usize), bbox: Box2I },

    #[error("exposure must have at least one pixel")]
    EmptyBounds,

    #[error(transparent)]
    Mask(#[from] MaskError),
}

/// Image and mask arrays sharing one bounding box.
///
/// Arrays are indexed `[y - min.y, x - min.x]`.
#[derive(Debug, Clone)]
pub struct MaskedImage {
    image: Array2<ImagePixel>,
    mask: Mask,
    bbox: Box2I,
}

impl MaskedImage {
    /// Zero-filled image and mask covering `bbox`.
    pub fn new(bbox: Box2I) -> Result<Self, ExposureError> {
        if bbox.is_empty() {
            return Err(ExposureError::EmptyBounds);
        }
        Ok(Self {
            image: Array2::zeros(bbox.shape()),
            mask: Mask::new(bbox),
            bbox,
        })
    }

    /// Wrap existing pixel data whose lower-left pixel is `xy0`.
    pub fn from_image(image: Array2<ImagePixel>, xy0: Point2I) -> Result<Self, ExposureError> {
        let (rows, cols) = image.dim();
        let bbox = Box2I::from_dimensions(xy0, cols, rows);
        if bbox.is_empty() {
            return Err(ExposureError::EmptyBounds);
        }
        Ok(Self {
            image,
            mask: Mask::new(bbox),
            bbox,
        })
    }

    pub fn bbox(&self) -> Box2I {
        self.bbox
    }

    pub fn image(&self) -> &Array2<ImagePixel> {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Array2<ImagePixel> {
        &mut self.image
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut Mask {
        &mut self.mask
    }

    fn region_slice(&self, region: &Box2I) -> Result<(usize, usize, usize, usize), ExposureError> {
        if region.is_empty() || !self.bbox.contains_box(region) {
            return Err(ExposureError::OutsideImage {
                region: *region,
                bbox: self.bbox,
            });
        }
        let y0 = (region.min.y - self.bbox.min.y) as usize;
        let x0 = (region.min.x - self.bbox.min.x) as usize;
        Ok((y0, y0 + region.height(), x0, x0 + region.width()))
    }

    /// Read-only view of the pixels in `region`.
    pub fn sub_image(&self, region: &Box2I) -> Result<ArrayView2<'_, ImagePixel>, ExposureError> {
        let (y0, y1, x0, x1) = self.region_slice(region)?;
        Ok(self.image.slice(s![y0..y1, x0..x1]))
    }

    /// Mutable view of the pixels in `region`.
    pub fn sub_image_mut(
        &mut self,
        region: &Box2I,
    ) -> Result<ArrayViewMut2<'_, ImagePixel>, ExposureError> {
        let (y0, y1, x0, x1) = self.region_slice(region)?;
        Ok(self.image.slice_mut(s![y0..y1, x0..x1]))
    }

    pub fn pixel(&self, p: Point2I) -> Option<ImagePixel> {
        self.bbox.index_of(p).map(|idx| self.image[idx])
    }

    pub fn mask_pixel(&self, p: Point2I) -> Option<MaskPixel> {
        self.bbox.index_of(p).map(|idx| self.mask.array()[idx])
    }
}

/// A calibrated image with its WCS and PSF.
///
/// WCS and PSF are shared handles; pixel and mask data are owned.
#[derive(Debug, Clone)]
pub struct Exposure {
    masked_image: MaskedImage,
    wcs: Arc<dyn SkyWcs>,
    psf: Arc<dyn Psf>,
}

impl Exposure {
    /// Zero-filled exposure covering `bbox`.
    pub fn new(
        bbox: Box2I,
        wcs: Arc<dyn SkyWcs>,
        psf: Arc<dyn Psf>,
    ) -> Result<Self, ExposureError> {
        Ok(Self {
            masked_image: MaskedImage::new(bbox)?,
            wcs,
            psf,
        })
    }

    pub fn from_masked_image(
        masked_image: MaskedImage,
        wcs: Arc<dyn SkyWcs>,
        psf: Arc<dyn Psf>,
    ) -> Self {
        Self {
            masked_image,
            wcs,
            psf,
        }
    }

    pub fn bbox(&self) -> Box2I {
        self.masked_image.bbox()
    }

    pub fn wcs(&self) -> &dyn SkyWcs {
        self.wcs.as_ref()
    }

    pub fn psf(&self) -> &dyn Psf {
        self.psf.as_ref()
    }

    pub fn wcs_handle(&self) -> Arc<dyn SkyWcs> {
        Arc::clone(&self.wcs)
    }

    pub fn psf_handle(&self) -> Arc<dyn Psf> {
        Arc::clone(&self.psf)
    }

    pub fn set_psf(&mut self, psf: Arc<dyn Psf>) {
        self.psf = psf;
    }

    pub fn set_wcs(&mut self, wcs: Arc<dyn SkyWcs>) {
        self.wcs = wcs;
    }

    pub fn masked_image(&self) -> &MaskedImage {
        &self.masked_image
    }

    pub fn image(&self) -> &Array2<ImagePixel> {
        self.masked_image.image()
    }

    pub fn image_mut(&mut self) -> &mut Array2<ImagePixel> {
        self.masked_image.image_mut()
    }

    pub fn mask(&self) -> &Mask {
        self.masked_image.mask()
    }

    pub fn mask_mut(&mut self) -> &mut Mask {
        self.masked_image.mask_mut()
    }

    pub fn sub_image_mut(
        &mut self,
        region: &Box2I,
    ) -> Result<ArrayViewMut2<'_, ImagePixel>, ExposureError> {
        self.masked_image.sub_image_mut(region)
    }

    /// OR `bits` into the mask over `region`.
    pub fn or_mask(&mut self, region: &Box2I, bits: MaskPixel) -> Result<(), ExposureError> {
        Ok(self.masked_image.mask_mut().or_region(region, bits)?)
    }

    pub fn pixel(&self, p: Point2I) -> Option<ImagePixel> {
        self.masked_image.pixel(p)
    }

    pub fn mask_pixel(&self, p: Point2I) -> Option<MaskPixel> {
        self.masked_image.mask_pixel(p)
    }

    /// Sum of all pixel values, accumulated in double precision.
    pub fn image_sum(&self) -> f64 {
        self.image().iter().map(|&v| v as f64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Point2D, SpherePoint};
    use crate::psf::GaussianPsf;
    use crate::wcs::TanWcs;

    fn test_exposure() -> Exposure {
        let bbox = Box2I::from_dimensions(Point2I::new(100, 50), 40, 30);
        let wcs = TanWcs::from_pixel_scale(
            SpherePoint::from_degrees(30.0, 10.0),
            Point2D::new(120.0, 65.0),
            0.2,
            0.0,
        )
        .unwrap();
        Exposure::new(bbox, Arc::new(wcs), Arc::new(GaussianPsf::new(1.5))).unwrap()
    }

    #[test]
    fn test_new_exposure_shape() {
        let exposure = test_exposure();
        assert_eq!(exposure.image().dim(), (30, 40));
        assert_eq!(exposure.mask().array().dim(), (30, 40));
        assert_eq!(exposure.image_sum(), 0.0);
    }

    #[test]
    fn test_sub_image_uses_parent_coordinates() {
        let mut exposure = test_exposure();
        let region = Box2I::new(Point2I::new(105, 52), Point2I::new(107, 53));
        exposure.sub_image_mut(&region).unwrap().fill(2.0);

        assert_eq!(exposure.pixel(Point2I::new(105, 52)), Some(2.0));
        assert_eq!(exposure.pixel(Point2I::new(107, 53)), Some(2.0));
        assert_eq!(exposure.pixel(Point2I::new(108, 53)), Some(0.0));
        assert_eq!(exposure.image()[[2, 5]], 2.0);
        assert_eq!(exposure.image_sum(), 12.0);
    }

    #[test]
    fn test_sub_image_outside() {
        let mut exposure = test_exposure();
        let region = Box2I::new(Point2I::new(95, 52), Point2I::new(107, 53));
        assert!(matches!(
            exposure.sub_image_mut(&region),
            Err(ExposureError::OutsideImage { .. })
        ));
        assert!(exposure.sub_image_mut(&Box2I::empty()).is_err());
    }

    #[test]
    fn test_or_mask() {
        let mut exposure = test_exposure();
        let bit = exposure.mask_mut().add_mask_plane("FAKE").unwrap();
        let bits = 1 << bit;
        let region = Box2I::new(Point2I::new(110, 60), Point2I::new(111, 61));

        exposure.or_mask(&region, bits).unwrap();

        assert_eq!(exposure.mask_pixel(Point2I::new(110, 60)), Some(bits));
        assert_eq!(exposure.mask_pixel(Point2I::new(112, 60)), Some(0));
        assert_eq!(exposure.mask().count_set(bits), 4);
    }

    #[test]
    fn test_from_image() {
        let image = Array2::from_elem((3, 4), 1.5_f32);
        let masked = MaskedImage::from_image(image, Point2I::new(-2, 7)).unwrap();
        assert_eq!(
            masked.bbox(),
            Box2I::new(Point2I::new(-2, 7), Point2I::new(1, 9))
        );
        assert_eq!(masked.pixel(Point2I::new(1, 9)), Some(1.5));
    }

    #[test]
    fn test_empty_bounds_rejected() {
        assert_eq!(
            MaskedImage::new(Box2I::empty()).unwrap_err(),
            ExposureError::EmptyBounds
        );
    }
}
