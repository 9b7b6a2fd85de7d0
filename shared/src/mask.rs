//! Bitmask planes attached to an image.
//!
//! Each named plane owns one bit of a `u32` mask pixel. Planes are
//! registered once and keep their bit for the lifetime of the mask.

use std::collections::BTreeMap;

use log::debug;
use ndarray::{s, Array2};
use thiserror::Error;

use crate::geom::Box2I;

/// Mask pixel type.
pub type MaskPixel = u32;

/// Maximum number of planes a mask can hold.
pub const MAX_MASK_PLANES: usize = MaskPixel::BITS as usize;

/// Planes every new mask starts with, in bit order.
pub const DEFAULT_MASK_PLANES: [&str; 9] = [
    "BAD",
    "SAT",
    "INTRP",
    "CR",
    "EDGE",
    "DETECTED",
    "DETECTED_NEGATIVE",
    "SUSPECT",
    "NO_DATA",
];

/// Errors from mask plane bookkeeping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskError {
    #[error("mask plane '{0}' is not defined")]
    UnknownPlane(String),

    #[error("cannot add mask plane '{name}': all 32 mask bits are in use")]
    TooManyPlanes { name: String },

    #[error("invalid mask plane name '{0}'")]
    InvalidName(String),

    #[error("region {region} is outside the mask bounds {bbox}")]
    OutsideMask { region: Box2I, bbox: Box2I },
}

/// Integer mask image plus its plane dictionary.
#[derive(Debug, Clone)]
pub struct Mask {
    array: Array2<MaskPixel>,
    bbox: Box2I,
    planes: BTreeMap<String, u8>,
}

impl Mask {
    /// Zeroed mask covering `bbox` with the default planes registered.
    pub fn new(bbox: Box2I) -> Self {
        let planes = DEFAULT_MASK_PLANES
            .iter()
            .enumerate()
            .map(|(bit, name)| (name.to_string(), bit as u8))
            .collect();

        Self {
            array: Array2::zeros(bbox.shape()),
            bbox,
            planes,
        }
    }

    pub fn bbox(&self) -> Box2I {
        self.bbox
    }

    pub fn array(&self) -> &Array2<MaskPixel> {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut Array2<MaskPixel> {
        &mut self.array
    }

    /// Register `name` and return its bit index.
    ///
    /// Registering an existing plane is a no-op that returns the bit it
    /// already owns.
    pub fn add_mask_plane(&mut self, name: &str) -> Result<u8, MaskError> {
        if name.trim().is_empty() {
            return Err(MaskError::InvalidName(name.to_string()));
        }
        if let Some(&bit) = self.planes.get(name) {
            return Ok(bit);
        }

        let bit = (0..MAX_MASK_PLANES as u8)
            .find(|b| !self.planes.values().any(|used| used == b))
            .ok_or_else(|| MaskError::TooManyPlanes {
                name: name.to_string(),
            })?;

        self.planes.insert(name.to_string(), bit);
        debug!("Registered mask plane {name} at bit {bit}");
        Ok(bit)
    }

    /// Bit index owned by `name`.
    pub fn plane_bit(&self, name: &str) -> Result<u8, MaskError> {
        self.planes
            .get(name)
            .copied()
            .ok_or_else(|| MaskError::UnknownPlane(name.to_string()))
    }

    /// Bitmask value (`1 << bit`) for `name`.
    pub fn plane_bitmask(&self, name: &str) -> Result<MaskPixel, MaskError> {
        Ok(1 << self.plane_bit(name)?)
    }

    pub fn has_plane(&self, name: &str) -> bool {
        self.planes.contains_key(name)
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Plane names ordered by bit.
    pub fn plane_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, u8)> = self
            .planes
            .iter()
            .map(|(name, &bit)| (name.as_str(), bit))
            .collect();
        names.sort_by_key(|&(_, bit)| bit);
        names.into_iter().map(|(name, _)| name).collect()
    }

    /// OR `bits` into every pixel of `region`.
    pub fn or_region(&mut self, region: &Box2I, bits: MaskPixel) -> Result<(), MaskError> {
        if region.is_empty() {
            return Ok(());
        }
        if !self.bbox.contains_box(region) {
            return Err(MaskError::OutsideMask {
                region: *region,
                bbox: self.bbox,
            });
        }

        let y0 = (region.min.y - self.bbox.min.y) as usize;
        let x0 = (region.min.x - self.bbox.min.x) as usize;
        self.array
            .slice_mut(s![y0..y0 + region.height(), x0..x0 + region.width()])
            .mapv_inplace(|v| v | bits);

        Ok(())
    }

    /// Number of pixels with any of `bits` set.
    pub fn count_set(&self, bits: MaskPixel) -> usize {
        self.array.iter().filter(|&&v| v & bits != 0).count()
    }
}
