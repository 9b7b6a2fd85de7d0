//! Post-injection report: what was drawn where, and how much flux came back.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use shared::exposure::Exposure;
use shared::geom::Box2I;
use shared::image_proc::collect_aperture_pixels;

use crate::catalog::{mag_to_flux, InjectionCatalog};
use crate::config::{ConfigError, InjectionConfig};
use crate::inject::InjectionOutcome;

/// Background annulus, in pixels beyond the calibration aperture
const ANNULUS_GAP: f64 = 2.0;
const ANNULUS_WIDTH: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub index: usize,
    pub ra: f64,
    pub dec: f64,
    /// Pixel position, absent where the WCS cannot map the entry
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub expected_flux: f64,
    /// `"injected"` or the reason the object was skipped
    pub status: String,
    pub bbox: Option<Box2I>,
    /// Background-subtracted flux within the calibration aperture
    pub measured_flux: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionSummary {
    pub image_sum: f64,
    pub fake_pixels: usize,
    pub injected: usize,
    pub skipped: usize,
    pub objects: Vec<ObjectSummary>,
}

impl InjectionSummary {
    /// Summarize an injection run of `catalog` into `exposure`.
    ///
    /// `outcomes` must be in catalog order.
    pub fn build(
        exposure: &Exposure,
        config: &InjectionConfig,
        catalog: &InjectionCatalog,
        outcomes: &[InjectionOutcome],
    ) -> Self {
        let bbox = exposure.bbox();
        let pixels: Array2<f64> = exposure.image().mapv(|v| v as f64);
        let radius = config.calib_flux_radius;
        let annulus = (radius + ANNULUS_GAP, radius + ANNULUS_GAP + ANNULUS_WIDTH);

        let mut objects = Vec::with_capacity(outcomes.len());
        for (index, (entry, outcome)) in catalog.entries().iter().zip(outcomes).enumerate() {
            let pt = exposure
                .wcs()
                .sky_to_pixel(&entry.position())
                .ok()
                .filter(|pt| pt.is_finite());

            let (status, stamp, measured_flux) = match (outcome, pt) {
                (InjectionOutcome::Injected { bbox: stamp }, Some(pt)) => {
                    let x = pt.x - bbox.min.x as f64;
                    let y = pt.y - bbox.min.y as f64;
                    let (aperture, background) =
                        collect_aperture_pixels(&pixels.view(), x, y, radius, Some(annulus));
                    let sky = if background.is_empty() {
                        0.0
                    } else {
                        background.iter().sum::<f64>() / background.len() as f64
                    };
                    let flux = aperture.iter().sum::<f64>() - sky * aperture.len() as f64;
                    ("injected".to_string(), Some(*stamp), Some(flux))
                }
                (InjectionOutcome::Injected { bbox: stamp }, None) => {
                    ("injected".to_string(), Some(*stamp), None)
                }
                (InjectionOutcome::Skipped(reason), _) => (reason.to_string(), None, None),
            };

            objects.push(ObjectSummary {
                index,
                ra: entry.ra,
                dec: entry.dec,
                x: pt.map(|pt| pt.x),
                y: pt.map(|pt| pt.y),
                expected_flux: mag_to_flux(entry.mag, config.zero_point),
                status,
                bbox: stamp,
                measured_flux,
            });
        }

        let injected = outcomes.iter().filter(|o| o.is_injected()).count();
        let fake_pixels = match exposure.mask().plane_bitmask(&config.mask_plane_name) {
            Ok(bits) => exposure.mask().count_set(bits),
            Err(_) => 0,
        };

        Self {
            image_sum: exposure.image_sum(),
            fake_pixels,
            injected,
            skipped: outcomes.len() - injected,
            objects,
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
