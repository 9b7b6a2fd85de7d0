//! Catalogs of synthetic sources described by position, magnitude and shape.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::geom::SpherePoint;

use crate::profile::{DeltaFunction, Exponential, Gaussian, Profile, ProfileError, Sheared};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to access catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("catalog entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },

    #[error("catalog entry {index}: {source}")]
    Profile {
        index: usize,
        #[source]
        source: ProfileError,
    },
}

/// Flux for a magnitude on a zero point, `10^(-0.4 (mag - zp))`.
pub fn mag_to_flux(mag: f64, zero_point: f64) -> f64 {
    10f64.powf(-0.4 * (mag - zero_point))
}

/// Shape of a catalog source. Sizes are in arcseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum SourceType {
    Star,
    Gaussian { fwhm: f64 },
    Exponential { half_light_radius: f64 },
}

/// One row of an injection catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Degrees
    pub ra: f64,
    /// Degrees
    pub dec: f64,
    pub mag: f64,
    #[serde(flatten)]
    pub source_type: SourceType,
    /// Minor-to-major axis ratio for extended sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis_ratio: Option<f64>,
    /// Major-axis angle in degrees, counter-clockwise from east on the tangent plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_angle: Option<f64>,
}

impl CatalogEntry {
    pub fn star(ra: f64, dec: f64, mag: f64) -> Self {
        Self {
            ra,
            dec,
            mag,
            source_type: SourceType::Star,
            axis_ratio: None,
            position_angle: None,
        }
    }

    pub fn position(&self) -> SpherePoint {
        SpherePoint::from_degrees(self.ra, self.dec)
    }

    /// Profile for this entry with flux from `zero_point`.
    pub fn to_profile(&self, zero_point: f64) -> Result<Box<dyn Profile>, ProfileError> {
        let flux = mag_to_flux(self.mag, zero_point);

        let base: Box<dyn Profile> = match self.source_type {
            SourceType::Star => return Ok(Box::new(DeltaFunction::new(flux)?)),
            SourceType::Gaussian { fwhm } => Box::new(Gaussian::from_fwhm(flux, fwhm)?),
            SourceType::Exponential { half_light_radius } => {
                Box::new(Exponential::from_half_light_radius(flux, half_light_radius)?)
            }
        };

        match self.axis_ratio {
            Some(q) if q != 1.0 => {
                let angle = self.position_angle.unwrap_or(0.0).to_radians();
                Ok(Box::new(Sheared::new(base, q, angle)?))
            }
            _ => Ok(base),
        }
    }

    fn check(&self, index: usize) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidEntry { index, reason };

        if !(self.ra.is_finite() && self.dec.is_finite()) {
            return Err(invalid(format!(
                "non-finite position ({}, {})",
                self.ra, self.dec
            )));
        }
        if !(-90.0..=90.0).contains(&self.dec) {
            return Err(invalid(format!("declination {} out of range", self.dec)));
        }
        if !self.mag.is_finite() {
            return Err(invalid(format!("non-finite magnitude {}", self.mag)));
        }
        Ok(())
    }
}

/// An ordered list of sources to inject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InjectionCatalog {
    entries: Vec<CatalogEntry>,
}

impl InjectionCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a JSON array of entries.
    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Lazily convert entries into `(position, profile)` pairs.
    pub fn objects(
        &self,
        zero_point: f64,
    ) -> impl Iterator<Item = Result<(SpherePoint, Box<dyn Profile>), CatalogError>> + '_ {
        self.entries.iter().enumerate().map(move |(index, entry)| {
            entry.check(index)?;
            let profile = entry
                .to_profile(zero_point)
                .map_err(|source| CatalogError::Profile { index, source })?;
            Ok((entry.position(), profile))
        })
    }

    /// Convert every entry, failing on the first malformed one.
    pub fn to_objects(
        &self,
        zero_point: f64,
    ) -> Result<Vec<(SpherePoint, Box<dyn Profile>)>, CatalogError> {
        self.objects(zero_point).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_mag_to_flux() {
        assert_relative_eq!(mag_to_flux(27.0, 27.0), 1.0);
        assert_relative_eq!(mag_to_flux(22.0, 27.0), 100.0, max_relative = 1e-12);
        assert_relative_eq!(mag_to_flux(29.5, 27.0), 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_parse_entries() {
        let json = r#"[
            {"ra": 150.1, "dec": 2.2, "mag": 20.0, "source_type": "star"},
            {"ra": 150.2, "dec": 2.3, "mag": 21.5, "source_type": "gaussian", "fwhm": 0.8},
            {"ra": 150.3, "dec": 2.4, "mag": 22.0, "source_type": "exponential",
             "half_light_radius": 1.2, "axis_ratio": 0.4, "position_angle": 30.0}
        ]"#;
        let catalog: InjectionCatalog = serde_json::from_str(json).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.entries()[0].source_type, SourceType::Star);
        assert_eq!(
            catalog.entries()[1].source_type,
            SourceType::Gaussian { fwhm: 0.8 }
        );
        assert_eq!(catalog.entries()[2].axis_ratio, Some(0.4));
    }

    #[test]
    fn test_objects_carry_flux_and_shape() {
        let mut catalog = InjectionCatalog::default();
        catalog.push(CatalogEntry::star(10.0, -5.0, 22.0));
        catalog.push(CatalogEntry {
            source_type: SourceType::Exponential {
                half_light_radius: 1.0,
            },
            axis_ratio: Some(0.5),
            ..CatalogEntry::star(10.01, -5.0, 24.5)
        });

        let objects = catalog.to_objects(27.0).unwrap();
        assert_eq!(objects.len(), 2);

        let (position, star) = &objects[0];
        assert_relative_eq!(position.ra_degrees(), 10.0, epsilon = 1e-12);
        assert!(star.is_point());
        assert_relative_eq!(star.flux(), 100.0, max_relative = 1e-12);

        let (_, galaxy) = &objects[1];
        assert!(!galaxy.is_point());
        assert_relative_eq!(galaxy.flux(), 10.0, max_relative = 1e-12);
        let round = Exponential::from_half_light_radius(10.0, 1.0).unwrap();
        assert_relative_eq!(galaxy.max_radius(), round.max_radius() / 0.5_f64.sqrt());
    }

    #[test]
    fn test_malformed_entries() {
        let catalog = InjectionCatalog::new(vec![
            CatalogEntry::star(10.0, 0.0, 20.0),
            CatalogEntry::star(10.0, 0.0, f64::NAN),
        ]);
        let results: Vec<_> = catalog.objects(27.0).collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(CatalogError::InvalidEntry { index: 1, .. })
        ));

        let bad_size = InjectionCatalog::new(vec![CatalogEntry {
            source_type: SourceType::Gaussian { fwhm: -1.0 },
            ..CatalogEntry::star(10.0, 0.0, 20.0)
        }]);
        assert!(matches!(
            bad_size.to_objects(27.0),
            Err(CatalogError::Profile { index: 0, .. })
        ));

        let bad_dec = InjectionCatalog::new(vec![CatalogEntry::star(10.0, 95.0, 20.0)]);
        assert!(bad_dec.to_objects(27.0).is_err());
    }

    #[test]
    fn test_catalog_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let catalog = InjectionCatalog::new(vec![
            CatalogEntry::star(1.0, 2.0, 18.0),
            CatalogEntry {
                source_type: SourceType::Gaussian { fwhm: 0.6 },
                axis_ratio: Some(0.7),
                position_angle: Some(45.0),
                ..CatalogEntry::star(1.1, 2.1, 19.0)
            },
        ]);
        catalog.save_to_file(&path).unwrap();
        assert_eq!(InjectionCatalog::load_from_file(&path).unwrap(), catalog);
    }
}
