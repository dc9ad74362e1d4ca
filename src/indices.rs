//! Normalized difference water and chlorophyll indices.

use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

use crate::imagery::Scene;
use crate::models::{Band, IndexKind};

/// Reflectance values for one pixel, keyed by band.
pub type BandSample = BTreeMap<Band, f64>;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpectralIndices {
    pub ndwi: f64,
    pub ndci: f64,
}

impl IndexKind {
    /// The `(a, b)` bands of `(a - b) / (a + b)`.
    pub fn bands(&self) -> (Band, Band) {
        match self {
            IndexKind::Ndwi => (Band::Green, Band::Nir),
            IndexKind::Ndci => (Band::RedEdge, Band::Red),
        }
    }
}

/// `(a - b) / (a + b)`. A zero denominator yields NaN, which the mean
/// reduction downstream treats as a masked pixel.
pub fn normalized_difference(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum == 0.0 {
        return f64::NAN;
    }
    (a - b) / sum
}

fn sample_band(sample: &BandSample, band: Band) -> Result<f64> {
    sample
        .get(&band)
        .copied()
        .ok_or_else(|| anyhow!("Sample is missing band {}", band.sentinel2_id()))
}

pub fn index_value(sample: &BandSample, kind: IndexKind) -> Result<f64> {
    let (a, b) = kind.bands();
    Ok(normalized_difference(
        sample_band(sample, a)?,
        sample_band(sample, b)?,
    ))
}

pub fn compute_indices(sample: &BandSample) -> Result<SpectralIndices> {
    Ok(SpectralIndices {
        ndwi: index_value(sample, IndexKind::Ndwi)?,
        ndci: index_value(sample, IndexKind::Ndci)?,
    })
}

/// Per-pixel index raster for a whole scene.
pub fn index_raster(scene: &Scene, kind: IndexKind) -> Result<DMatrix<f64>> {
    let (a, b) = kind.bands();
    let band_a = scene.band(a)?;
    let band_b = scene.band(b)?;
    if band_a.shape() != band_b.shape() {
        return Err(anyhow!(
            "Scene {} has mismatched {} and {} rasters",
            scene.id,
            a.sentinel2_id(),
            b.sentinel2_id()
        ));
    }
    Ok(band_a.zip_map(band_b, normalized_difference))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(green: f64, nir: f64, red: f64, red_edge: f64) -> BandSample {
        BandSample::from([
            (Band::Green, green),
            (Band::Nir, nir),
            (Band::Red, red),
            (Band::RedEdge, red_edge),
        ])
    }

    #[test]
    fn test_water_pixel_has_positive_ndwi() {
        let indices = compute_indices(&sample(0.08, 0.02, 0.04, 0.05)).unwrap();
        assert!((indices.ndwi - 0.6).abs() < 1e-10);
        assert!((indices.ndci - (0.01 / 0.09)).abs() < 1e-10);
    }

    #[test]
    fn test_vegetation_pixel_has_negative_ndwi() {
        let indices = compute_indices(&sample(0.05, 0.30, 0.04, 0.04)).unwrap();
        assert!(indices.ndwi < 0.0);
        assert_eq!(indices.ndci, 0.0);
    }

    #[test]
    fn test_zero_denominator_is_nan() {
        assert!(normalized_difference(0.0, 0.0).is_nan());
        assert!(normalized_difference(1.0, -1.0).is_nan());
    }

    #[test]
    fn test_missing_band_is_error() {
        let mut s = sample(0.1, 0.2, 0.1, 0.1);
        s.remove(&Band::Nir);
        let err = compute_indices(&s).unwrap_err().to_string();
        assert!(err.contains("B8"));
    }

    #[test]
    fn test_results_bounded_for_positive_reflectance() {
        for (a, b) in [(0.1, 0.9), (0.9, 0.1), (0.5, 0.5), (1e-6, 1.0)] {
            let v = normalized_difference(a, b);
            assert!((-1.0..=1.0).contains(&v), "{} out of range", v);
        }
    }
}
