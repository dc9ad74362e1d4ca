use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};

use crate::imagery::{ImagerySource, IndexLayers};
use crate::indices::index_raster;
use crate::models::{IndexKind, MonthlyObservation, Region};

pub const DEFAULT_CLOUD_THRESHOLD: f64 = 30.0;
pub const DEFAULT_SCALE_M: f64 = 500.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self::new(self.year - 1, 12)
        } else {
            Self::new(self.year, self.month - 1)
        }
    }

    pub fn first_day(self) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .ok_or_else(|| anyhow!("Invalid month {}-{:02}", self.year, self.month))
    }
}

/// A run of consecutive calendar months.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MonthSpan {
    pub start: YearMonth,
    pub months: u32,
}

impl MonthSpan {
    /// Every month of the years in `[start_year, end_year)`.
    pub fn years(start_year: i32, end_year: i32) -> Self {
        let years = (end_year - start_year).max(0) as u32;
        Self {
            start: YearMonth::new(start_year, 1),
            months: years * 12,
        }
    }

    /// The `months` months immediately preceding the month of `today`.
    pub fn trailing(today: NaiveDate, months: u32) -> Self {
        let mut start = YearMonth::of(today);
        for _ in 0..months {
            start = start.previous();
        }
        Self { start, months }
    }

    pub fn iter(&self) -> impl Iterator<Item = YearMonth> {
        std::iter::successors(Some(self.start), |m| Some(m.next())).take(self.months as usize)
    }
}

/// Builds the sparse monthly index series for a region.
pub struct TimeSeriesExtractor<'a> {
    source: &'a dyn ImagerySource,
    cloud_threshold: f64,
    scale_m: f64,
}

impl<'a> TimeSeriesExtractor<'a> {
    pub fn new(source: &'a dyn ImagerySource, cloud_threshold: f64, scale_m: f64) -> Self {
        Self {
            source,
            cloud_threshold,
            scale_m,
        }
    }

    /// Months with no qualifying imagery, or whose processing fails, are
    /// omitted. Never fails as a whole.
    pub fn extract(&self, region: &Region, span: MonthSpan) -> Vec<MonthlyObservation> {
        tracing::info!(
            "🛰️  Collecting {} months of imagery for {}",
            span.months,
            region.name
        );

        let mut series = Vec::new();
        for month in span.iter() {
            match self.extract_month(region, month) {
                Ok(Some(observation)) => series.push(observation),
                Ok(None) => tracing::debug!(
                    "No qualifying imagery for {} in {}-{:02}",
                    region.name,
                    month.year,
                    month.month
                ),
                Err(e) => tracing::debug!(
                    "Skipping {} {}-{:02}: {:#}",
                    region.name,
                    month.year,
                    month.month,
                    e
                ),
            }
        }

        tracing::info!(
            "📊 {}: collected {} monthly data points",
            region.name,
            series.len()
        );
        series
    }

    pub fn extract_years(
        &self,
        region: &Region,
        start_year: i32,
        end_year: i32,
    ) -> Vec<MonthlyObservation> {
        self.extract(region, MonthSpan::years(start_year, end_year))
    }

    fn extract_month(
        &self,
        region: &Region,
        month: YearMonth,
    ) -> Result<Option<MonthlyObservation>> {
        let start = month.first_day()?;
        let end = month.next().first_day()?;

        let scenes = self
            .source
            .query(region, start, end, self.cloud_threshold)?;
        if scenes.is_empty() {
            return Ok(None);
        }

        let layers = scenes
            .iter()
            .map(|scene| {
                Ok(IndexLayers {
                    bounds: scene.bounds,
                    ndwi: index_raster(scene, IndexKind::Ndwi)?,
                    ndci: index_raster(scene, IndexKind::Ndci)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let reduced = self
            .source
            .reduce_median_and_mean(&layers, region, self.scale_m)?;
        if reduced.ndwi.is_none() && reduced.ndci.is_none() {
            return Ok(None);
        }

        Ok(Some(MonthlyObservation::new(
            &region.name,
            month.year,
            month.month,
            reduced.ndwi,
            reduced.ndci,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::Scene;
    use crate::models::{Band, BoundingBox};
    use nalgebra::DMatrix;
    use std::collections::BTreeMap;

    fn region() -> Region {
        Region {
            name: "Kochi".to_string(),
            bounds: BoundingBox::new(76.0, 9.8, 76.5, 10.2),
        }
    }

    /// Fails every query in the configured months, otherwise returns one
    /// uniform scene per month except where no imagery is configured.
    struct ScriptedSource {
        failing: Vec<u32>,
        empty: Vec<u32>,
    }

    impl ImagerySource for ScriptedSource {
        fn query(
            &self,
            region: &Region,
            start: NaiveDate,
            _end: NaiveDate,
            _cloud_threshold: f64,
        ) -> Result<Vec<Scene>> {
            if self.failing.contains(&start.month()) {
                return Err(anyhow!("quota exceeded"));
            }
            if self.empty.contains(&start.month()) {
                return Ok(vec![]);
            }
            let uniform = |v: f64| DMatrix::from_element(2, 2, v);
            Ok(vec![Scene {
                id: format!("scene-{}", start),
                acquired: start,
                cloud_pct: 5.0,
                bounds: region.bounds,
                bands: BTreeMap::from([
                    (Band::Green, uniform(0.3)),
                    (Band::Nir, uniform(0.1)),
                    (Band::Red, uniform(0.1)),
                    (Band::RedEdge, uniform(0.1)),
                ]),
            }])
        }
    }

    #[test]
    fn test_year_month_arithmetic() {
        assert_eq!(YearMonth::new(2023, 12).next(), YearMonth::new(2024, 1));
        assert_eq!(YearMonth::new(2024, 1).previous(), YearMonth::new(2023, 12));
        assert!(YearMonth::new(2024, 13).first_day().is_err());
    }

    #[test]
    fn test_span_years() {
        let months: Vec<_> = MonthSpan::years(2022, 2024).iter().collect();
        assert_eq!(months.len(), 24);
        assert_eq!(months[0], YearMonth::new(2022, 1));
        assert_eq!(months[23], YearMonth::new(2023, 12));
        assert_eq!(MonthSpan::years(2024, 2024).iter().count(), 0);
    }

    #[test]
    fn test_span_trailing_excludes_current_month() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let months: Vec<_> = MonthSpan::trailing(today, 12).iter().collect();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], YearMonth::new(2023, 3));
        assert_eq!(months[11], YearMonth::new(2024, 2));
    }

    #[test]
    fn test_extract_full_year() {
        let source = ScriptedSource {
            failing: vec![],
            empty: vec![],
        };
        let extractor = TimeSeriesExtractor::new(&source, 30.0, 500.0);
        let series = extractor.extract_years(&region(), 2023, 2024);
        assert_eq!(series.len(), 12);
        assert!((series[0].ndwi.unwrap() - 0.5).abs() < 1e-10);
        assert_eq!(series[0].ndci, Some(0.0));
        assert_eq!(series[0].location, "Kochi");
    }

    #[test]
    fn test_extract_omits_empty_and_failing_months() {
        let source = ScriptedSource {
            failing: vec![2, 7],
            empty: vec![4, 5, 6],
        };
        let extractor = TimeSeriesExtractor::new(&source, 30.0, 500.0);
        let series = extractor.extract_years(&region(), 2023, 2024);
        let months: Vec<u32> = series.iter().map(|o| o.month).collect();
        assert_eq!(months, vec![1, 3, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_extract_preserves_calendar_order() {
        let source = ScriptedSource {
            failing: vec![],
            empty: vec![],
        };
        let extractor = TimeSeriesExtractor::new(&source, 30.0, 500.0);
        let series = extractor.extract_years(&region(), 2022, 2024);
        assert_eq!(series.len(), 24);
        assert!(series
            .windows(2)
            .all(|w| (w[0].year, w[0].month) < (w[1].year, w[1].month)));
    }

    #[test]
    fn test_region_spanning_two_tiles_keeps_month() {
        use crate::imagery::SceneArchive;

        let tile = |id: &str, min_lon: f64, green: f64| Scene {
            id: id.to_string(),
            acquired: NaiveDate::from_ymd_opt(2023, 3, 12).unwrap(),
            cloud_pct: 0.0,
            bounds: BoundingBox::new(min_lon, 0.0, min_lon + 1.0, 1.0),
            bands: BTreeMap::from([
                (Band::Green, DMatrix::from_element(2, 2, green)),
                (Band::Nir, DMatrix::from_element(2, 2, 0.2)),
                (Band::Red, DMatrix::from_element(2, 2, 0.1)),
                (Band::RedEdge, DMatrix::from_element(2, 2, 0.1)),
            ]),
        };
        let archive =
            SceneArchive::from_scenes(vec![tile("west", 0.0, 0.2), tile("east", 1.0, 0.6)]);
        let straddling = Region {
            name: "Straddle".to_string(),
            bounds: BoundingBox::new(0.5, 0.0, 1.5, 1.0),
        };

        let extractor = TimeSeriesExtractor::new(&archive, 30.0, 500.0);
        let series = extractor.extract_years(&straddling, 2023, 2024);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].month, 3);
        // West NDWI 0.0, east NDWI 0.5, half the region on each.
        assert!((series[0].ndwi.unwrap() - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_scene_missing_band_skips_month() {
        struct Incomplete;
        impl ImagerySource for Incomplete {
            fn query(
                &self,
                region: &Region,
                start: NaiveDate,
                _end: NaiveDate,
                _cloud_threshold: f64,
            ) -> Result<Vec<Scene>> {
                Ok(vec![Scene {
                    id: "partial".to_string(),
                    acquired: start,
                    cloud_pct: 0.0,
                    bounds: region.bounds,
                    bands: BTreeMap::from([(Band::Green, DMatrix::from_element(1, 1, 0.2))]),
                }])
            }
        }
        let extractor = TimeSeriesExtractor::new(&Incomplete, 30.0, 500.0);
        assert!(extractor.extract_years(&region(), 2023, 2024).is_empty());
    }
}
