//! Threat scoring. Two scorers share one interface: the spectral scorer
//! works from index trends and the latest observation, the marine scorer
//! from sea-level, cyclone and water-quality readings. Their thresholds
//! describe different signal domains and are kept separate.

use serde::{Deserialize, Serialize};

use crate::models::{IndexKind, MarineSignals, MonthlyObservation, ThreatLevel, TrendSummary};

/// Adds `points` when a signal exceeds `above`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub above: f64,
    pub points: u32,
}

const fn band(above: f64, points: u32) -> ThresholdBand {
    ThresholdBand { above, points }
}

/// Points from the first band (checked in order) the value exceeds.
fn first_band_points(value: f64, bands: &[ThresholdBand]) -> u32 {
    bands
        .iter()
        .find(|b| value > b.above)
        .map(|b| b.points)
        .unwrap_or(0)
}

/// Level of the first cut (checked high to low) the score reaches.
fn level_for(score: u32, cuts: &[(u32, ThreatLevel)], floor: ThreatLevel) -> ThreatLevel {
    cuts.iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, level)| *level)
        .unwrap_or(floor)
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectralSignals {
    pub trends: TrendSummary,
    pub latest_ndci: Option<f64>,
}

impl SpectralSignals {
    pub fn new(trends: TrendSummary, latest: Option<&MonthlyObservation>) -> Self {
        Self {
            trends,
            latest_ndci: latest.and_then(|o| o.index(IndexKind::Ndci)),
        }
    }
}

/// Whichever upstream signal set a run produced.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ThreatSignals {
    Spectral(SpectralSignals),
    Marine(MarineSignals),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerVariant {
    Spectral,
    Marine,
}

pub trait ThreatScorer {
    fn variant(&self) -> ScorerVariant;

    /// Integer threat score, or `None` if these signals cannot be scored.
    fn score(&self, signals: &ThreatSignals) -> Option<u32>;

    fn level_for_score(&self, score: u32) -> ThreatLevel;

    fn assess(&self, signals: &ThreatSignals) -> ThreatLevel {
        match self.score(signals) {
            Some(score) => self.level_for_score(score),
            None => ThreatLevel::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralThresholds {
    /// Applied to |NDWI annual change|.
    pub ndwi_change: Vec<ThresholdBand>,
    pub ndci_change: Vec<ThresholdBand>,
    pub ndci_current: Vec<ThresholdBand>,
    pub levels: Vec<(u32, ThreatLevel)>,
}

impl Default for SpectralThresholds {
    fn default() -> Self {
        Self {
            ndwi_change: vec![band(0.1, 2)],
            ndci_change: vec![band(0.08, 2)],
            ndci_current: vec![band(0.15, 2)],
            levels: vec![
                (6, ThreatLevel::Critical),
                (4, ThreatLevel::High),
                (2, ThreatLevel::Medium),
            ],
        }
    }
}

/// Scores index trends and the current chlorophyll reading. Bottoms out
/// at `Low`; this scorer has no `Normal` output.
#[derive(Debug, Clone, Default)]
pub struct SpectralScorer {
    pub thresholds: SpectralThresholds,
}

impl SpectralScorer {
    pub fn score_signals(&self, signals: &SpectralSignals) -> u32 {
        let t = &self.thresholds;
        first_band_points(signals.trends.ndwi.annual_change.abs(), &t.ndwi_change)
            + first_band_points(signals.trends.ndci.annual_change, &t.ndci_change)
            + first_band_points(signals.latest_ndci.unwrap_or(0.0), &t.ndci_current)
    }
}

impl ThreatScorer for SpectralScorer {
    fn variant(&self) -> ScorerVariant {
        ScorerVariant::Spectral
    }

    fn score(&self, signals: &ThreatSignals) -> Option<u32> {
        match signals {
            ThreatSignals::Spectral(s) => Some(self.score_signals(s)),
            ThreatSignals::Marine(_) => None,
        }
    }

    fn level_for_score(&self, score: u32) -> ThreatLevel {
        level_for(score, &self.thresholds.levels, ThreatLevel::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarineThresholds {
    /// Applied to |sea level change| in metres.
    pub sea_level: Vec<ThresholdBand>,
    /// Wind speed in km/h.
    pub wind_speed: Vec<ThresholdBand>,
    pub pollution: Vec<ThresholdBand>,
    pub levels: Vec<(u32, ThreatLevel)>,
}

impl Default for MarineThresholds {
    fn default() -> Self {
        Self {
            sea_level: vec![band(3.0, 4), band(2.0, 3), band(1.0, 2), band(0.5, 1)],
            wind_speed: vec![band(60.0, 4), band(40.0, 3), band(20.0, 2)],
            pollution: vec![band(0.7, 2)],
            levels: vec![
                (6, ThreatLevel::Critical),
                (4, ThreatLevel::High),
                (2, ThreatLevel::Medium),
                (1, ThreatLevel::Low),
            ],
        }
    }
}

/// Scores sea-level, cyclone and pollution readings. A zero score is
/// `Normal`; unreadable inputs are `Unknown`.
#[derive(Debug, Clone, Default)]
pub struct MarineScorer {
    pub thresholds: MarineThresholds,
}

impl MarineScorer {
    pub fn score_signals(&self, signals: &MarineSignals) -> Option<u32> {
        let t = &self.thresholds;
        let mut score = 0;

        if let Some(sea) = &signals.sea_level {
            score += first_band_points(finite(sea.sea_level_change)?.abs(), &t.sea_level);
        }
        if let Some(cyclone) = &signals.cyclonic_activity {
            score += first_band_points(finite(cyclone.wind_speed)?, &t.wind_speed);
        }
        if let Some(ocean) = &signals.ocean_data {
            score += first_band_points(finite(ocean.water_quality.pollution_level)?, &t.pollution);
        }
        Some(score)
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl ThreatScorer for MarineScorer {
    fn variant(&self) -> ScorerVariant {
        ScorerVariant::Marine
    }

    fn score(&self, signals: &ThreatSignals) -> Option<u32> {
        match signals {
            ThreatSignals::Marine(m) => self.score_signals(m),
            ThreatSignals::Spectral(_) => None,
        }
    }

    fn level_for_score(&self, score: u32) -> ThreatLevel {
        level_for(score, &self.thresholds.levels, ThreatLevel::Normal)
    }
}

/// The scorer matching the signal set that is available.
pub fn scorer_for(signals: &ThreatSignals) -> Box<dyn ThreatScorer> {
    match signals {
        ThreatSignals::Spectral(_) => Box::new(SpectralScorer::default()),
        ThreatSignals::Marine(_) => Box::new(MarineScorer::default()),
    }
}

pub fn assess(signals: &ThreatSignals) -> ThreatLevel {
    scorer_for(signals).assess(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CyclonicSignal, IndexTrend, OceanSignal, SeaLevelSignal, WaterQuality};

    fn spectral(ndwi_change: f64, ndci_change: f64, ndci_now: Option<f64>) -> ThreatSignals {
        ThreatSignals::Spectral(SpectralSignals {
            trends: TrendSummary {
                ndwi: IndexTrend {
                    slope: ndwi_change / 12.0,
                    annual_change: ndwi_change,
                },
                ndci: IndexTrend {
                    slope: ndci_change / 12.0,
                    annual_change: ndci_change,
                },
            },
            latest_ndci: ndci_now,
        })
    }

    fn marine(sea: Option<f64>, wind: Option<f64>, pollution: Option<f64>) -> ThreatSignals {
        ThreatSignals::Marine(MarineSignals {
            sea_level: sea.map(|v| SeaLevelSignal {
                sea_level_change: v,
                ..Default::default()
            }),
            cyclonic_activity: wind.map(|v| CyclonicSignal {
                wind_speed: v,
                ..Default::default()
            }),
            ocean_data: pollution.map(|v| OceanSignal {
                water_quality: WaterQuality {
                    pollution_level: v,
                    ..Default::default()
                },
            }),
        })
    }

    #[test]
    fn test_spectral_score_components() {
        let scorer = SpectralScorer::default();
        assert_eq!(scorer.score(&spectral(0.0, 0.0, None)), Some(0));
        assert_eq!(scorer.score(&spectral(-0.11, 0.0, None)), Some(2));
        assert_eq!(scorer.score(&spectral(0.11, 0.0, None)), Some(2));
        assert_eq!(scorer.score(&spectral(0.0, 0.09, None)), Some(2));
        // A falling chlorophyll trend does not count.
        assert_eq!(scorer.score(&spectral(0.0, -0.5, None)), Some(0));
        assert_eq!(scorer.score(&spectral(0.0, 0.0, Some(0.2))), Some(2));
        assert_eq!(scorer.score(&spectral(0.5, 0.5, Some(0.5))), Some(6));
    }

    #[test]
    fn test_spectral_thresholds_are_strict() {
        let scorer = SpectralScorer::default();
        assert_eq!(scorer.score(&spectral(0.1, 0.08, Some(0.15))), Some(0));
    }

    #[test]
    fn test_spectral_level_boundaries() {
        let scorer = SpectralScorer::default();
        assert_eq!(scorer.level_for_score(0), ThreatLevel::Low);
        assert_eq!(scorer.level_for_score(1), ThreatLevel::Low);
        assert_eq!(scorer.level_for_score(2), ThreatLevel::Medium);
        assert_eq!(scorer.level_for_score(3), ThreatLevel::Medium);
        assert_eq!(scorer.level_for_score(4), ThreatLevel::High);
        assert_eq!(scorer.level_for_score(5), ThreatLevel::High);
        assert_eq!(scorer.level_for_score(6), ThreatLevel::Critical);
        assert_eq!(scorer.level_for_score(60), ThreatLevel::Critical);
    }

    #[test]
    fn test_marine_level_boundaries() {
        let scorer = MarineScorer::default();
        assert_eq!(scorer.level_for_score(0), ThreatLevel::Normal);
        assert_eq!(scorer.level_for_score(1), ThreatLevel::Low);
        assert_eq!(scorer.level_for_score(2), ThreatLevel::Medium);
        assert_eq!(scorer.level_for_score(5), ThreatLevel::High);
        assert_eq!(scorer.level_for_score(6), ThreatLevel::Critical);
    }

    #[test]
    fn test_marine_bands_first_match() {
        let scorer = MarineScorer::default();
        assert_eq!(scorer.score(&marine(Some(0.5), None, None)), Some(0));
        assert_eq!(scorer.score(&marine(Some(0.6), None, None)), Some(1));
        assert_eq!(scorer.score(&marine(Some(-1.5), None, None)), Some(2));
        assert_eq!(scorer.score(&marine(Some(2.5), None, None)), Some(3));
        assert_eq!(scorer.score(&marine(Some(3.5), None, None)), Some(4));
        assert_eq!(scorer.score(&marine(None, Some(15.0), None)), Some(0));
        assert_eq!(scorer.score(&marine(None, Some(25.0), None)), Some(2));
        assert_eq!(scorer.score(&marine(None, Some(45.0), None)), Some(3));
        assert_eq!(scorer.score(&marine(None, Some(61.0), None)), Some(4));
        assert_eq!(scorer.score(&marine(None, None, Some(0.8))), Some(2));
        assert_eq!(
            scorer.score(&marine(Some(3.5), Some(61.0), Some(0.8))),
            Some(10)
        );
    }

    #[test]
    fn test_marine_reference_readings_are_normal() {
        // sea level 0.5 m, 15 km/h wind, pollution 0.3
        let signals = marine(Some(0.5), Some(15.0), Some(0.3));
        assert_eq!(assess(&signals), ThreatLevel::Normal);
    }

    #[test]
    fn test_marine_non_finite_is_unknown() {
        let signals = marine(Some(f64::NAN), Some(70.0), None);
        assert_eq!(assess(&signals), ThreatLevel::Unknown);
    }

    #[test]
    fn test_wrong_signal_set_is_unknown() {
        assert_eq!(
            SpectralScorer::default().assess(&marine(Some(1.0), None, None)),
            ThreatLevel::Unknown
        );
        assert_eq!(
            MarineScorer::default().assess(&spectral(1.0, 1.0, None)),
            ThreatLevel::Unknown
        );
    }

    #[test]
    fn test_scorer_selection_follows_signals() {
        assert_eq!(
            scorer_for(&spectral(0.0, 0.0, None)).variant(),
            ScorerVariant::Spectral
        );
        assert_eq!(
            scorer_for(&marine(None, None, None)).variant(),
            ScorerVariant::Marine
        );
        assert_eq!(assess(&spectral(0.0, 0.0, None)), ThreatLevel::Low);
        assert_eq!(assess(&marine(None, None, None)), ThreatLevel::Normal);
    }

    #[test]
    fn test_spectral_monotonic_in_each_signal() {
        let scorer = SpectralScorer::default();
        let steps: Vec<f64> = (0..40).map(|i| i as f64 * 0.01).collect();
        for pair in steps.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(
                scorer.score(&spectral(lo, 0.0, None))
                    <= scorer.score(&spectral(hi, 0.0, None))
            );
            assert!(
                scorer.score(&spectral(-lo, 0.0, None))
                    <= scorer.score(&spectral(-hi, 0.0, None))
            );
            assert!(
                scorer.score(&spectral(0.0, lo, None))
                    <= scorer.score(&spectral(0.0, hi, None))
            );
            assert!(
                scorer.score(&spectral(0.0, 0.0, Some(lo)))
                    <= scorer.score(&spectral(0.0, 0.0, Some(hi)))
            );
        }
    }

    #[test]
    fn test_marine_monotonic_in_each_signal() {
        let scorer = MarineScorer::default();
        let steps: Vec<f64> = (0..80).map(|i| i as f64 * 0.05).collect();
        for pair in steps.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(
                scorer.score(&marine(Some(lo), None, None))
                    <= scorer.score(&marine(Some(hi), None, None))
            );
            assert!(
                scorer.score(&marine(None, Some(lo * 20.0), None))
                    <= scorer.score(&marine(None, Some(hi * 20.0), None))
            );
            assert!(
                scorer.score(&marine(None, None, Some(lo / 4.0)))
                    <= scorer.score(&marine(None, None, Some(hi / 4.0)))
            );
        }
    }

    #[test]
    fn test_spectral_signals_from_latest_observation() {
        let latest = MonthlyObservation::new("Kochi", 2024, 5, Some(-0.1), Some(0.2));
        let signals = SpectralSignals::new(TrendSummary::default(), Some(&latest));
        assert_eq!(signals.latest_ndci, Some(0.2));
        assert_eq!(SpectralSignals::new(TrendSummary::default(), None).latest_ndci, None);
    }
}
