use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::{AnnotatedObservation, AnomalyAnnotation, IndexKind, MonthlyObservation};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Configuration for the anomaly detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectorConfig {
    /// Expected outlier fraction, in (0, 0.5].
    pub contamination: f64,
    pub seed: u64,
    pub trees: usize,
    /// Subsample size per tree (capped at the number of rows).
    pub max_samples: usize,
    /// Below this many observations every record gets the zero annotation.
    pub min_observations: usize,
}

impl Default for AnomalyDetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            seed: 42,
            trees: 100,
            max_samples: 256,
            min_observations: 5,
        }
    }
}

/// Zero-mean, unit-variance scaling fit on a single batch.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Population statistics per column. Constant columns get scale 1.
    pub fn fit(x: &DMatrix<f64>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(anyhow!("Cannot fit scaler on zero rows"));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Feature matrix contains non-finite values"));
        }
        let n = x.nrows() as f64;
        let mut means = Vec::with_capacity(x.ncols());
        let mut scales = Vec::with_capacity(x.ncols());
        for col in x.column_iter() {
            let mean = col.sum() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }
        Ok(Self { means, scales })
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(x.nrows(), x.ncols(), |r, c| {
            (x[(r, c)] - self.means[c]) / self.scales[c]
        })
    }

    pub fn fit_transform(x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Ok(Self::fit(x)?.transform(x))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(x: &DMatrix<f64>, rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, rows, 0, max_depth, rng);
        tree
    }

    fn build(
        &mut self,
        x: &DMatrix<f64>,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= max_depth {
            return id;
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(x[(r, f)]), hi.max(x[(r, f)]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.random_range(0..candidates.len())];
        let threshold = rng.random_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| x[(r, feature)] < threshold);

        let left = self.build(x, left_rows, depth + 1, max_depth, rng);
        let right = self.build(x, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, x: &DMatrix<f64>, row: usize) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[(row, *feature)] < *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Isolation forest fit on one batch. Scores follow the decision-function
/// convention: negative means outlier, higher means more normal.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn fit(x: &DMatrix<f64>, config: &AnomalyDetectorConfig) -> Result<Self> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(anyhow!("Cannot fit isolation forest on an empty matrix"));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Feature matrix contains non-finite values"));
        }
        if !(config.contamination > 0.0 && config.contamination <= 0.5) {
            return Err(anyhow!(
                "Contamination must be in (0, 0.5], got {}",
                config.contamination
            ));
        }
        if config.trees == 0 {
            return Err(anyhow!("Isolation forest needs at least one tree"));
        }

        let sample_size = config.max_samples.clamp(1, n);
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.trees)
            .map(|_| {
                let rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::grow(x, rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };
        let raw = forest.score_samples(x);
        forest.offset = percentile(&raw, 100.0 * config.contamination);
        Ok(forest)
    }

    /// `-2^(-E[h(x)] / c(sample_size))`; lower is more anomalous.
    pub fn score_samples(&self, x: &DMatrix<f64>) -> Vec<f64> {
        let norm = average_path_length(self.sample_size).max(f64::EPSILON);
        (0..x.nrows())
            .map(|row| {
                let mean_depth = self
                    .trees
                    .iter()
                    .map(|t| t.path_length(x, row))
                    .sum::<f64>()
                    / self.trees.len() as f64;
                -(2f64.powf(-mean_depth / norm))
            })
            .collect()
    }

    pub fn decision_function(&self, x: &DMatrix<f64>) -> Vec<f64> {
        self.score_samples(x)
            .into_iter()
            .map(|s| s - self.offset)
            .collect()
    }
}

/// Flags unusual months across the usable index columns.
pub struct AnomalyDetector {
    config: AnomalyDetectorConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyDetectorConfig) -> Self {
        Self { config }
    }

    /// Annotates every observation. Short series, series with no usable
    /// index column, and fitting failures all yield `{0, false}` for every
    /// record.
    pub fn detect(&self, series: &[MonthlyObservation]) -> Vec<AnnotatedObservation> {
        let annotations = if series.len() < self.config.min_observations {
            None
        } else {
            match self.score(series) {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::warn!("⚠️  Anomaly model fitting failed, using defaults: {:#}", e);
                    None
                }
            }
        };

        let annotations =
            annotations.unwrap_or_else(|| vec![AnomalyAnnotation::default(); series.len()]);

        series
            .iter()
            .cloned()
            .zip(annotations)
            .map(|(observation, anomaly)| AnnotatedObservation {
                observation,
                anomaly,
            })
            .collect()
    }

    /// `Ok(None)` when no index column has any value.
    fn score(&self, series: &[MonthlyObservation]) -> Result<Option<Vec<AnomalyAnnotation>>> {
        let features: Vec<IndexKind> = IndexKind::ALL
            .into_iter()
            .filter(|kind| series.iter().any(|o| o.index(*kind).is_some()))
            .collect();
        if features.is_empty() {
            return Ok(None);
        }

        let x = DMatrix::from_fn(series.len(), features.len(), |r, c| {
            series[r].index(features[c]).unwrap_or(0.0)
        });
        let scaled = StandardScaler::fit_transform(&x)?;
        let forest = IsolationForest::fit(&scaled, &self.config)?;
        let scores = forest.decision_function(&scaled);

        let annotations: Vec<AnomalyAnnotation> = scores
            .into_iter()
            .map(|score| AnomalyAnnotation {
                anomaly_score: score,
                is_anomaly: score < 0.0,
            })
            .collect();

        tracing::info!(
            "✅ Anomaly detection: {} anomalies found",
            annotations.iter().filter(|a| a.is_anomaly).count()
        );
        Ok(Some(annotations))
    }
}

pub fn anomaly_count(annotated: &[AnnotatedObservation]) -> usize {
    annotated.iter().filter(|a| a.anomaly.is_anomaly).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[(Option<f64>, Option<f64>)]) -> Vec<MonthlyObservation> {
        values
            .iter()
            .enumerate()
            .map(|(i, (ndwi, ndci))| {
                MonthlyObservation::new("Test", 2023, i as u32 % 12 + 1, *ndwi, *ndci)
            })
            .collect()
    }

    fn assert_all_default(annotated: &[AnnotatedObservation]) {
        for a in annotated {
            assert_eq!(a.anomaly, AnomalyAnnotation::default());
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!(c256 > 9.0 && c256 < 11.0, "c(256) = {}", c256);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&values, 50.0) - 3.0).abs() < 1e-10);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-10);
        assert!((percentile(&values, 100.0) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0, 4.0, 5.0]);
        let scaled = StandardScaler::fit_transform(&x).unwrap();
        let col0 = scaled.column(0);
        assert!(col0.sum().abs() < 1e-10);
        let var = col0.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!((var - 1.0).abs() < 1e-10);
        // Constant column collapses to zeros rather than dividing by zero.
        assert!(scaled.column(1).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_scaler_rejects_non_finite() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, f64::NAN]);
        assert!(StandardScaler::fit(&x).is_err());
    }

    #[test]
    fn test_short_series_gets_defaults() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        let s = series(&[(Some(0.1), Some(0.1)); 4]);
        let annotated = detector.detect(&s);
        assert_eq!(annotated.len(), 4);
        assert_all_default(&annotated);
    }

    #[test]
    fn test_no_usable_column_gets_defaults() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        let s = series(&[(None, None); 8]);
        let annotated = detector.detect(&s);
        assert_eq!(annotated.len(), 8);
        assert_all_default(&annotated);
    }

    #[test]
    fn test_empty_series() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        assert!(detector.detect(&[]).is_empty());
    }

    #[test]
    fn test_invalid_contamination_falls_back() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig {
            contamination: 0.9,
            ..Default::default()
        });
        let s = series(&[
            (Some(0.1), Some(0.0)),
            (Some(0.2), Some(0.1)),
            (Some(0.3), Some(0.0)),
            (Some(0.4), Some(0.1)),
            (Some(0.5), Some(0.0)),
        ]);
        assert_all_default(&detector.detect(&s));
    }

    #[test]
    fn test_outlier_is_flagged() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        let mut values: Vec<(Option<f64>, Option<f64>)> = (0..12)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.01 } else { -0.01 };
                (Some(-0.1 + wobble), Some(0.05 - wobble))
            })
            .collect();
        values[7] = (Some(0.6), Some(0.4));
        let annotated = detector.detect(&series(&values));

        assert!(annotated[7].anomaly.is_anomaly, "spike should be flagged");
        let flagged = anomaly_count(&annotated);
        assert!((1..=2).contains(&flagged), "flagged {}", flagged);
        let min_idx = annotated
            .iter()
            .enumerate()
            .min_by(|a, b| {
                a.1.anomaly
                    .anomaly_score
                    .partial_cmp(&b.1.anomaly.anomaly_score)
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(min_idx, 7);
    }

    #[test]
    fn test_detection_is_reproducible() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        let values: Vec<(Option<f64>, Option<f64>)> = (0..10)
            .map(|i| (Some((i as f64 * 0.7).sin() * 0.2), Some(i as f64 * 0.01)))
            .collect();
        let s = series(&values);
        assert_eq!(detector.detect(&s), detector.detect(&s));
    }

    #[test]
    fn test_missing_values_filled_with_zero() {
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default());
        let s = series(&[
            (Some(0.1), None),
            (Some(0.12), None),
            (None, None),
            (Some(0.11), None),
            (Some(0.09), None),
            (Some(0.1), None),
        ]);
        let annotated = detector.detect(&s);
        assert_eq!(annotated.len(), 6);
        assert!(annotated.iter().all(|a| a.anomaly.anomaly_score.is_finite()));
    }
}
