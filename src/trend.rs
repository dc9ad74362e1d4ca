use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};

use crate::models::{IndexKind, IndexTrend, MonthlyObservation, TrendSummary};

/// Fewest valid points needed before a line is fit.
pub const MIN_TREND_POINTS: usize = 3;

/// Ordinary least squares `y = slope * x + intercept`, returning `(slope, intercept)`.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    if x.len() != y.len() {
        return Err(anyhow!("x and y lengths differ: {} vs {}", x.len(), y.len()));
    }
    if x.len() < 2 {
        return Err(anyhow!("Need at least two points to fit a line"));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(anyhow!("Cannot fit a line through non-finite values"));
    }

    // Centering x keeps the design matrix well conditioned for year-sized values.
    let x_mean = x.iter().sum::<f64>() / x.len() as f64;
    let design = DMatrix::from_fn(x.len(), 2, |r, c| if c == 0 { x[r] - x_mean } else { 1.0 });
    let target = DVector::from_column_slice(y);

    let coefficients = design
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| anyhow!("Least-squares solve failed: {}", e))?;

    let slope = coefficients[0];
    let intercept = coefficients[1] - slope * x_mean;
    if !slope.is_finite() {
        return Err(anyhow!("Least-squares slope is not finite"));
    }
    Ok((slope, intercept))
}

/// Fits a linear trend per index against the year-fraction time index.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    min_points: usize,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self {
            min_points: MIN_TREND_POINTS,
        }
    }
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns with too few valid points, or whose fit fails, report zeros.
    pub fn analyze(&self, series: &[MonthlyObservation]) -> TrendSummary {
        let mut summary = TrendSummary::default();
        for kind in IndexKind::ALL {
            let trend = match self.analyze_index(series, kind) {
                Ok(trend) => trend,
                Err(e) => {
                    tracing::debug!("Trend fit for {} failed: {:#}", kind.name(), e);
                    IndexTrend::default()
                }
            };
            summary.set(kind, trend);
        }
        summary
    }

    fn analyze_index(&self, series: &[MonthlyObservation], kind: IndexKind) -> Result<IndexTrend> {
        let (x, y): (Vec<f64>, Vec<f64>) = series
            .iter()
            .filter_map(|o| o.index(kind).map(|v| (o.time_index(), v)))
            .unzip();

        if x.len() < self.min_points {
            return Ok(IndexTrend::default());
        }

        let (slope, _) = fit_line(&x, &y)?;
        Ok(IndexTrend {
            slope,
            annual_change: slope * 12.0,
        })
    }
}
