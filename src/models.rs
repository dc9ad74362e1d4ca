use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel-2 spectral bands used by the index calculator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "B2")]
    Blue,
    #[serde(rename = "B3")]
    Green,
    #[serde(rename = "B4")]
    Red,
    #[serde(rename = "B5")]
    RedEdge,
    #[serde(rename = "B8")]
    Nir,
}

impl Band {
    pub fn sentinel2_id(&self) -> &'static str {
        match self {
            Band::Blue => "B2",
            Band::Green => "B3",
            Band::Red => "B4",
            Band::RedEdge => "B5",
            Band::Nir => "B8",
        }
    }

    pub fn from_sentinel2_id(id: &str) -> Option<Band> {
        match id {
            "B2" => Some(Band::Blue),
            "B3" => Some(Band::Green),
            "B4" => Some(Band::Red),
            "B5" => Some(Band::RedEdge),
            "B8" => Some(Band::Nir),
            _ => None,
        }
    }
}

/// Longitude/latitude rectangle in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Center as `[lat, lon]`, the order map clients expect.
    pub fn center(&self) -> [f64; 2] {
        [
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        ]
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn is_valid(&self) -> bool {
        self.min_lon < self.max_lon
            && self.min_lat < self.max_lat
            && (-180.0..=180.0).contains(&self.min_lon)
            && (-180.0..=180.0).contains(&self.max_lon)
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
    }
}

/// A named coastal area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub bounds: BoundingBox,
}

/// The two normalized difference indices tracked per month.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Ndwi,
    Ndci,
}

impl IndexKind {
    pub const ALL: [IndexKind; 2] = [IndexKind::Ndwi, IndexKind::Ndci];

    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Ndwi => "NDWI",
            IndexKind::Ndci => "NDCI",
        }
    }
}

/// One region-month of spatially reduced index values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyObservation {
    pub location: String,
    pub year: i32,
    pub month: u32,
    #[serde(rename = "date")]
    pub date_label: String,
    #[serde(rename = "NDWI")]
    pub ndwi: Option<f64>,
    #[serde(rename = "NDCI")]
    pub ndci: Option<f64>,
}

impl MonthlyObservation {
    pub fn new(
        location: &str,
        year: i32,
        month: u32,
        ndwi: Option<f64>,
        ndci: Option<f64>,
    ) -> Self {
        Self {
            location: location.to_string(),
            year,
            month,
            date_label: format!("{}-{:02}", year, month),
            ndwi,
            ndci,
        }
    }

    /// Index value, treating NaN the same as a missing reading.
    pub fn index(&self, kind: IndexKind) -> Option<f64> {
        let value = match kind {
            IndexKind::Ndwi => self.ndwi,
            IndexKind::Ndci => self.ndci,
        };
        value.filter(|v| v.is_finite())
    }

    /// Continuous year fraction: `year + (month - 1) / 12`.
    pub fn time_index(&self) -> f64 {
        self.year as f64 + (self.month as f64 - 1.0) / 12.0
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAnnotation {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedObservation {
    #[serde(flatten)]
    pub observation: MonthlyObservation,
    #[serde(flatten)]
    pub anomaly: AnomalyAnnotation,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexTrend {
    /// Least-squares slope against the year-fraction time index.
    pub slope: f64,
    pub annual_change: f64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    #[serde(rename = "NDWI")]
    pub ndwi: IndexTrend,
    #[serde(rename = "NDCI")]
    pub ndci: IndexTrend,
}

impl TrendSummary {
    pub fn get(&self, kind: IndexKind) -> IndexTrend {
        match kind {
            IndexKind::Ndwi => self.ndwi,
            IndexKind::Ndci => self.ndci,
        }
    }

    pub fn set(&mut self, kind: IndexKind, trend: IndexTrend) {
        match kind {
            IndexKind::Ndwi => self.ndwi = trend,
            IndexKind::Ndci => self.ndci = trend,
        }
    }
}

/// Ordinal threat classification. `Unknown` sorts lowest and only comes
/// out of the marine scorer when its inputs cannot be evaluated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Unknown,
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Unknown => "unknown",
            ThreatLevel::Normal => "normal",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeaLevelSignal {
    /// Change in metres; the sign is ignored when scoring.
    pub sea_level_change: f64,
    #[serde(default)]
    pub historical_trend: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CyclonicSignal {
    /// Sustained wind speed in km/h.
    pub wind_speed: f64,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub storm_probability: Option<f64>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterQuality {
    pub pollution_level: f64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub salinity: Option<f64>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OceanSignal {
    pub water_quality: WaterQuality,
}

/// Sea-level, cyclone and ocean-quality readings for the marine scorer.
/// Any family may be absent; absent families contribute nothing.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarineSignals {
    #[serde(default)]
    pub sea_level: Option<SeaLevelSignal>,
    #[serde(default)]
    pub cyclonic_activity: Option<CyclonicSignal>,
    #[serde(default)]
    pub ocean_data: Option<OceanSignal>,
}

/// What the threat level was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSources {
    Spectral {
        period_start: Option<String>,
        period_end: Option<String>,
        latest: Option<MonthlyObservation>,
        trends: TrendSummary,
    },
    Marine(MarineSignals),
}

/// Terminal per-region record produced by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data_points")]
    pub observation_count: usize,
    pub threat_level: ThreatLevel,
    pub anomaly_count: usize,
    pub trends: TrendSummary,
    pub insights: String,
    pub recommendations: String,
    pub ai_provider: String,
    pub data_sources: DataSources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceData {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub threat_level: ThreatLevel,
    pub insights: String,
    pub data_sources: DataSources,
    pub ai_provider: String,
}

/// JSON envelope emitted for single-region invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ServiceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceResponse {
    pub fn ok(result: &AnalysisResult) -> Self {
        Self {
            success: true,
            data: Some(ServiceData {
                location: result.location.clone(),
                timestamp: result.timestamp,
                threat_level: result.threat_level,
                insights: result.insights.clone(),
                data_sources: result.data_sources.clone(),
                ai_provider: result.ai_provider.clone(),
            }),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
