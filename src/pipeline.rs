use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::anomaly::{anomaly_count, AnomalyDetector, AnomalyDetectorConfig};
use crate::config::Config;
use crate::db::{DocumentStore, SqliteStore, ANALYSIS_COLLECTION, MAP_CONFIG_COLLECTION};
use crate::imagery::{ImagerySource, SceneArchive};
use crate::insights::{InsightContext, InsightGenerator, TextGenerator};
use crate::llm::GroqClient;
use crate::models::{
    AnalysisResult, AnnotatedObservation, DataSources, MarineSignals, Region, ServiceResponse,
    TrendSummary,
};
use crate::regions::RegionRegistry;
use crate::threat::{self, SpectralSignals, ThreatSignals};
use crate::time_series::{MonthSpan, TimeSeriesExtractor};
use crate::trend::TrendAnalyzer;

pub const MAP_ZOOM: u32 = 10;
pub const MAP_LAYERS: [&str; 3] = ["NDWI", "NDCI", "threat_heatmap"];

/// Stages that can be switched off without affecting the analysis itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Stages {
    pub persistence: bool,
    pub map_config: bool,
    pub export_dir: Option<PathBuf>,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            persistence: true,
            map_config: true,
            export_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub months: u32,
    pub cloud_threshold: f64,
    pub scale_m: f64,
    /// Regions with fewer observations are not analyzed.
    pub min_observations: usize,
    pub anomaly: AnomalyDetectorConfig,
    pub models: Vec<String>,
    pub stages: Stages,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            months: config.get_months(),
            cloud_threshold: config.get_cloud_threshold(),
            scale_m: config.get_scale_m(),
            min_observations: config.get_min_observations(),
            anomaly: config.get_anomaly_config(),
            models: config.get_models(),
            stages: Stages {
                persistence: config.get_persistence_enabled(),
                map_config: config.get_map_config_enabled(),
                export_dir: config.get_export_dir(),
            },
        }
    }
}

/// External handles the pipeline runs against.
pub struct Collaborators {
    pub imagery: Box<dyn ImagerySource>,
    pub text: Option<Box<dyn TextGenerator>>,
    pub store: Option<Box<dyn DocumentStore>>,
    pub registry: RegionRegistry,
}

impl Collaborators {
    /// Builds every collaborator the configuration asks for.
    pub fn from_config(config: &Config) -> Result<Self> {
        let imagery = SceneArchive::open(config.get_archive_dir())?;

        let text: Option<Box<dyn TextGenerator>> = if !config.get_llm_enabled() {
            tracing::info!("Text generation disabled, using rule-based analysis");
            None
        } else if let Some(api_key) = config.get_api_key() {
            let client = GroqClient::new(
                &config.get_base_url(),
                api_key,
                config.get_sampling(),
                config.get_llm_timeout(),
            )?;
            tracing::info!("🤖 Text generation via {}", config.get_base_url());
            Some(Box::new(client))
        } else {
            tracing::warn!(
                "⚠️  {} not set, using rule-based analysis",
                config.get_api_key_env()
            );
            None
        };

        let store: Option<Box<dyn DocumentStore>> =
            if config.get_persistence_enabled() || config.get_map_config_enabled() {
                match SqliteStore::open(&config.database.path) {
                    Ok(store) => Some(Box::new(store)),
                    Err(e) => {
                        tracing::warn!("⚠️  Persistence unavailable: {:#}", e);
                        None
                    }
                }
            } else {
                None
            };

        Ok(Self {
            imagery: Box::new(imagery),
            text,
            store,
            registry: config.get_registry(),
        })
    }
}

/// Sequences extraction, anomaly detection, trend fitting, threat scoring
/// and insight generation for one region at a time.
pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    reference_date: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            reference_date: None,
        }
    }

    /// Fixes "today" for the trailing month span.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.collaborators.registry
    }

    fn span(&self) -> MonthSpan {
        let today = self
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive());
        MonthSpan::trailing(today, self.config.months)
    }

    /// Full analysis of one region. `Ok(None)` means too few observations.
    pub fn try_run(
        &self,
        location: &str,
        marine: Option<&MarineSignals>,
    ) -> Result<Option<AnalysisResult>> {
        let region = self.collaborators.registry.require(location)?.clone();
        tracing::info!("🌊 Analyzing {}", region.name);

        let extractor = TimeSeriesExtractor::new(
            self.collaborators.imagery.as_ref(),
            self.config.cloud_threshold,
            self.config.scale_m,
        );
        let series = extractor.extract(&region, self.span());

        if series.len() < self.config.min_observations {
            tracing::warn!(
                "⚠️  Insufficient data for {}: {} observations, need {}",
                region.name,
                series.len(),
                self.config.min_observations
            );
            return Ok(None);
        }

        let annotated = AnomalyDetector::new(self.config.anomaly.clone()).detect(&series);
        let anomalies = anomaly_count(&annotated);
        let trends = TrendAnalyzer::new().analyze(&series);

        let signals = match marine {
            Some(m) => ThreatSignals::Marine(*m),
            None => ThreatSignals::Spectral(SpectralSignals::new(trends, series.last())),
        };
        let threat_level = threat::assess(&signals);

        let generated_at = Utc::now();
        let ctx = InsightContext {
            location: &region.name,
            series: &annotated,
            trends: &trends,
            anomaly_count: anomalies,
            threat_level,
            marine,
            generated_at,
        };
        let insights =
            InsightGenerator::new(self.collaborators.text.as_deref(), self.config.models.clone())
                .generate(&ctx);

        let data_sources = match marine {
            Some(m) => DataSources::Marine(*m),
            None => DataSources::Spectral {
                period_start: series.first().map(|o| o.date_label.clone()),
                period_end: series.last().map(|o| o.date_label.clone()),
                latest: series.last().cloned(),
                trends,
            },
        };

        let result = AnalysisResult {
            location: region.name.clone(),
            timestamp: generated_at,
            observation_count: series.len(),
            threat_level,
            anomaly_count: anomalies,
            trends,
            insights: insights.text,
            recommendations: insights.recommendations,
            ai_provider: insights.provider,
            data_sources,
        };

        tracing::info!(
            "✅ {}: threat level {} ({} anomalies, {})",
            result.location,
            result.threat_level,
            result.anomaly_count,
            result.ai_provider
        );

        self.run_stages(&region, &result, &annotated, &trends);
        Ok(Some(result))
    }

    /// Like [`Pipeline::try_run`] but any fault is logged and yields `None`.
    pub fn run(&self, location: &str, marine: Option<&MarineSignals>) -> Option<AnalysisResult> {
        match self.try_run(location, marine) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("❌ Analysis of {} failed: {:#}", location, e);
                None
            }
        }
    }

    /// Every registered region in registry order.
    pub fn run_batch(&self) -> Vec<(String, Option<AnalysisResult>)> {
        self.collaborators
            .registry
            .iter()
            .map(|region| (region.name.clone(), self.run(&region.name, None)))
            .collect()
    }

    /// Single-region envelope for machine callers.
    pub fn respond(&self, location: &str, marine: Option<&MarineSignals>) -> ServiceResponse {
        match self.try_run(location, marine) {
            Ok(Some(result)) => ServiceResponse::ok(&result),
            Ok(None) => ServiceResponse::failure(format!("Insufficient data for {}", location)),
            Err(e) => {
                tracing::error!("❌ Analysis of {} failed: {:#}", location, e);
                ServiceResponse::failure(format!("{:#}", e))
            }
        }
    }

    fn run_stages(
        &self,
        region: &Region,
        result: &AnalysisResult,
        annotated: &[AnnotatedObservation],
        trends: &TrendSummary,
    ) {
        let stages = &self.config.stages;

        if let Some(store) = self.collaborators.store.as_deref() {
            if stages.persistence {
                match persist_analysis(store, result) {
                    Ok(id) => tracing::info!("💾 Stored analysis {} for {}", id, result.location),
                    Err(e) => tracing::warn!(
                        "⚠️  Failed to store analysis for {}: {:#}",
                        result.location,
                        e
                    ),
                }
            }
            if stages.map_config {
                if let Err(e) = upsert_map_config(store, region, result) {
                    tracing::warn!(
                        "⚠️  Failed to update map configuration for {}: {:#}",
                        result.location,
                        e
                    );
                }
            }
        }

        if let Some(dir) = &stages.export_dir {
            match export_series(dir, result, annotated, trends) {
                Ok(path) => tracing::info!("📁 Exported series to {}", path.display()),
                Err(e) => tracing::warn!(
                    "⚠️  Failed to export series for {}: {:#}",
                    result.location,
                    e
                ),
            }
        }
    }
}

fn persist_analysis(store: &dyn DocumentStore, result: &AnalysisResult) -> Result<i64> {
    let document = serde_json::to_value(result).context("Failed to serialize analysis")?;
    store.insert_one(ANALYSIS_COLLECTION, &document)
}

pub fn map_config_document(region: &Region, result: &AnalysisResult) -> serde_json::Value {
    let b = &region.bounds;
    json!({
        "location": region.name,
        "center": b.center(),
        "bounds": [[b.min_lat, b.min_lon], [b.max_lat, b.max_lon]],
        "zoom": MAP_ZOOM,
        "layers": MAP_LAYERS,
        "style": "satellite",
        "threat_level": result.threat_level,
        "updated_at": result.timestamp.to_rfc3339(),
    })
}

fn upsert_map_config(
    store: &dyn DocumentStore,
    region: &Region,
    result: &AnalysisResult,
) -> Result<()> {
    store.upsert(
        MAP_CONFIG_COLLECTION,
        &region.name,
        &map_config_document(region, result),
    )
}

/// `Goa Coast` becomes `<dir>/Goa_Coast_analysis.json`.
pub fn export_path(dir: &Path, location: &str) -> PathBuf {
    dir.join(format!("{}_analysis.json", location.replace(' ', "_")))
}

fn export_series(
    dir: &Path,
    result: &AnalysisResult,
    annotated: &[AnnotatedObservation],
    trends: &TrendSummary,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;

    let document = json!({
        "location": result.location,
        "generated_at": result.timestamp.to_rfc3339(),
        "threat_level": result.threat_level,
        "anomaly_count": result.anomaly_count,
        "trends": trends,
        "series": annotated,
    });
    let path = export_path(dir, &result.location);
    let content = serde_json::to_string_pretty(&document)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, ThreatLevel};

    #[test]
    fn test_export_path_replaces_spaces() {
        let path = export_path(Path::new("/tmp/out"), "Pulicat Lake");
        assert_eq!(path, PathBuf::from("/tmp/out/Pulicat_Lake_analysis.json"));
    }

    #[test]
    fn test_pipeline_config_from_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.months, 12);
        assert_eq!(config.min_observations, 3);
        assert_eq!(config.anomaly.min_observations, 5);
        assert_eq!(config.models.len(), 4);
        assert_eq!(config.stages, Stages::default());
    }

    #[test]
    fn test_map_config_document_shape() {
        let region = Region {
            name: "Kochi".to_string(),
            bounds: BoundingBox::new(76.0, 9.8, 76.5, 10.2),
        };
        let result = AnalysisResult {
            location: "Kochi".to_string(),
            timestamp: Utc::now(),
            observation_count: 6,
            threat_level: ThreatLevel::Medium,
            anomaly_count: 0,
            trends: TrendSummary::default(),
            insights: String::new(),
            recommendations: String::new(),
            ai_provider: "Rule-based analysis".to_string(),
            data_sources: DataSources::Marine(MarineSignals::default()),
        };
        let doc = map_config_document(&region, &result);
        assert_eq!(doc["zoom"], 10);
        assert_eq!(doc["style"], "satellite");
        assert_eq!(doc["layers"][2], "threat_heatmap");
        assert_eq!(doc["threat_level"], "medium");
        assert!((doc["center"][0].as_f64().unwrap() - 10.0).abs() < 1e-10);
        assert!((doc["center"][1].as_f64().unwrap() - 76.25).abs() < 1e-10);
    }
}
