use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::anomaly::AnomalyDetectorConfig;
use crate::llm::{SamplingParams, DEFAULT_BASE_URL, DEFAULT_MODELS};
use crate::models::{BoundingBox, Region};
use crate::regions::RegionRegistry;
use crate::time_series::{DEFAULT_CLOUD_THRESHOLD, DEFAULT_SCALE_M};

/// Main configuration structure for coastal-sentinel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Imagery source configuration
    #[serde(default)]
    pub imagery: ImageryConfig,
    /// Analysis parameters
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Text generation configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Optional pipeline stages
    #[serde(default)]
    pub stages: StagesConfig,
    /// Extra regions appended to the built-in registry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageryConfig {
    /// Directory of JSON scene files (default: "./scenes")
    pub archive_dir: Option<String>,
    /// Maximum cloud cover percentage (default: 30)
    pub cloud_threshold: Option<f64>,
    /// Reduction scale in metres (default: 500)
    pub scale_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Trailing months to analyze (default: 12)
    pub months: Option<u32>,
    /// Fewest observations before a region is analyzed (default: 3)
    pub min_observations: Option<usize>,
    /// Expected outlier fraction (default: 0.1)
    pub contamination: Option<f64>,
    /// Anomaly model seed (default: 42)
    pub seed: Option<u64>,
    /// Isolation trees (default: 100)
    pub trees: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Use text generation when an API key is available (default: true)
    pub enabled: Option<bool>,
    /// OpenAI-compatible API root (default: Groq)
    pub base_url: Option<String>,
    /// Environment variable holding the API key (default: "GROQ_API_KEY")
    pub api_key_env: Option<String>,
    /// Models tried in order
    pub models: Option<Vec<String>>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// Request timeout as human readable time (default: "30s")
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Store analyses (default: true)
    pub persistence: Option<bool>,
    /// Upsert map configuration per location (default: true)
    pub map_config: Option<bool>,
    /// Write annotated series JSON here when set
    pub export_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl RegionEntry {
    pub fn to_region(&self) -> Region {
        Region {
            name: self.name.clone(),
            bounds: BoundingBox::new(self.min_lon, self.min_lat, self.max_lon, self.max_lat),
        }
    }
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            archive_dir: Some("./scenes".to_string()),
            cloud_threshold: Some(DEFAULT_CLOUD_THRESHOLD),
            scale_m: Some(DEFAULT_SCALE_M),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            months: Some(12),
            min_observations: Some(3),
            contamination: Some(0.1),
            seed: Some(42),
            trees: Some(100),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            models: Some(DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()),
            temperature: Some(0.7),
            max_tokens: Some(1024),
            top_p: Some(0.8),
            timeout: Some("30s".to_string()),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "coastal_monitoring.sqlite".to_string(),
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            persistence: Some(true),
            map_config: Some(true),
            export_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml_edit::de::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml_edit::ser::to_string_pretty(self)
            .context("Failed to serialize configuration to TOML")?;

        std::fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Merge configuration with command line arguments, prioritizing CLI values
    pub fn merge_with_cli(
        &mut self,
        database_path: Option<String>,
        archive_dir: Option<String>,
        months: Option<u32>,
        no_llm: bool,
    ) {
        if let Some(db_path) = database_path {
            self.database.path = db_path;
        }

        if let Some(dir) = archive_dir {
            self.imagery.archive_dir = Some(dir);
        }

        if let Some(m) = months {
            self.analysis.months = Some(m);
        }

        if no_llm {
            self.llm.enabled = Some(false);
        }
    }

    pub fn get_archive_dir(&self) -> PathBuf {
        PathBuf::from(self.imagery.archive_dir.as_deref().unwrap_or("./scenes"))
    }

    pub fn get_cloud_threshold(&self) -> f64 {
        self.imagery.cloud_threshold.unwrap_or(DEFAULT_CLOUD_THRESHOLD)
    }

    pub fn get_scale_m(&self) -> f64 {
        self.imagery.scale_m.unwrap_or(DEFAULT_SCALE_M)
    }

    pub fn get_months(&self) -> u32 {
        self.analysis.months.unwrap_or(12)
    }

    pub fn get_min_observations(&self) -> usize {
        self.analysis.min_observations.unwrap_or(3)
    }

    pub fn get_anomaly_config(&self) -> AnomalyDetectorConfig {
        let defaults = AnomalyDetectorConfig::default();
        AnomalyDetectorConfig {
            contamination: self.analysis.contamination.unwrap_or(defaults.contamination),
            seed: self.analysis.seed.unwrap_or(defaults.seed),
            trees: self.analysis.trees.unwrap_or(defaults.trees),
            ..defaults
        }
    }

    pub fn get_llm_enabled(&self) -> bool {
        self.llm.enabled.unwrap_or(true)
    }

    pub fn get_base_url(&self) -> String {
        self.llm
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn get_api_key_env(&self) -> String {
        self.llm
            .api_key_env
            .clone()
            .unwrap_or_else(|| "GROQ_API_KEY".to_string())
    }

    /// API key read from the configured environment variable, if set and non-empty.
    pub fn get_api_key(&self) -> Option<String> {
        std::env::var(self.get_api_key_env())
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn get_models(&self) -> Vec<String> {
        self.llm
            .models
            .clone()
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(|m| m.to_string()).collect())
    }

    pub fn get_sampling(&self) -> SamplingParams {
        let defaults = SamplingParams::default();
        SamplingParams {
            temperature: self.llm.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.llm.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: self.llm.top_p.unwrap_or(defaults.top_p),
        }
    }

    pub fn get_llm_timeout(&self) -> Duration {
        let timeout_str = self.llm.timeout.as_deref().unwrap_or("30s");
        humantime::parse_duration(timeout_str).unwrap_or(Duration::from_secs(30))
    }

    pub fn get_persistence_enabled(&self) -> bool {
        self.stages.persistence.unwrap_or(true)
    }

    pub fn get_map_config_enabled(&self) -> bool {
        self.stages.map_config.unwrap_or(true)
    }

    pub fn get_export_dir(&self) -> Option<PathBuf> {
        self.stages.export_dir.as_deref().map(PathBuf::from)
    }

    pub fn get_registry(&self) -> RegionRegistry {
        let extras: Vec<Region> = self.regions.iter().map(RegionEntry::to_region).collect();
        RegionRegistry::with_extras(&extras)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let cloud = self.get_cloud_threshold();
        if !(0.0..=100.0).contains(&cloud) {
            return Err(anyhow!(
                "cloud_threshold must be between 0 and 100, got: {}",
                cloud
            ));
        }

        if self.get_scale_m() <= 0.0 {
            return Err(anyhow!("scale_m must be positive"));
        }

        if self.get_months() == 0 {
            return Err(anyhow!("Analysis span must cover at least one month"));
        }

        let contamination = self.get_anomaly_config().contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(anyhow!(
                "contamination must be in (0, 0.5], got: {}",
                contamination
            ));
        }

        if self.get_anomaly_config().trees == 0 {
            return Err(anyhow!("trees must be at least 1"));
        }

        if self.get_llm_enabled() && self.get_models().is_empty() {
            return Err(anyhow!(
                "At least one model must be listed when text generation is enabled"
            ));
        }

        if let Some(ref timeout_str) = self.llm.timeout {
            humantime::parse_duration(timeout_str)
                .with_context(|| format!("Invalid llm timeout format: {}", timeout_str))?;
        }

        for entry in &self.regions {
            if entry.name.trim().is_empty() {
                return Err(anyhow!("Region names must not be empty"));
            }
            if !entry.to_region().bounds.is_valid() {
                return Err(anyhow!("Region '{}' has invalid bounds", entry.name));
            }
        }

        Ok(())
    }
}
