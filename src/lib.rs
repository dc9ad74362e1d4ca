pub mod anomaly;
pub mod cli;
pub mod config;
pub mod db;
pub mod imagery;
pub mod indices;
pub mod insights;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod regions;
pub mod threat;
pub mod time_series;
pub mod trend;

// Main entry point
pub mod cli_main;

// Re-export commonly used items
pub use models::{AnalysisResult, MonthlyObservation, ThreatLevel};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig};
