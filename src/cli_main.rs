use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::models::{AnalysisResult, MarineSignals, ServiceResponse};
use crate::pipeline::{Collaborators, Pipeline, PipelineConfig};

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::InitConfig { path } => {
            Config::default().to_file(path)?;
            println!("Wrote default configuration to {}", path);
        }
        Commands::Regions => {
            let config = load_config(&cli, None)?;
            let registry = config.get_registry();
            println!("{} regions:", registry.len());
            for region in registry.iter() {
                let b = &region.bounds;
                println!(
                    "  {:<16} lon {:.2}..{:.2}  lat {:.2}..{:.2}",
                    region.name, b.min_lon, b.max_lon, b.min_lat, b.max_lat
                );
            }
        }
        Commands::History { location, limit } => {
            let config = load_config(&cli, None)?;
            let store = SqliteStore::open(&config.database.path)?;
            let analyses = store.recent_analyses(location.as_deref(), *limit)?;
            if analyses.is_empty() {
                println!("No stored analyses");
            }
            for analysis in analyses {
                let doc = &analysis.document;
                println!(
                    "{}  {:<16} threat: {:<8} anomalies: {:<3} {}",
                    analysis.created_at,
                    analysis.location.as_deref().unwrap_or("?"),
                    doc["threat_level"].as_str().unwrap_or("?"),
                    doc["anomaly_count"].as_u64().unwrap_or(0),
                    doc["ai_provider"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Analyze {
            location,
            json,
            marine_signals,
            months,
        } => {
            if *json {
                let response =
                    json_response(&cli, location, marine_signals.as_deref(), *months);
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                let config = load_config(&cli, *months)?;
                let marine = marine_signals
                    .as_deref()
                    .map(load_marine_signals)
                    .transpose()?;
                let pipeline = build_pipeline(&config)?;
                let result = pipeline
                    .run(location, marine.as_ref())
                    .with_context(|| format!("No analysis produced for {}", location))?;
                print_report(&result);
            }
        }
        Commands::AnalyzeAll { months } => {
            let config = load_config(&cli, *months)?;
            let pipeline = build_pipeline(&config)?;
            let results = pipeline.run_batch();

            println!();
            println!("Batch summary:");
            for (location, result) in &results {
                match result {
                    Some(r) => println!(
                        "  {}: {} | Threat: {} | Anomalies: {}",
                        location,
                        r.ai_provider,
                        r.threat_level.as_str().to_uppercase(),
                        r.anomaly_count
                    ),
                    None => println!("  {}: no result", location),
                }
            }
            let completed = results.iter().filter(|(_, r)| r.is_some()).count();
            println!("{}/{} regions analyzed", completed, results.len());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli, months: Option<u32>) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.merge_with_cli(cli.database.clone(), cli.archive.clone(), months, cli.no_llm);
    config.validate()?;
    Ok(config)
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    tracing::info!("📊 Database: {}", config.database.path);
    tracing::info!("🛰️  Scene archive: {}", config.get_archive_dir().display());
    let collaborators = Collaborators::from_config(config)?;
    Ok(Pipeline::new(PipelineConfig::from_config(config), collaborators))
}

/// Service envelope for `analyze --json`; setup failures become
/// `success: false` instead of a process error.
fn json_response(
    cli: &Cli,
    location: &str,
    marine_signals: Option<&str>,
    months: Option<u32>,
) -> ServiceResponse {
    let setup = || -> Result<(Pipeline, Option<MarineSignals>)> {
        let config = load_config(cli, months)?;
        let marine = marine_signals.map(load_marine_signals).transpose()?;
        Ok((build_pipeline(&config)?, marine))
    };

    match setup() {
        Ok((pipeline, marine)) => pipeline.respond(location, marine.as_ref()),
        Err(e) => {
            tracing::error!("❌ Analysis of {} failed: {:#}", location, e);
            ServiceResponse::failure(format!("{:#}", e))
        }
    }
}

fn load_marine_signals(path: &str) -> Result<MarineSignals> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read marine signals: {}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse marine signals: {}", path))
}

fn print_report(result: &AnalysisResult) {
    println!("{}", result.insights);
    println!();
    println!("Recommendations:");
    println!("{}", result.recommendations);
    println!();
    println!(
        "{} | {} observations | threat {} | {} anomalies | {}",
        result.location,
        result.observation_count,
        result.threat_level,
        result.anomaly_count,
        result.ai_provider
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn test_json_response_missing_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("missing");
        let cli = parse(&[
            "coastal-sentinel",
            "--no-llm",
            "--archive",
            archive.to_str().unwrap(),
            "analyze",
            "Kochi",
            "--json",
        ]);

        let response = json_response(&cli, "Kochi", None, None);
        assert!(!response.success);
        assert!(response.data.is_none());
        assert!(response
            .error
            .unwrap()
            .contains("Failed to read scene archive"));
    }

    #[test]
    fn test_json_response_bad_marine_file() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("scenes");
        std::fs::create_dir(&archive).unwrap();
        let marine = dir.path().join("marine.json");
        std::fs::write(&marine, "{not json").unwrap();
        let cli = parse(&[
            "coastal-sentinel",
            "--no-llm",
            "--archive",
            archive.to_str().unwrap(),
            "analyze",
            "Kochi",
            "--json",
        ]);

        let response = json_response(&cli, "Kochi", marine.to_str(), None);
        assert!(!response.success);
        assert!(response
            .error
            .unwrap()
            .contains("Failed to parse marine signals"));
    }

    #[test]
    fn test_json_response_empty_archive_reports_insufficient_data() {
        let dir = tempdir().unwrap();
        let database = dir.path().join("coastal.sqlite");
        let cli = parse(&[
            "coastal-sentinel",
            "--no-llm",
            "--archive",
            dir.path().to_str().unwrap(),
            "--database",
            database.to_str().unwrap(),
            "analyze",
            "Kochi",
            "--json",
        ]);

        let response = json_response(&cli, "Kochi", None, None);
        assert!(!response.success);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("Insufficient data"));
    }
}
