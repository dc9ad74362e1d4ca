use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coastal-sentinel")]
#[command(
    about = "Coastal change and threat analysis from Sentinel-2 index time series",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to the SQLite database (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Directory of JSON scene files (overrides config)
    #[arg(short, long, global = true)]
    pub archive: Option<String>,

    /// Skip text generation and use rule-based analysis
    #[arg(long, global = true)]
    pub no_llm: bool,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a single coastal region
    Analyze {
        /// Region name (see `regions`)
        location: String,

        /// Print the JSON service response instead of the report
        #[arg(long)]
        json: bool,

        /// JSON file of sea-level, cyclone and ocean readings; selects the marine scorer
        #[arg(long)]
        marine_signals: Option<String>,

        /// Trailing months to analyze
        #[arg(short, long)]
        months: Option<u32>,
    },

    /// Analyze every registered region
    AnalyzeAll {
        /// Trailing months to analyze
        #[arg(short, long)]
        months: Option<u32>,
    },

    /// List registered regions
    Regions,

    /// Show stored analyses
    History {
        /// Only this location
        #[arg(short, long)]
        location: Option<String>,

        /// Maximum entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        path: String,
    },
}
