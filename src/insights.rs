use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;

use crate::models::{
    AnnotatedObservation, IndexKind, MarineSignals, MonthlyObservation, ThreatLevel, TrendSummary,
};

pub const RULE_BASED_PROVIDER: &str = "Rule-based analysis";

/// External text-generation collaborator.
pub trait TextGenerator {
    /// Completion for `prompt` from `model`. Empty text counts as a miss.
    fn complete(&self, prompt: &str, model: &str) -> Result<String>;

    fn provider_name(&self) -> &str;
}

/// Everything the narrative is built from.
#[derive(Debug, Clone, Copy)]
pub struct InsightContext<'a> {
    pub location: &'a str,
    pub series: &'a [AnnotatedObservation],
    pub trends: &'a TrendSummary,
    pub anomaly_count: usize,
    pub threat_level: ThreatLevel,
    pub marine: Option<&'a MarineSignals>,
    pub generated_at: DateTime<Utc>,
}

impl<'a> InsightContext<'a> {
    fn latest(&self) -> Option<&'a MonthlyObservation> {
        self.series.last().map(|a| &a.observation)
    }

    fn latest_index(&self, kind: IndexKind) -> Option<f64> {
        self.latest().and_then(|o| o.index(kind))
    }

    fn period(&self) -> String {
        match (self.series.first(), self.series.last()) {
            (Some(first), Some(last)) => format!(
                "{} to {}",
                first.observation.date_label, last.observation.date_label
            ),
            _ => "no observations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insights {
    pub text: String,
    pub provider: String,
    pub recommendations: String,
}

pub struct InsightGenerator<'a> {
    generator: Option<&'a dyn TextGenerator>,
    models: Vec<String>,
}

impl<'a> InsightGenerator<'a> {
    pub fn new(generator: Option<&'a dyn TextGenerator>, models: Vec<String>) -> Self {
        Self { generator, models }
    }

    pub fn rule_based() -> Self {
        Self::new(None, Vec::new())
    }

    /// Tries each model in order and falls back to the rule-based report
    /// when none answers. Never fails.
    pub fn generate(&self, ctx: &InsightContext) -> Insights {
        let recommendations = format_bullets(recommendations(ctx.threat_level));

        if let Some(generator) = self.generator {
            let prompt = build_prompt(ctx);
            for model in &self.models {
                tracing::info!(
                    "🤖 Requesting insights from {} ({})",
                    generator.provider_name(),
                    model
                );
                match generator.complete(&prompt, model) {
                    Ok(text) if !text.trim().is_empty() => {
                        return Insights {
                            text: format!(
                                "{} AI ANALYSIS ({}):\n{}",
                                generator.provider_name().to_uppercase(),
                                model,
                                text.trim()
                            ),
                            provider: format!("{} - {}", generator.provider_name(), model),
                            recommendations,
                        };
                    }
                    Ok(_) => tracing::warn!("⚠️  {} returned an empty completion", model),
                    Err(e) => tracing::warn!("⚠️  {} completion failed: {:#}", model, e),
                }
            }
            tracing::info!("Using rule-based analysis (text generation unavailable)");
        }

        Insights {
            text: rule_based_report(ctx),
            provider: RULE_BASED_PROVIDER.to_string(),
            recommendations,
        }
    }
}

fn fmt_index(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn build_prompt(ctx: &InsightContext) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "As an expert coastal environmental analyst, provide a detailed assessment for {}.",
        ctx.location
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "ENVIRONMENTAL DATA:");
    let _ = writeln!(
        prompt,
        "- Current NDWI (Water Index): {}",
        fmt_index(ctx.latest_index(IndexKind::Ndwi))
    );
    let _ = writeln!(
        prompt,
        "- Current NDCI (Chlorophyll Index): {}",
        fmt_index(ctx.latest_index(IndexKind::Ndci))
    );
    let _ = writeln!(prompt, "- Monitoring Period: {}", ctx.period());
    let _ = writeln!(prompt, "- Data Points Analyzed: {}", ctx.series.len());
    let _ = writeln!(prompt, "- Environmental Anomalies Detected: {}", ctx.anomaly_count);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "TREND ANALYSIS:");
    let _ = writeln!(prompt, "- Annual NDWI Change: {:.4}", ctx.trends.ndwi.annual_change);
    let _ = writeln!(prompt, "- Annual NDCI Change: {:.4}", ctx.trends.ndci.annual_change);

    if let Some(marine) = ctx.marine {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "MARINE CONDITIONS:");
        let _ = write!(prompt, "{}", marine_lines(marine));
    }

    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Computed threat level: {}",
        ctx.threat_level.as_str().to_uppercase()
    );
    let _ = writeln!(prompt);
    prompt.push_str(
        "Please provide a professional assessment covering:\n\
         1. Current coastal health status\n\
         2. Erosion or accretion patterns from the water index\n\
         3. Water quality and algal bloom risk\n\
         4. Threat level evaluation with specific evidence\n\
         5. Recommendations for disaster management authorities\n\
         6. Community impact and safety measures\n\
         7. Long-term monitoring suggestions\n\n\
         Write in clear, actionable language suitable for government officials.\n",
    );
    prompt
}

fn marine_lines(marine: &MarineSignals) -> String {
    let mut lines = String::new();
    if let Some(sea) = &marine.sea_level {
        let _ = writeln!(lines, "- Sea level change: {:.2} m", sea.sea_level_change);
    }
    if let Some(cyclone) = &marine.cyclonic_activity {
        let _ = writeln!(lines, "- Wind speed: {:.1} km/h", cyclone.wind_speed);
        if let Some(p) = cyclone.storm_probability {
            let _ = writeln!(lines, "- Storm probability: {:.0}%", p * 100.0);
        }
    }
    if let Some(ocean) = &marine.ocean_data {
        let _ = writeln!(
            lines,
            "- Pollution level: {:.2}",
            ocean.water_quality.pollution_level
        );
    }
    if lines.is_empty() {
        lines.push_str("- No marine readings supplied\n");
    }
    lines
}

/// Narrative lines selected by fixed thresholds on the latest values and
/// annual trends. Always returns at least one line.
pub fn environmental_findings(
    ndwi: f64,
    ndci: f64,
    trends: &TrendSummary,
    anomaly_count: usize,
) -> Vec<String> {
    let mut findings = Vec::new();
    let ndwi_trend = trends.ndwi.annual_change;
    let ndci_trend = trends.ndci.annual_change;

    if ndwi < -0.3 {
        findings.push(format!(
            "CRITICAL: Severe water recession (NDWI {:.3}). Substantial coastal erosion \
             or water body shrinkage needs immediate attention.",
            ndwi
        ));
    } else if ndwi < -0.2 {
        findings.push(format!(
            "MODERATE: Water recession observed (NDWI {:.3}). \
             Ongoing erosion should be monitored for intervention.",
            ndwi
        ));
    } else if ndwi > 0.4 {
        findings.push(format!(
            "ELEVATED: High water presence (NDWI {:.3}). \
             Possible flooding, accretion or seasonal high water.",
            ndwi
        ));
    }

    if ndci > 0.25 {
        findings.push(format!(
            "ALERT: High chlorophyll (NDCI {:.3}) indicates an active algal bloom. \
             Water quality may be compromised.",
            ndci
        ));
    } else if ndci > 0.15 {
        findings.push(format!(
            "NOTICE: Elevated chlorophyll (NDCI {:.3}) points to algal activity.",
            ndci
        ));
    }

    if ndwi_trend.abs() > 0.15 {
        let direction = if ndwi_trend < 0.0 {
            "accelerating erosion"
        } else {
            "rapid water accumulation"
        };
        findings.push(format!(
            "SIGNIFICANT TREND: Water index changing at {:.3}/year, indicating {}.",
            ndwi_trend, direction
        ));
    }

    if ndci_trend > 0.1 {
        findings.push(format!(
            "INCREASING: Chlorophyll rising at {:.3}/year. Water quality is deteriorating.",
            ndci_trend
        ));
    }

    if anomaly_count > 0 {
        findings.push(format!(
            "DETECTED: {} irregular month(s) flagged by anomaly detection warrant investigation.",
            anomaly_count
        ));
    }

    if findings.is_empty() {
        findings.push(
            "STABLE: Environmental conditions within normal seasonal variation.".to_string(),
        );
    }
    findings
}

pub fn recommendations(level: ThreatLevel) -> &'static [&'static str] {
    match level {
        ThreatLevel::Critical => &[
            "ACTIVATE EMERGENCY RESPONSE PROTOCOLS",
            "Evacuate vulnerable coastal areas if necessary",
            "Mobilize all available response teams and resources",
            "Implement continuous monitoring with hourly updates",
            "Coordinate with national disaster management agencies",
            "Establish emergency operation centers",
        ],
        ThreatLevel::High => &[
            "Issue public advisories about coastal conditions",
            "Deploy rapid assessment teams for field validation",
            "Prepare emergency response resources",
            "Increase sensor deployment for real-time monitoring",
            "Coordinate with state disaster management authorities",
        ],
        ThreatLevel::Medium => &[
            "Increase monitoring frequency to bi-weekly",
            "Alert local authorities and coastal management teams",
            "Conduct field verification of satellite findings",
            "Review historical data for pattern confirmation",
            "Engage with fishing communities for ground reports",
        ],
        ThreatLevel::Low => &[
            "Continue regular monthly monitoring schedule",
            "Maintain community awareness programs",
            "Document baseline environmental conditions",
            "Share findings with local environmental departments",
        ],
        ThreatLevel::Normal | ThreatLevel::Unknown => &[
            "Continue regular monthly monitoring schedule",
            "Verify data sources before the next assessment",
        ],
    }
}

/// Short action list for the report's immediate-response section.
pub fn recommended_actions(level: ThreatLevel) -> &'static [&'static str] {
    match level {
        ThreatLevel::Critical => &[
            "ACTIVATE EMERGENCY RESPONSE PROTOCOLS",
            "Evacuate vulnerable coastal areas if necessary",
            "Mobilize all available response teams",
        ],
        ThreatLevel::High => &[
            "Issue public advisories about coastal conditions",
            "Deploy rapid assessment teams for field validation",
            "Prepare emergency response resources",
        ],
        ThreatLevel::Medium => &[
            "Increase monitoring to bi-weekly frequency",
            "Alert local authorities and coastal management teams",
            "Conduct field verification",
        ],
        ThreatLevel::Low => &[
            "Continue current monitoring frequency (monthly)",
            "Maintain community awareness programs",
            "Document baseline conditions",
        ],
        ThreatLevel::Normal | ThreatLevel::Unknown => {
            &["Continue current monitoring frequency (monthly)"]
        }
    }
}

fn format_bullets(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("• {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic report built from templates.
pub fn rule_based_report(ctx: &InsightContext) -> String {
    let ndwi = ctx.latest_index(IndexKind::Ndwi);
    let ndci = ctx.latest_index(IndexKind::Ndci);
    let level = ctx.threat_level.as_str().to_uppercase();
    let findings = environmental_findings(
        ndwi.unwrap_or(0.0),
        ndci.unwrap_or(0.0),
        ctx.trends,
        ctx.anomaly_count,
    );

    let mut report = String::new();
    let _ = writeln!(report, "🌊 COASTAL INTELLIGENCE REPORT - {}", ctx.location.to_uppercase());
    let _ = writeln!(report, "Generated: {}", ctx.generated_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(report, "Analysis: {}", RULE_BASED_PROVIDER);
    let _ = writeln!(report);
    let _ = writeln!(report, "EXECUTIVE SUMMARY");
    let _ = writeln!(report, "Threat Level: {}", level);
    let _ = writeln!(report, "Data Period: {}", ctx.period());
    let _ = writeln!(report, "Monitoring Points: {} monthly observations", ctx.series.len());
    let _ = writeln!(report, "Anomalies Detected: {}", ctx.anomaly_count);
    let _ = writeln!(report);
    let _ = writeln!(report, "ENVIRONMENTAL METRICS");
    let _ = writeln!(report, "- Water Index (NDWI): {}", fmt_index(ndwi));
    let _ = writeln!(report, "- Chlorophyll Index (NDCI): {}", fmt_index(ndci));
    let _ = writeln!(report);
    let _ = writeln!(report, "TREND ANALYSIS");
    let _ = writeln!(
        report,
        "- Water Index Change: {:.4} per year",
        ctx.trends.ndwi.annual_change
    );
    let _ = writeln!(
        report,
        "- Chlorophyll Change: {:.4} per year",
        ctx.trends.ndci.annual_change
    );
    if let Some(marine) = ctx.marine {
        let _ = writeln!(report);
        let _ = writeln!(report, "MARINE CONDITIONS");
        let _ = write!(report, "{}", marine_lines(marine));
    }
    let _ = writeln!(report);
    let _ = writeln!(report, "FINDINGS");
    for finding in &findings {
        let _ = writeln!(report, "{}", finding);
    }
    let _ = writeln!(report);
    let _ = writeln!(report, "🚨 THREAT ASSESSMENT: {}", level);
    let _ = writeln!(report, "{}", format_bullets(recommendations(ctx.threat_level)));
    let _ = writeln!(report);
    let _ = writeln!(report, "🎯 RECOMMENDED ACTIONS");
    let _ = writeln!(
        report,
        "{}",
        format_bullets(recommended_actions(ctx.threat_level))
    );
    let _ = writeln!(report);
    let _ = writeln!(report, "🔍 NEXT STEPS");
    let _ = writeln!(report, "- Field validation and ground truthing");
    let _ = writeln!(report, "- Continuous satellite monitoring");
    let _ = writeln!(report, "- Community awareness programs");
    let _ = writeln!(report, "- Coordination with local authorities");
    report
}
