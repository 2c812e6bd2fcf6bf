use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

use driftwatch::alerts::Transition;
use driftwatch::config::Config;
use driftwatch::models::{
    Alert, DriftReport, GroundTruthRecord, HealthStatus, PerformanceMetrics, PredictionRecord,
};
use driftwatch::{Daemon, DriftWatch};

#[derive(Parser)]
#[command(name = "driftwatch")]
#[command(author, version, about = "Model drift detection and monitoring")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and the API until Ctrl-C
    Run,

    /// Run one monitoring cycle now
    Cycle,

    /// Show the latest drift report
    Report {
        /// Only reports for this model version
        #[arg(short, long)]
        model_version: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Manage alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Register a model version from its training predictions (JSON lines)
    Register {
        /// Model version name
        version: String,

        /// Training prediction records, one JSON object per line
        file: PathBuf,

        /// Training metrics as a JSON object
        #[arg(short, long)]
        metrics: Option<PathBuf>,

        /// Training positive rate (default: predicted positive fraction)
        #[arg(short, long)]
        positive_rate: Option<f64>,
    },

    /// Import predictions or labels (JSON lines)
    Import {
        #[arg(value_enum)]
        kind: ImportKind,

        file: PathBuf,
    },

    /// Delete records past the retention horizon
    Prune,

    /// Show scheduler and model status
    Status,

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum AlertAction {
    /// List alerts
    List {
        /// Include resolved alerts
        #[arg(short, long)]
        all: bool,
    },

    /// Acknowledge an alert
    Ack { id: i64 },

    /// Resolve an alert
    Resolve { id: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImportKind {
    Predictions,
    Labels,
}

/// Table row for per-feature drift
#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "PSI")]
    psi: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Mean Δ%")]
    mean_change: String,
}

/// Table row for alert list
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    alert_type: String,
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Triggered")]
    triggered: String,
    #[tabled(rename = "State")]
    state: String,
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

pub async fn run_command(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Cycle => cmd_cycle(config),
        Commands::Report { model_version, json } => cmd_report(config, model_version, json),
        Commands::Alerts { action } => cmd_alerts(config, action),
        Commands::Register {
            version,
            file,
            metrics,
            positive_rate,
        } => cmd_register(config, version, file, metrics, positive_rate),
        Commands::Import { kind, file } => cmd_import(config, kind, file),
        Commands::Prune => cmd_prune(config),
        Commands::Status => cmd_status(config),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_run(config: Config) -> Result<()> {
    println!("Starting driftwatch...");
    let api_bind = config.api.enabled.then(|| config.api.bind.clone());

    let driftwatch = DriftWatch::new(config)?;
    let daemon = Daemon::new(driftwatch);
    let shutdown = daemon.shutdown_handle();

    // Handle signals
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            let _ = shutdown.send(()).await;
        }
    });

    if let Some(bind) = api_bind {
        println!("API listening on {}", bind.cyan());
    }
    daemon.run().await
}

fn cmd_cycle(config: Config) -> Result<()> {
    let driftwatch = DriftWatch::new(config)?;

    match driftwatch.run_cycle()? {
        Some(outcome) => {
            print_report(&outcome.report);
            for change in &outcome.changes {
                let verb = match change.transition {
                    Transition::Opened => "Opened".red().bold(),
                    Transition::Escalated { .. } => "Escalated".red().bold(),
                    Transition::Resolved => "Resolved".green().bold(),
                };
                println!("{} {}", verb, change.alert.title);
            }
        }
        None => println!("{} a cycle for this model version is already running", "Note:".yellow().bold()),
    }

    Ok(())
}

fn cmd_report(config: Config, model_version: Option<String>, json: bool) -> Result<()> {
    let driftwatch = DriftWatch::new(config)?;

    let Some(report) = driftwatch.latest_report(model_version.as_deref())? else {
        println!("No drift report found");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn cmd_alerts(config: Config, action: AlertAction) -> Result<()> {
    let driftwatch = DriftWatch::new(config)?;

    match action {
        AlertAction::List { all } => {
            let alerts = driftwatch.alerts(all)?;
            if alerts.is_empty() {
                println!("No alerts");
                return Ok(());
            }
            let rows: Vec<AlertRow> = alerts.iter().map(alert_row).collect();
            println!("{}", Table::new(rows));
        }
        AlertAction::Ack { id } => {
            let alert = driftwatch.acknowledge_alert(id)?;
            println!("{} {}", "Acknowledged:".green().bold(), alert.title);
        }
        AlertAction::Resolve { id } => {
            let alert = driftwatch.resolve_alert(id)?;
            println!("{} {}", "Resolved:".green().bold(), alert.title);
        }
    }

    Ok(())
}

fn cmd_register(
    config: Config,
    version: String,
    file: PathBuf,
    metrics: Option<PathBuf>,
    positive_rate: Option<f64>,
) -> Result<()> {
    let records: Vec<PredictionRecord> = read_jsonl(&file)?;
    let training_metrics = match metrics {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read metrics file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse metrics file: {}", path.display()))?
        }
        None => PerformanceMetrics::default(),
    };

    let driftwatch = DriftWatch::new(config)?;
    let model = driftwatch.register_model(&version, &records, training_metrics, positive_rate)?;

    println!(
        "{} model {} ({} training samples, positive rate {:.4})",
        "Registered".green().bold(),
        model.version,
        model.training_samples,
        model.baseline_positive_rate
    );
    Ok(())
}

fn cmd_import(config: Config, kind: ImportKind, file: PathBuf) -> Result<()> {
    let driftwatch = DriftWatch::new(config)?;

    let count = match kind {
        ImportKind::Predictions => driftwatch.ingest_predictions(&read_jsonl::<PredictionRecord>(&file)?)?,
        ImportKind::Labels => driftwatch.ingest_labels(&read_jsonl::<GroundTruthRecord>(&file)?)?,
    };

    println!("{} {} records from {}", "Imported".green().bold(), count, file.display());
    Ok(())
}

fn cmd_prune(config: Config) -> Result<()> {
    let days = config.retention.days;
    let driftwatch = DriftWatch::new(config)?;
    let stats = driftwatch.prune()?;

    println!("{}", format!("=== Pruned records older than {} days ===", days).bold());
    println!("Predictions:        {}", stats.predictions);
    println!("Ground truth:       {}", stats.ground_truth);
    println!("Feature snapshots:  {}", stats.feature_statistics);
    println!("Drift reports:      {}", stats.drift_reports);
    println!("Metrics points:     {}", stats.metrics_history);
    println!("Resolved alerts:    {}", stats.alerts);
    Ok(())
}

fn cmd_status(config: Config) -> Result<()> {
    let driftwatch = DriftWatch::new(config)?;

    println!("{}", "=== driftwatch Status ===".bold());
    println!();
    match driftwatch.active_model() {
        Ok(model) => println!(
            "Model version:   {} (registered {})",
            model.version.cyan(),
            model.registered_at.format("%Y-%m-%d %H:%M")
        ),
        Err(_) => println!("Model version:   {}", "none registered".yellow()),
    }

    match driftwatch.latest_report(None)? {
        Some(report) => {
            let age = (chrono::Utc::now() - report.report_timestamp).num_seconds();
            println!("Last report:     {}s ago, {}", age, status_label(report.overall_status));
        }
        None => println!("Last report:     {}", "never".yellow()),
    }
    println!("Open alerts:     {}", driftwatch.alerts(false)?.len());
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

/// Parse one JSON object per non-blank line
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn status_label(status: HealthStatus) -> ColoredString {
    let label = status.to_string().to_uppercase();
    match status {
        HealthStatus::Healthy => label.green().bold(),
        HealthStatus::Warning => label.yellow().bold(),
        HealthStatus::Critical => label.red().bold(),
        HealthStatus::Unknown => label.dimmed(),
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn alert_row(alert: &Alert) -> AlertRow {
    let state = if alert.resolved {
        "resolved"
    } else if alert.acknowledged {
        "acknowledged"
    } else {
        "open"
    };
    AlertRow {
        id: alert.id.map(|id| id.to_string()).unwrap_or_default(),
        alert_type: alert.alert_type.to_string(),
        feature: alert.feature_name.clone().unwrap_or_default(),
        severity: status_label(alert.severity).to_string(),
        value: format!("{:.4}", alert.metric_value),
        triggered: alert.triggered_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        state: state.to_string(),
    }
}

fn print_report(report: &DriftReport) {
    println!("{}", "=== Drift Report ===".bold());
    println!();
    println!("Model version:   {}", report.model_version);
    println!(
        "Window:          {} .. {}",
        report.window_start.format("%Y-%m-%d %H:%M:%S"),
        report.window_end.format("%Y-%m-%d %H:%M:%S")
    );
    println!("Predictions:     {}", report.total_predictions);
    println!("Overall status:  {}", status_label(report.overall_status));

    if !report.feature_drift.is_empty() {
        let rows: Vec<FeatureRow> = report
            .feature_drift
            .iter()
            .map(|f| FeatureRow {
                feature: f.feature_name.clone(),
                status: status_label(f.health).to_string(),
                psi: fmt_opt(f.psi, 4),
                severity: f.severity.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                mean_change: fmt_opt(f.mean_change_pct, 1),
            })
            .collect();
        println!("\n{}", Table::new(rows));
    }

    let prediction = &report.prediction_drift;
    println!("\n{}", "Prediction drift:".bold());
    println!(
        "  KS statistic {} (p = {}), positive rate {:.4} -> {}  {}",
        fmt_opt(prediction.statistic, 4),
        fmt_opt(prediction.p_value, 4),
        prediction.baseline_positive_rate,
        fmt_opt(prediction.current_positive_rate, 4),
        status_label(prediction.health)
    );

    let performance = &report.performance;
    println!("{}", "Performance:".bold());
    println!(
        "  {} labelled, accuracy {}, f1 {}, auc {}  {}",
        performance.matched_count,
        fmt_opt(performance.metrics.accuracy, 4),
        fmt_opt(performance.metrics.f1_score, 4),
        fmt_opt(performance.metrics.auc_roc, 4),
        status_label(performance.health)
    );
    if !performance.degraded_metrics.is_empty() {
        println!("  Degraded: {}", performance.degraded_metrics.join(", ").red());
    }

    println!("\n{}", report.recommendation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["driftwatch", "-d", "alerts", "ack", "7"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Alerts { action: AlertAction::Ack { id: 7 } }));

        let cli = Cli::try_parse_from(["driftwatch", "import", "labels", "labels.jsonl"]).unwrap();
        assert!(matches!(cli.command, Commands::Import { kind: ImportKind::Labels, .. }));

        assert!(Cli::try_parse_from(["driftwatch", "import", "bans", "x.jsonl"]).is_err());
    }

    #[test]
    fn test_read_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"transaction_id":"tx-1","actual_label":1,"label_source":"chargeback","created_at":"2026-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"transaction_id":"tx-2","actual_label":0,"label_source":null,"created_at":"2026-01-01T00:05:00Z"}}"#
        )
        .unwrap();

        let labels: Vec<GroundTruthRecord> = read_jsonl(file.path()).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].transaction_id, "tx-1");
        assert_eq!(labels[1].actual_label, 0);

        writeln!(file, "not json").unwrap();
        let err = read_jsonl::<GroundTruthRecord>(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(":4: invalid record"));
    }
}
