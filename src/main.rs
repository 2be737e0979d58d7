use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use prospect_pipeline::config::Config;
use prospect_pipeline::domain::{BatchExecution, QualityMetric, SourceRecord};
use prospect_pipeline::logging;
use prospect_pipeline::observability::metrics;
use prospect_pipeline::pipeline::{EtlOrchestrator, EtlStageConnector, PipelineOrchestrator};
use prospect_pipeline::processing::alerts::{priority_score, AlertDigest, AlertEngine};
use prospect_pipeline::storage::{InMemoryRepository, Repository};

#[derive(Parser)]
#[command(name = "prospect-pipeline")]
#[command(about = "Batch ETL pipeline for multi-source prospect data")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a file of staged source records
    Run {
        /// JSON file with an array of source records
        #[arg(long)]
        input: String,
    },
    /// Drive a single extraction batch through the six ETL phases
    Batch {
        /// JSON file with an array of source records
        #[arg(long)]
        input: String,
    },
    /// Evaluate quality-metric values against the alert thresholds and
    /// print the resulting digest
    Digest {
        #[arg(long)]
        coverage: f64,
        #[arg(long)]
        validation: f64,
        #[arg(long)]
        outlier: f64,
    },
    /// Run the pipeline repeatedly and report per-stage health
    Health {
        /// JSON file with an array of source records
        #[arg(long)]
        input: String,
        /// Number of pipeline runs to aggregate over
        #[arg(long, default_value_t = 3)]
        runs: u32,
    },
}

/// One staged record as supplied by an input file; ids and the batch
/// assignment are generated on load.
#[derive(serde::Deserialize)]
struct InputRecord {
    source_id: String,
    name: String,
    position: String,
    school: String,
    #[serde(default)]
    attributes: HashMap<String, f64>,
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

async fn stage_input(
    repo: &dyn Repository,
    input: &str,
    extraction_id: Uuid,
) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(input)?;
    let inputs: Vec<InputRecord> = serde_json::from_str(&content)?;
    let records: Vec<SourceRecord> = inputs
        .into_iter()
        .map(|r| SourceRecord {
            id: Uuid::new_v4(),
            source_id: r.source_id,
            extraction_id,
            name: r.name,
            position: r.position,
            school: r.school,
            attributes: r.attributes,
            raw: serde_json::Value::Null,
        })
        .collect();
    repo.stage_source_records(&records).await?;
    info!("staged {} records from {}", records.len(), input);
    Ok(records.len())
}

fn build_pipeline(
    config: &Config,
    repo: Arc<InMemoryRepository>,
    extraction_id: Uuid,
) -> PipelineOrchestrator {
    let etl = Arc::new(EtlOrchestrator::new(repo, config));
    let mut orchestrator = PipelineOrchestrator::new(config.orchestrator.clone());
    orchestrator.register_stage("etl_batch", Arc::new(EtlStageConnector::new(etl, extraction_id)), 1);
    orchestrator
}

fn print_batch(execution: &BatchExecution) {
    println!("\nBatch {} -> {:?}", execution.extraction_id, execution.status);
    for phase in &execution.phases {
        println!(
            "  {:<10} {:?}  {} records{}",
            phase.phase.as_str(),
            phase.status,
            phase.records_processed,
            phase
                .error
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    let counts = &execution.merge_counts;
    println!(
        "  merged: {} entities ({} grades, {} measurements, {} stats)",
        counts.entities_merged, counts.grades_merged, counts.measurements_merged, counts.stats_merged
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();
    if let Err(e) = metrics::init() {
        warn!("metrics recorder not installed: {}", e);
    }

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { input } => {
            let repo = Arc::new(InMemoryRepository::new());
            let extraction_id = Uuid::new_v4();
            stage_input(repo.as_ref(), &input, extraction_id).await?;

            let orchestrator = build_pipeline(&config, repo.clone(), extraction_id);
            let execution = orchestrator.execute_pipeline("cli", &[]).await;

            println!("\nPipeline {} -> {:?}", execution.id, execution.overall_status);
            for stage in &execution.stages {
                println!(
                    "  {:<12} {:?}  {} records, {} retries{}",
                    stage.stage_id,
                    stage.status,
                    stage.records_processed,
                    stage.retry_count,
                    stage
                        .error
                        .as_deref()
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
            println!("  canonical entities: {}", repo.prospect_count());
            if !execution.failed_stages().is_empty() {
                error!("pipeline finished with failed stages");
                std::process::exit(1);
            }
        }
        Commands::Batch { input } => {
            let repo = Arc::new(InMemoryRepository::new());
            let extraction_id = Uuid::new_v4();
            stage_input(repo.as_ref(), &input, extraction_id).await?;

            let etl = EtlOrchestrator::new(repo, &config);
            let execution = etl.run_batch(extraction_id).await;
            print_batch(&execution);
        }
        Commands::Digest { coverage, validation, outlier } => {
            let metric = QualityMetric::compute(
                chrono::Utc::now().date_naive(),
                None,
                None,
                coverage,
                validation,
                outlier,
            );
            println!(
                "composite score: {:.1} (coverage {:.1}, validation {:.1}, outlier {:.1})",
                metric.composite_score, coverage, validation, outlier
            );

            let engine = AlertEngine::new(config.alerts.clone());
            let digest = AlertDigest::build(engine.evaluate(&metric));
            println!("\n{}", digest.subject);
            for alert in digest.ordered() {
                println!("  [{:?}] {} (priority {:.1})", alert.severity, alert.message, priority_score(alert));
            }
        }
        Commands::Health { input, runs } => {
            let repo = Arc::new(InMemoryRepository::new());
            let extraction_id = Uuid::new_v4();
            stage_input(repo.as_ref(), &input, extraction_id).await?;

            let orchestrator = build_pipeline(&config, repo, extraction_id);
            for n in 0..runs {
                orchestrator.execute_pipeline(&format!("health-{}", n + 1), &[]).await;
            }

            match orchestrator.stage_health("etl_batch") {
                Some(health) => println!(
                    "stage {}: {} runs, {:.1}% success, avg {:.0} ms, {} records",
                    health.stage_id,
                    health.executions,
                    health.success_rate,
                    health.avg_duration_ms,
                    health.total_records_processed
                ),
                None => println!("no executions recorded"),
            }
        }
    }
    Ok(())
}
