//! Top-level stage orchestrator: runs registered stages strictly
//! sequentially in ascending order, applying timeout/retry/failure-mode
//! policy and notifying once per run.
//!
//! Stages never run concurrently with each other; connectors may
//! parallelize internally, which is opaque here. The execution history
//! is append-only from the single coordinating flow.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{FailureMode, OrchestratorConfig};
use crate::domain::{PipelineExecution, PipelineStatus, StageExecution, StageStatus};
use crate::error::PipelineError;
use crate::observability::metrics::{emit_counter, emit_histogram, MetricName};

/// Result shape every stage connector reports back
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorResult {
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    pub data: Option<serde_json::Value>,
    pub errors: Vec<String>,
}

/// Contract every stage adapter implements. Scrapers, loaders and the
/// per-batch ETL run are all connectors to the orchestrator.
#[async_trait]
pub trait StageConnector: Send + Sync {
    async fn execute(&self) -> anyhow::Result<ConnectorResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Success,
    Failure,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Success => "success",
            NotificationOutcome::Failure => "failure",
        }
    }
}

/// Invoked exactly once per pipeline run. Notifier failures are logged
/// and never alter the run's overall status.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        execution: &PipelineExecution,
        outcome: NotificationOutcome,
    ) -> anyhow::Result<()>;
}

struct StageRegistration {
    id: String,
    order: u32,
    connector: Arc<dyn StageConnector>,
}

/// Per-stage health aggregated over the run history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHealth {
    pub stage_id: String,
    pub executions: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub total_records_processed: u64,
}

pub struct PipelineOrchestrator {
    config: OrchestratorConfig,
    stages: Vec<StageRegistration>,
    notifier: Option<Arc<dyn Notifier>>,
    history: Mutex<Vec<PipelineExecution>>,
}

impl PipelineOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
            notifier: None,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register_stage(&mut self, id: &str, connector: Arc<dyn StageConnector>, order: u32) {
        self.stages.push(StageRegistration {
            id: id.to_string(),
            order,
            connector,
        });
    }

    /// Run the pipeline: stages in ascending `order` (stable tie-break =
    /// registration order), applying the configured failure mode.
    pub async fn execute_pipeline(
        &self,
        triggered_by: &str,
        skip_stages: &[String],
    ) -> PipelineExecution {
        let mut execution = PipelineExecution {
            id: Uuid::new_v4(),
            triggered_by: triggered_by.to_string(),
            overall_status: PipelineStatus::Running,
            stages: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            notification_sent: false,
        };
        emit_counter(MetricName::PipelineRuns, 1.0);
        info!(
            "pipeline run {} started (triggered by {}, {} stages, failure mode {:?})",
            execution.id,
            triggered_by,
            self.stages.len(),
            self.config.failure_mode
        );

        // Stable sort preserves registration order on equal `order`
        let mut ordered: Vec<&StageRegistration> = self.stages.iter().collect();
        ordered.sort_by_key(|s| s.order);

        for stage in ordered {
            if skip_stages.contains(&stage.id) {
                info!("stage '{}' skipped", stage.id);
                emit_counter(MetricName::StageSkipped, 1.0);
                execution.stages.push(StageExecution {
                    stage_id: stage.id.clone(),
                    order: stage.order,
                    status: StageStatus::Skipped,
                    started_at: Utc::now(),
                    completed_at: Some(Utc::now()),
                    records_processed: 0,
                    records_succeeded: 0,
                    records_failed: 0,
                    retry_count: 0,
                    error: None,
                });
                continue;
            }

            let stage_execution = self.execute_stage(stage).await;
            let failed = stage_execution.status == StageStatus::Failed;
            execution.stages.push(stage_execution);

            if failed && self.config.failure_mode == FailureMode::FailFast {
                warn!(
                    "stage '{}' failed; aborting remaining stages (fail-fast)",
                    stage.id
                );
                break;
            }
        }

        execution.overall_status = if execution.failed_stages().is_empty() {
            PipelineStatus::Success
        } else {
            emit_counter(MetricName::PipelineFailures, 1.0);
            PipelineStatus::Failed
        };
        execution.completed_at = Some(Utc::now());

        self.send_notification(&mut execution).await;

        info!(
            "pipeline run {} finished: {:?} ({} stages executed, {} failed)",
            execution.id,
            execution.overall_status,
            execution.stages.len(),
            execution.failed_stages().len()
        );

        self.history.lock().unwrap().push(execution.clone());
        execution
    }

    /// Run one stage under the timeout, retrying transient failures up
    /// to `max_retries` additional attempts. Timeout expiry is counted
    /// like any other stage error.
    async fn execute_stage(&self, stage: &StageRegistration) -> StageExecution {
        let started_at = Utc::now();
        info!("stage '{}' running (order {})", stage.id, stage.order);

        let mut attempt: u32 = 0;
        let mut last_error = String::new();
        let outcome = loop {
            attempt += 1;
            emit_counter(MetricName::StageAttempts, 1.0);

            let attempt_result =
                tokio::time::timeout(self.config.stage_timeout(), stage.connector.execute()).await;

            let retryable = match attempt_result {
                Ok(Ok(result)) => break Some(result),
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    // Typed domain errors declare their own retryability;
                    // anything opaque is assumed transient.
                    e.downcast_ref::<PipelineError>().map_or(true, PipelineError::is_retryable)
                }
                Err(_) => {
                    last_error =
                        PipelineError::Timeout(self.config.stage_timeout_secs).to_string();
                    true
                }
            };

            warn!(
                "stage '{}' attempt {} failed: {}",
                stage.id, attempt, last_error
            );
            if !retryable || attempt > self.config.max_retries {
                break None;
            }
            let delay = self.config.retry_delay.delay_for(attempt);
            info!(
                "stage '{}' retrying in {:?} (attempt {} of {})",
                stage.id,
                delay,
                attempt + 1,
                self.config.max_retries + 1
            );
            emit_counter(MetricName::StageRetries, 1.0);
            tokio::time::sleep(delay).await;
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        emit_histogram(MetricName::StageDuration, duration);

        match outcome {
            Some(result) => {
                emit_counter(MetricName::StageSuccesses, 1.0);
                info!(
                    "stage '{}' succeeded: {} processed, {} failed",
                    stage.id, result.records_processed, result.records_failed
                );
                StageExecution {
                    stage_id: stage.id.clone(),
                    order: stage.order,
                    status: StageStatus::Success,
                    started_at,
                    completed_at: Some(completed_at),
                    records_processed: result.records_processed,
                    records_succeeded: result.records_succeeded,
                    records_failed: result.records_failed,
                    retry_count: attempt - 1,
                    error: None,
                }
            }
            None => {
                emit_counter(MetricName::StageFailures, 1.0);
                error!(
                    "stage '{}' failed after {} attempt(s): {}",
                    stage.id, attempt, last_error
                );
                StageExecution {
                    stage_id: stage.id.clone(),
                    order: stage.order,
                    status: StageStatus::Failed,
                    started_at,
                    completed_at: Some(completed_at),
                    records_processed: 0,
                    records_succeeded: 0,
                    records_failed: 0,
                    retry_count: attempt - 1,
                    error: Some(last_error),
                }
            }
        }
    }

    async fn send_notification(&self, execution: &mut PipelineExecution) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let outcome = if execution.overall_status == PipelineStatus::Success {
            NotificationOutcome::Success
        } else {
            NotificationOutcome::Failure
        };
        match notifier.notify(execution, outcome).await {
            Ok(()) => {
                execution.notification_sent = true;
                emit_counter(MetricName::NotificationsSent, 1.0);
            }
            Err(e) => {
                // Notification failures never alter the run status
                emit_counter(MetricName::NotificationErrors, 1.0);
                error!("notification failed for run {}: {}", execution.id, e);
            }
        }
    }

    pub fn execution_history(&self) -> Vec<PipelineExecution> {
        self.history.lock().unwrap().clone()
    }

    /// Aggregate health for one stage across the run history.
    pub fn stage_health(&self, stage_id: &str) -> Option<StageHealth> {
        let history = self.history.lock().unwrap();
        let runs: Vec<&StageExecution> = history
            .iter()
            .flat_map(|e| e.stages.iter())
            .filter(|s| s.stage_id == stage_id && s.status != StageStatus::Skipped)
            .collect();
        if runs.is_empty() {
            return None;
        }

        let executions = runs.len() as u64;
        let successes = runs
            .iter()
            .filter(|s| s.status == StageStatus::Success)
            .count() as u64;
        let total_duration: i64 = runs.iter().filter_map(|s| s.duration_ms()).sum();
        Some(StageHealth {
            stage_id: stage_id.to_string(),
            executions,
            successes,
            success_rate: successes as f64 * 100.0 / executions as f64,
            avg_duration_ms: total_duration as f64 / executions as f64,
            total_records_processed: runs.iter().map(|s| s.records_processed).sum(),
        })
    }
}
