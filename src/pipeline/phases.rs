//! Per-batch ETL orchestrator: drives one extraction batch through the
//! six fixed phases (extract, transform, validate, merge, load, publish).
//!
//! Validate failures and publish errors degrade the batch to partial
//! success; a load failure rolls the whole write set back and fails the
//! batch. All durable writes accumulate in a `BatchWrites` set that the
//! Load phase applies in one atomic commit.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    BatchExecution, BatchStatus, MatchType, MergeCounts, PhaseExecution, PhaseName, PhaseStatus,
    Prospect, QualityMetric, SourceRecord,
};
use crate::observability::metrics::{emit_counter, emit_gauge, emit_histogram, MetricName};
use crate::processing::alerts::AlertEngine;
use crate::processing::matching::{map_position, ProspectMatcher};
use crate::processing::rules::{RuleCache, RuleKind, RulesEngine, ValidationStatus};
use crate::storage::{BatchWrites, Repository};

use super::orchestrator::{ConnectorResult, StageConnector};

/// Counts reported by one source transformer
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformCounts {
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
}

/// Per-source normalization step run concurrently by the Transform phase
#[async_trait]
pub trait Transformer: Send + Sync {
    fn source_id(&self) -> &str;
    async fn transform(&self, extraction_id: Uuid) -> anyhow::Result<TransformCounts>;
}

/// Attribute keys treated as physical measurements when counting merges
const MEASUREMENT_FIELDS: &[&str] = &[
    "height_in",
    "weight_lb",
    "forty_yd",
    "vertical_in",
    "broad_jump_in",
    "shuttle",
    "three_cone",
    "arm_length_in",
    "hand_size_in",
    "wingspan_in",
];

pub struct EtlOrchestrator {
    repo: Arc<dyn Repository>,
    transformers: Vec<Arc<dyn Transformer>>,
    matcher: ProspectMatcher,
    rules_engine: RulesEngine,
    rule_cache: RuleCache,
    alert_engine: AlertEngine,
    publish_views: Vec<String>,
}

impl EtlOrchestrator {
    pub fn new(repo: Arc<dyn Repository>, config: &Config) -> Self {
        Self {
            repo,
            transformers: Vec::new(),
            matcher: ProspectMatcher::new(config.matching.clone()),
            rules_engine: RulesEngine::default(),
            rule_cache: RuleCache::new(),
            alert_engine: AlertEngine::new(config.alerts.clone()),
            publish_views: config.publish.views.clone(),
        }
    }

    pub fn register_transformer(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    pub async fn invalidate_rule_cache(&self) {
        self.rule_cache.invalidate().await;
    }

    /// Drive one extraction batch through all six phases.
    pub async fn run_batch(&self, extraction_id: Uuid) -> BatchExecution {
        let started_at = Utc::now();
        info!("batch {} started", extraction_id);

        let mut phases = Vec::new();
        let mut writes = BatchWrites::default();
        let mut merge_counts = MergeCounts::default();
        let mut aborted = false;
        let mut load_failed = false;

        // Extract: account for what the source adapters staged. An empty
        // batch is unusual but not an error.
        match self.extract_phase(extraction_id).await {
            Ok(phase) => phases.push(phase),
            Err(phase) => {
                phases.push(phase);
                aborted = true;
            }
        }

        if !aborted {
            phases.push(self.transform_phase(extraction_id).await);

            match self.validate_phase(extraction_id, &mut writes).await {
                Ok(phase) => phases.push(phase),
                Err(phase) => {
                    phases.push(phase);
                    aborted = true;
                }
            }
        }

        if !aborted {
            let quarantined: HashSet<Uuid> = writes
                .violations
                .iter()
                .filter(|v| v.quarantined)
                .map(|v| v.entity_id)
                .collect();
            match self.merge_phase(extraction_id, &quarantined, &mut writes).await {
                Ok((phase, counts)) => {
                    merge_counts = counts;
                    phases.push(phase);
                }
                Err(phase) => {
                    phases.push(phase);
                    aborted = true;
                }
            }
        }

        if !aborted {
            let phase = self.load_phase(extraction_id, std::mem::take(&mut writes)).await;
            load_failed = phase.status == PhaseStatus::Failed;
            phases.push(phase);

            // Nothing committed means nothing to publish
            if !load_failed {
                phases.push(self.publish_phase().await);
            }
        }

        let any_failed = phases.iter().any(|p| p.status == PhaseStatus::Failed);
        let status = if aborted || load_failed {
            BatchStatus::Failed
        } else if any_failed {
            BatchStatus::PartialSuccess
        } else {
            BatchStatus::Success
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        emit_histogram(MetricName::BatchDuration, duration);
        info!(
            "batch {} finished: {:?} ({} phases, {} entities merged)",
            extraction_id,
            status,
            phases.len(),
            merge_counts.entities_merged
        );

        BatchExecution {
            extraction_id,
            status,
            phases,
            merge_counts,
            started_at,
            completed_at: Some(completed_at),
        }
    }

    async fn extract_phase(&self, extraction_id: Uuid) -> Result<PhaseExecution, PhaseExecution> {
        let started_at = Utc::now();
        match self.repo.staged_record_counts(extraction_id).await {
            Ok(counts) => {
                let total: u64 = counts.values().sum();
                emit_gauge(MetricName::BatchRecordsStaged, total as f64);
                if total == 0 {
                    warn!("batch {}: no staged records", extraction_id);
                } else {
                    for (source, count) in &counts {
                        info!("batch {}: {} records staged from {}", extraction_id, count, source);
                    }
                }
                Ok(phase_result(PhaseName::Extract, PhaseStatus::Success, started_at, total, None))
            }
            Err(e) => {
                emit_counter(MetricName::PhaseFailures, 1.0);
                error!("batch {}: extract failed: {}", extraction_id, e);
                Err(phase_result(
                    PhaseName::Extract,
                    PhaseStatus::Failed,
                    started_at,
                    0,
                    Some(e.to_string()),
                ))
            }
        }
    }

    /// One task per transformer; a single failing source never takes the
    /// others down with it.
    async fn transform_phase(&self, extraction_id: Uuid) -> PhaseExecution {
        let started_at = Utc::now();
        let mut handles = Vec::with_capacity(self.transformers.len());
        for transformer in &self.transformers {
            let transformer = Arc::clone(transformer);
            handles.push((
                transformer.source_id().to_string(),
                tokio::spawn(async move { transformer.transform(extraction_id).await }),
            ));
        }

        let mut processed = 0u64;
        let mut failures = Vec::new();
        for (source_id, handle) in handles {
            match handle.await {
                Ok(Ok(counts)) => {
                    processed += counts.records_processed;
                    info!(
                        "transform {}: {} processed, {} failed",
                        source_id, counts.records_processed, counts.records_failed
                    );
                }
                Ok(Err(e)) => {
                    warn!("transform {} failed: {}", source_id, e);
                    failures.push(format!("{}: {}", source_id, e));
                }
                Err(e) => {
                    warn!("transform {} task panicked: {}", source_id, e);
                    failures.push(format!("{}: task aborted", source_id));
                }
            }
        }

        if failures.is_empty() {
            phase_result(PhaseName::Transform, PhaseStatus::Success, started_at, processed, None)
        } else {
            emit_counter(MetricName::PhaseFailures, 1.0);
            phase_result(
                PhaseName::Transform,
                PhaseStatus::Failed,
                started_at,
                processed,
                Some(failures.join("; ")),
            )
        }
    }

    /// Run the rules engine over the staged batch. A FAIL verdict marks
    /// the phase failed without aborting the batch; violations and the
    /// batch quality metric join the write set, alerts go out now.
    async fn validate_phase(
        &self,
        extraction_id: Uuid,
        writes: &mut BatchWrites,
    ) -> Result<PhaseExecution, PhaseExecution> {
        let started_at = Utc::now();

        let failed = |e: String| {
            emit_counter(MetricName::PhaseFailures, 1.0);
            error!("batch {}: validate failed: {}", extraction_id, e);
            phase_result(PhaseName::Validate, PhaseStatus::Failed, started_at, 0, Some(e))
        };

        let records = match self.repo.staged_records(extraction_id).await {
            Ok(records) => records,
            Err(e) => return Err(failed(e.to_string())),
        };
        let rules = match self.rule_cache.get_or_load(self.repo.as_ref()).await {
            Ok(rules) => rules,
            Err(e) => return Err(failed(e.to_string())),
        };

        let entities: Vec<Prospect> = records.iter().map(batch_entity).collect();
        let validation = self.rules_engine.validate_dataset(&entities, &rules);

        // Batch quality metric: identity-field coverage, rule pass rate,
        // and the share of entities with an outlier-rule violation.
        let covered = records.iter().filter(|r| has_identity_fields(r)).count();
        let coverage_pct = if records.is_empty() {
            100.0
        } else {
            covered as f64 * 100.0 / records.len() as f64
        };
        let outlier_rule_ids: Vec<Uuid> = rules
            .iter()
            .filter(|r| matches!(r.kind, RuleKind::Outlier { .. }))
            .map(|r| r.id)
            .collect();
        let outlier_entities: HashSet<Uuid> = validation
            .violations
            .iter()
            .filter(|v| outlier_rule_ids.contains(&v.rule_id))
            .map(|v| v.entity_id)
            .collect();
        let outlier_pct = if records.is_empty() {
            0.0
        } else {
            outlier_entities.len() as f64 * 100.0 / records.len() as f64
        };
        let metric = QualityMetric::compute(
            Utc::now().date_naive(),
            None,
            None,
            coverage_pct,
            validation.pass_rate,
            outlier_pct,
        );

        // Alerts reference the batch metric, so they ride the same
        // atomic commit instead of being persisted here.
        let status = validation.status;
        writes.alerts.extend(self.alert_engine.evaluate(&metric));
        writes.violations.extend(validation.violations);
        writes.metrics.push(metric);

        let phase = if status == ValidationStatus::Pass {
            phase_result(
                PhaseName::Validate,
                PhaseStatus::Success,
                started_at,
                records.len() as u64,
                None,
            )
        } else {
            emit_counter(MetricName::PhaseFailures, 1.0);
            phase_result(
                PhaseName::Validate,
                PhaseStatus::Failed,
                started_at,
                records.len() as u64,
                Some(format!("pass rate {:.1}% below threshold", validation.pass_rate)),
            )
        };
        Ok(phase)
    }

    /// Resolve every non-quarantined staged record through the identity
    /// matcher and fold it into its canonical entity. All entity writes
    /// land in the accumulated set; nothing is persisted here.
    async fn merge_phase(
        &self,
        extraction_id: Uuid,
        quarantined: &HashSet<Uuid>,
        writes: &mut BatchWrites,
    ) -> Result<(PhaseExecution, MergeCounts), PhaseExecution> {
        let started_at = Utc::now();

        let failed = |e: String| {
            emit_counter(MetricName::PhaseFailures, 1.0);
            error!("batch {}: merge failed: {}", extraction_id, e);
            phase_result(PhaseName::Merge, PhaseStatus::Failed, started_at, 0, Some(e))
        };

        let records = match self.repo.staged_records(extraction_id).await {
            Ok(records) => records,
            Err(e) => return Err(failed(e.to_string())),
        };
        let mut candidates = match self.repo.find_candidates(None).await {
            Ok(candidates) => candidates,
            Err(e) => return Err(failed(e.to_string())),
        };

        let mut merged: HashMap<Uuid, Prospect> = HashMap::new();
        let mut counts = MergeCounts::default();
        let mut processed = 0u64;
        let mut skipped_quarantined = 0u64;
        let mut unmatched = 0u64;

        for record in &records {
            if quarantined.contains(&record.id) {
                skipped_quarantined += 1;
                continue;
            }
            processed += 1;

            let result = self.matcher.resolve(record, &candidates);
            match result.match_type {
                MatchType::Exact | MatchType::Fuzzy => {
                    let id = match result.matched_prospect_id {
                        Some(id) => id,
                        None => continue,
                    };
                    let entity = match merged.entry(id) {
                        std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            match candidates.iter().find(|c| c.id == Some(id)) {
                                Some(existing) => slot.insert(existing.clone()),
                                None => continue,
                            }
                        }
                    };
                    apply_record(entity, record, &mut counts);
                }
                MatchType::New => {
                    let entity = new_entity(record, &mut counts);
                    merged.insert(entity.id.unwrap_or_default(), entity.clone());
                    // Later records in the batch can resolve against it
                    candidates.push(entity);
                }
                MatchType::Unmatched => {
                    unmatched += 1;
                    info!(
                        "batch {}: '{}' from {} left unmatched (best score {:.1})",
                        extraction_id, record.name, record.source_id, result.score
                    );
                }
            }
        }

        counts.entities_merged = merged.len() as u64;
        emit_counter(MetricName::BatchEntitiesMerged, counts.entities_merged as f64);
        info!(
            "batch {}: merged {} entities ({} grades, {} measurements, {} stats), {} unmatched, {} quarantined",
            extraction_id,
            counts.entities_merged,
            counts.grades_merged,
            counts.measurements_merged,
            counts.stats_merged,
            unmatched,
            skipped_quarantined
        );

        writes.prospects.extend(merged.into_values());
        Ok((
            phase_result(PhaseName::Merge, PhaseStatus::Success, started_at, processed, None),
            counts,
        ))
    }

    /// Single atomic commit of the accumulated write set. On error the
    /// repository applies nothing and the batch is failed.
    async fn load_phase(&self, extraction_id: Uuid, writes: BatchWrites) -> PhaseExecution {
        let started_at = Utc::now();
        let record_count = (writes.prospects.len()
            + writes.violations.len()
            + writes.metrics.len()
            + writes.alerts.len()) as u64;

        match self.repo.commit_batch(writes).await {
            Ok(()) => {
                info!("batch {}: committed {} writes", extraction_id, record_count);
                phase_result(PhaseName::Load, PhaseStatus::Success, started_at, record_count, None)
            }
            Err(e) => {
                emit_counter(MetricName::PhaseFailures, 1.0);
                emit_counter(MetricName::LoadRollbacks, 1.0);
                error!("batch {}: load rolled back: {}", extraction_id, e);
                phase_result(
                    PhaseName::Load,
                    PhaseStatus::Failed,
                    started_at,
                    0,
                    Some(e.to_string()),
                )
            }
        }
    }

    /// Refresh each configured view; a failing view never stops the rest.
    async fn publish_phase(&self) -> PhaseExecution {
        let started_at = Utc::now();
        let mut refreshed = 0u64;
        let mut failures = Vec::new();

        for view in &self.publish_views {
            match self.repo.refresh_view(view).await {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    emit_counter(MetricName::ViewRefreshErrors, 1.0);
                    warn!("view refresh failed for '{}': {}", view, e);
                    failures.push(view.clone());
                }
            }
        }

        if failures.is_empty() {
            phase_result(PhaseName::Publish, PhaseStatus::Success, started_at, refreshed, None)
        } else {
            emit_counter(MetricName::PhaseFailures, 1.0);
            phase_result(
                PhaseName::Publish,
                PhaseStatus::Failed,
                started_at,
                refreshed,
                Some(format!("views failed to refresh: {}", failures.join(", "))),
            )
        }
    }
}

fn phase_result(
    phase: PhaseName,
    status: PhaseStatus,
    started_at: chrono::DateTime<Utc>,
    records_processed: u64,
    error: Option<String>,
) -> PhaseExecution {
    PhaseExecution {
        phase,
        status,
        started_at,
        completed_at: Utc::now(),
        records_processed,
        error,
    }
}

/// Entity-shaped view of one staged record, used by validation so the
/// quarantine set is keyed by staged-record id.
fn batch_entity(record: &SourceRecord) -> Prospect {
    Prospect {
        id: Some(record.id),
        name: record.name.clone(),
        position: map_position(&record.position),
        school: record.school.clone(),
        attributes: record.attributes.clone(),
        sources: vec![record.source_id.clone()],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn has_identity_fields(record: &SourceRecord) -> bool {
    !record.name.trim().is_empty()
        && !record.position.trim().is_empty()
        && !record.school.trim().is_empty()
}

fn new_entity(record: &SourceRecord, counts: &mut MergeCounts) -> Prospect {
    let mut entity = Prospect {
        id: Some(Uuid::new_v4()),
        name: record.name.clone(),
        position: map_position(&record.position),
        school: record.school.clone(),
        attributes: HashMap::new(),
        sources: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    apply_record(&mut entity, record, counts);
    entity
}

/// Fold one source record into its canonical entity, counting merged
/// attribute categories.
fn apply_record(entity: &mut Prospect, record: &SourceRecord, counts: &mut MergeCounts) {
    for (key, value) in &record.attributes {
        entity.attributes.insert(key.clone(), *value);
        if key.starts_with("grade") {
            counts.grades_merged += 1;
        } else if MEASUREMENT_FIELDS.contains(&key.as_str()) {
            counts.measurements_merged += 1;
        } else {
            counts.stats_merged += 1;
        }
    }
    if !entity.sources.contains(&record.source_id) {
        entity.sources.push(record.source_id.clone());
    }
    entity.updated_at = Utc::now();
}

/// Adapter exposing one batch run as a stage of the top-level pipeline.
pub struct EtlStageConnector {
    orchestrator: Arc<EtlOrchestrator>,
    extraction_id: Uuid,
}

impl EtlStageConnector {
    pub fn new(orchestrator: Arc<EtlOrchestrator>, extraction_id: Uuid) -> Self {
        Self { orchestrator, extraction_id }
    }
}

#[async_trait]
impl StageConnector for EtlStageConnector {
    async fn execute(&self) -> anyhow::Result<ConnectorResult> {
        let execution = self.orchestrator.run_batch(self.extraction_id).await;

        let errors: Vec<String> = execution
            .phases
            .iter()
            .filter_map(|p| p.error.as_ref().map(|e| format!("{}: {}", p.phase.as_str(), e)))
            .collect();
        if execution.status == BatchStatus::Failed {
            anyhow::bail!("batch {} failed: {}", self.extraction_id, errors.join("; "));
        }

        let failed_phases = execution
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Failed)
            .count() as u64;
        let processed = execution
            .phases
            .iter()
            .find(|p| p.phase == PhaseName::Extract)
            .map(|p| p.records_processed)
            .unwrap_or(0);
        Ok(ConnectorResult {
            records_processed: processed,
            records_succeeded: processed,
            records_failed: failed_phases,
            data: Some(serde_json::to_value(&execution)?),
            errors,
        })
    }
}
