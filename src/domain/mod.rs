use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Raw payload as delivered by an external source adapter
pub type RawRecordData = serde_json::Value;

/// The single resolved record representing one real prospect across all
/// sources. Created on first successful match/insert, mutated by the
/// Merge/Load phases, never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: Option<Uuid>,
    pub name: String,
    /// Canonical position code (e.g. "QB", "EDGE")
    pub position: String,
    pub school: String,
    /// Numeric attributes: height_in, weight_lb, forty_yd, grades, ...
    pub attributes: HashMap<String, f64>,
    /// Source identifiers that have contributed to this entity
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prospect {
    /// Field accessor used by the quality rules engine.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::Text(self.name.clone())),
            "position" => Some(FieldValue::Text(self.position.clone())),
            "school" => Some(FieldValue::Text(self.school.clone())),
            _ => self.attributes.get(name).map(|v| FieldValue::Number(*v)),
        }
    }
}

/// A typed field value extracted from an entity for rule evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// One source's raw, unreconciled view of a prospect within one
/// extraction batch. Consumed once by matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: Uuid,
    pub source_id: String,
    pub extraction_id: Uuid,
    pub name: String,
    /// Position string as the source spells it, mapped to the canonical
    /// code during resolution
    pub position: String,
    pub school: String,
    pub attributes: HashMap<String, f64>,
    pub raw: RawRecordData,
}

/// Resolution outcome for one source record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Fuzzy,
    New,
    Unmatched,
}

/// Outcome of resolving one source record against the candidate pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_type: MatchType,
    /// Name similarity score on [0, 100]
    pub score: f64,
    /// Confidence in the resolution (0.0 to 1.0)
    pub confidence: f64,
    pub matched_prospect_id: Option<Uuid>,
    pub source_record_id: Uuid,
}

/// Severity levels shared by violations and alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Review workflow state for a violation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Waived,
}

/// A rule breach on one entity, produced by the quality rules engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub rule_id: Uuid,
    pub severity: Severity,
    pub field: String,
    /// Observed value, rendered for review
    pub value: String,
    /// What the rule expected
    pub expected: String,
    pub review_status: ReviewStatus,
    pub reviewer: Option<String>,
    pub review_note: Option<String>,
    pub quarantined: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregated quality scores for a (date, position?, source?) slice.
/// Recomputed periodically; history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetric {
    pub date: NaiveDate,
    pub position: Option<String>,
    pub source: Option<String>,
    pub coverage_pct: f64,
    pub validation_pct: f64,
    pub outlier_pct: f64,
    pub composite_score: f64,
}

impl QualityMetric {
    /// Composite quality score: weighted blend of coverage, validation
    /// and inverted outlier percentages, rounded to one decimal.
    pub fn composite_score(coverage: f64, validation: f64, outlier: f64) -> f64 {
        let score = 0.4 * coverage + 0.4 * validation + 0.2 * (100.0 - outlier);
        (score * 10.0).round() / 10.0
    }

    pub fn compute(
        date: NaiveDate,
        position: Option<String>,
        source: Option<String>,
        coverage_pct: f64,
        validation_pct: f64,
        outlier_pct: f64,
    ) -> Self {
        Self {
            date,
            position,
            source,
            coverage_pct,
            validation_pct,
            outlier_pct,
            composite_score: Self::composite_score(coverage_pct, validation_pct, outlier_pct),
        }
    }
}

/// The quality-metric dimension an alert was generated for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertDimension {
    Coverage,
    Validation,
    Outlier,
    Composite,
}

/// A threshold breach on one quality-metric dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub dimension: AlertDimension,
    pub severity: Severity,
    pub message: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub generated_at: DateTime<Utc>,
    pub acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Terminal outcome of one stage; in-flight state lives in the
/// orchestrator's logs, not on the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// Timing and outcome for one stage attempt sequence. Immutable once
/// finalized by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub stage_id: String,
    pub order: u32,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    /// Retries actually consumed (attempts - 1)
    pub retry_count: u32,
    /// Last error message, preserved verbatim after retry exhaustion
    pub error: Option<String>,
}

impl StageExecution {
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStatus {
    Running,
    Success,
    Failed,
}

/// Aggregate of all stage executions for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    pub triggered_by: String,
    pub overall_status: PipelineStatus,
    pub stages: Vec<StageExecution>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notification_sent: bool,
}

impl PipelineExecution {
    pub fn failed_stages(&self) -> Vec<&StageExecution> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .collect()
    }
}

/// The six fixed phases of one extraction batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PhaseName {
    Extract,
    Transform,
    Validate,
    Merge,
    Load,
    Publish,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Extract => "extract",
            PhaseName::Transform => "transform",
            PhaseName::Validate => "validate",
            PhaseName::Merge => "merge",
            PhaseName::Load => "load",
            PhaseName::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PhaseStatus {
    Success,
    Failed,
}

/// Timing and outcome for one phase of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub phase: PhaseName,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub records_processed: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    /// A non-Load phase failed but the batch still committed
    PartialSuccess,
    Failed,
}

/// Counts produced by the Merge phase
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergeCounts {
    pub entities_merged: u64,
    pub grades_merged: u64,
    pub measurements_merged: u64,
    pub stats_merged: u64,
}

/// Aggregate result of driving one extraction batch through all phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExecution {
    pub extraction_id: Uuid,
    pub status: BatchStatus,
    pub phases: Vec<PhaseExecution>,
    pub merge_counts: MergeCounts,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
