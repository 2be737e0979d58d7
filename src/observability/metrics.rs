//! Simple metrics module for the prospect pipeline
//!
//! Provides a straightforward API for recording metrics using standard
//! Prometheus naming conventions.

use std::fmt;

/// Enum representing all metric names used in the system
/// This eliminates magic strings and provides compile-time safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Stage orchestrator metrics
    StageAttempts,
    StageRetries,
    StageSuccesses,
    StageFailures,
    StageSkipped,
    StageDuration,
    PipelineRuns,
    PipelineFailures,
    NotificationsSent,
    NotificationErrors,

    // Phase orchestrator metrics
    PhaseFailures,
    BatchRecordsStaged,
    BatchEntitiesMerged,
    BatchDuration,
    LoadRollbacks,
    ViewRefreshErrors,

    // Matching metrics
    MatchExact,
    MatchFuzzy,
    MatchNew,
    MatchUnmatched,
    MatchScore,

    // Quality rules metrics
    ViolationsDetected,
    EntitiesQuarantined,
    RuleCacheInvalidations,

    // Alert metrics
    AlertsGenerated,
    AlertsCritical,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::StageAttempts => "pp_stage_attempts_total",
            MetricName::StageRetries => "pp_stage_retries_total",
            MetricName::StageSuccesses => "pp_stage_successes_total",
            MetricName::StageFailures => "pp_stage_failures_total",
            MetricName::StageSkipped => "pp_stage_skipped_total",
            MetricName::StageDuration => "pp_stage_duration_seconds",
            MetricName::PipelineRuns => "pp_pipeline_runs_total",
            MetricName::PipelineFailures => "pp_pipeline_failures_total",
            MetricName::NotificationsSent => "pp_notifications_sent_total",
            MetricName::NotificationErrors => "pp_notification_errors_total",

            MetricName::PhaseFailures => "pp_phase_failures_total",
            MetricName::BatchRecordsStaged => "pp_batch_records_staged",
            MetricName::BatchEntitiesMerged => "pp_batch_entities_merged_total",
            MetricName::BatchDuration => "pp_batch_duration_seconds",
            MetricName::LoadRollbacks => "pp_load_rollbacks_total",
            MetricName::ViewRefreshErrors => "pp_view_refresh_errors_total",

            MetricName::MatchExact => "pp_match_exact_total",
            MetricName::MatchFuzzy => "pp_match_fuzzy_total",
            MetricName::MatchNew => "pp_match_new_total",
            MetricName::MatchUnmatched => "pp_match_unmatched_total",
            MetricName::MatchScore => "pp_match_score",

            MetricName::ViolationsDetected => "pp_violations_detected_total",
            MetricName::EntitiesQuarantined => "pp_entities_quarantined_total",
            MetricName::RuleCacheInvalidations => "pp_rule_cache_invalidations_total",

            MetricName::AlertsGenerated => "pp_alerts_generated_total",
            MetricName::AlertsCritical => "pp_alerts_critical_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Install the Prometheus recorder. Call once at startup; a second call
/// returns an error from the exporter and is ignored by callers in tests.
pub fn init() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder.install_recorder()?;
    Ok(())
}

pub fn emit_counter(name: MetricName, value: f64) {
    ::metrics::counter!(name.as_str()).increment(value as u64);
}

pub fn emit_gauge(name: MetricName, value: f64) {
    ::metrics::gauge!(name.as_str()).set(value);
}

pub fn emit_histogram(name: MetricName, value: f64) {
    ::metrics::histogram!(name.as_str()).record(value);
}
