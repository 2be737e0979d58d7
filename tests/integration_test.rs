use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use prospect_pipeline::config::{Config, FailureMode, OrchestratorConfig, RetryDelay};
use prospect_pipeline::domain::{
    BatchStatus, PhaseName, PhaseStatus, PipelineExecution, PipelineStatus, Prospect, Severity,
    SourceRecord, StageStatus,
};
use prospect_pipeline::pipeline::{
    ConnectorResult, EtlOrchestrator, EtlStageConnector, NotificationOutcome, Notifier,
    PipelineOrchestrator, StageConnector,
};
use prospect_pipeline::processing::rules::{
    is_quarantined, review_violation, ComparisonOp, Rule, RuleKind,
};
use prospect_pipeline::storage::{InMemoryRepository, Repository};

fn fast_config(failure_mode: FailureMode, max_retries: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        max_retries,
        retry_delay: RetryDelay::Fixed { secs: 0 },
        stage_timeout_secs: 30,
        failure_mode,
    }
}

struct CountingConnector {
    calls: AtomicU32,
    fail: bool,
}

impl CountingConnector {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), fail })
    }
}

#[async_trait]
impl StageConnector for CountingConnector {
    async fn execute(&self) -> anyhow::Result<ConnectorResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("source unavailable")
        }
        Ok(ConnectorResult { records_processed: 1, records_succeeded: 1, ..Default::default() })
    }
}

struct CountingNotifier {
    outcomes: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        _execution: &PipelineExecution,
        outcome: NotificationOutcome,
    ) -> anyhow::Result<()> {
        self.outcomes.lock().unwrap().push(outcome.as_str());
        Ok(())
    }
}

fn source_record(
    extraction_id: Uuid,
    source: &str,
    name: &str,
    position: &str,
    school: &str,
    attributes: &[(&str, f64)],
) -> SourceRecord {
    SourceRecord {
        id: Uuid::new_v4(),
        source_id: source.to_string(),
        extraction_id,
        name: name.to_string(),
        position: position.to_string(),
        school: school.to_string(),
        attributes: attributes.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        raw: serde_json::json!({}),
    }
}

// Under fail-fast with stages A(order 3), B(order 1, permanently failing)
// and C(order 2), only B executes; with one retry allowed it is attempted
// twice and the run is FAILED.
#[tokio::test]
async fn test_fail_fast_scenario() {
    let a = CountingConnector::new(false);
    let b = CountingConnector::new(true);
    let c = CountingConnector::new(false);

    let mut orchestrator = PipelineOrchestrator::new(fast_config(FailureMode::FailFast, 1));
    orchestrator.register_stage("a", a.clone(), 3);
    orchestrator.register_stage("b", b.clone(), 1);
    orchestrator.register_stage("c", c.clone(), 2);

    let execution = orchestrator.execute_pipeline("test", &[]).await;

    assert_eq!(execution.stages.len(), 1);
    assert_eq!(execution.stages[0].stage_id, "b");
    assert_eq!(b.calls.load(Ordering::SeqCst), 2);
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    assert_eq!(execution.overall_status, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_partial_success_with_skip_and_single_notification() {
    let notifier = Arc::new(CountingNotifier { outcomes: Mutex::new(Vec::new()) });
    let mut orchestrator = PipelineOrchestrator::new(fast_config(FailureMode::PartialSuccess, 0))
        .with_notifier(notifier.clone());
    orchestrator.register_stage("extract", CountingConnector::new(true), 1);
    orchestrator.register_stage("enrich", CountingConnector::new(false), 2);
    orchestrator.register_stage("report", CountingConnector::new(false), 3);

    let execution = orchestrator.execute_pipeline("scheduler", &["report".to_string()]).await;

    // Every non-skipped stage ran despite the first failure
    let statuses: Vec<StageStatus> = execution.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StageStatus::Failed, StageStatus::Success, StageStatus::Skipped]
    );
    assert_eq!(execution.overall_status, PipelineStatus::Failed);
    // Exactly one notification, carrying the failure outcome
    assert_eq!(*notifier.outcomes.lock().unwrap(), vec!["failure"]);
    assert!(execution.notification_sent);
}

// Three sources spell the same prospect differently; identity resolution
// folds all of them into the one seeded canonical entity.
#[tokio::test]
async fn test_batch_resolves_multiple_sources_to_one_entity() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let mut seeded = Prospect {
        id: None,
        name: "John Smith".to_string(),
        position: "QB".to_string(),
        school: "Ohio State".to_string(),
        attributes: HashMap::new(),
        sources: vec!["seed".to_string()],
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    repo.upsert_prospect(&mut seeded).await?;
    let seeded_id = seeded.id.unwrap();

    let extraction_id = Uuid::new_v4();
    repo.stage_source_records(&[
        source_record(extraction_id, "rivals", "John Smith", "Quarterback", "Ohio St.", &[("grade_overall", 94.0)]),
        source_record(extraction_id, "on3", "Smith, John Jr.", "QB", "Ohio State", &[("weight_lb", 212.0)]),
        source_record(extraction_id, "pff", "Jon Smith", "QB", "ohio state", &[("pass_yds", 3805.0)]),
    ])
    .await?;

    let etl = EtlOrchestrator::new(repo.clone(), &Config::default());
    let execution = etl.run_batch(extraction_id).await;

    assert_eq!(execution.status, BatchStatus::Success);
    assert_eq!(execution.merge_counts.entities_merged, 1);
    assert_eq!(repo.prospect_count(), 1);

    let merged = repo.get_prospect(seeded_id).await?.unwrap();
    assert_eq!(merged.attributes["grade_overall"], 94.0);
    assert_eq!(merged.attributes["weight_lb"], 212.0);
    assert_eq!(merged.attributes["pass_yds"], 3805.0);
    for source in ["rivals", "on3", "pff"] {
        assert!(merged.sources.contains(&source.to_string()), "missing {}", source);
    }
    Ok(())
}

// An Error-severity rule violation quarantines the offending staged
// record: it is excluded from the merge while clean records still land.
#[tokio::test]
async fn test_quarantined_record_is_excluded_from_merge() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    repo.save_rule(&Rule::new(
        "weight_floor",
        RuleKind::BusinessLogic {
            field: "weight_lb".to_string(),
            op: ComparisonOp::Gt,
            expected: serde_json::json!(100.0),
        },
        Severity::Error,
    ))
    .await?;

    let extraction_id = Uuid::new_v4();
    let bad = source_record(extraction_id, "rivals", "Typo Guy", "QB", "Baylor", &[("weight_lb", 2.0)]);
    let bad_id = bad.id;
    repo.stage_source_records(&[
        bad,
        source_record(extraction_id, "rivals", "Marcus Webb", "CB", "Auburn", &[("weight_lb", 188.0)]),
    ])
    .await?;

    let mut config = Config::default();
    config.matching.create_new_entities = true;
    let etl = EtlOrchestrator::new(repo.clone(), &config);
    let execution = etl.run_batch(extraction_id).await;

    // Pass rate 50% fails the quality gate, but the batch still commits
    assert_eq!(execution.status, BatchStatus::PartialSuccess);
    let validate = execution.phases.iter().find(|p| p.phase == PhaseName::Validate).unwrap();
    assert_eq!(validate.status, PhaseStatus::Failed);
    // Only the clean record became an entity
    assert_eq!(repo.prospect_count(), 1);
    assert_eq!(execution.merge_counts.entities_merged, 1);

    // The violation was committed with the batch, quarantined
    let violations = repo.violations_for_entity(bad_id).await?;
    assert_eq!(violations.len(), 1);
    assert!(violations[0].quarantined);
    Ok(())
}

// Quarantine clears only when all of an entity's violations are approved.
#[tokio::test]
async fn test_review_approval_clears_quarantine() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    repo.save_rule(&Rule::new(
        "weight_floor",
        RuleKind::BusinessLogic {
            field: "weight_lb".to_string(),
            op: ComparisonOp::Gt,
            expected: serde_json::json!(100.0),
        },
        Severity::Error,
    ))
    .await?;

    let extraction_id = Uuid::new_v4();
    let bad = source_record(extraction_id, "rivals", "Typo Guy", "QB", "Baylor", &[("weight_lb", 2.0)]);
    let bad_id = bad.id;
    repo.stage_source_records(&[bad]).await?;

    let mut config = Config::default();
    config.matching.create_new_entities = true;
    EtlOrchestrator::new(repo.clone(), &config).run_batch(extraction_id).await;

    let mut violations = repo.violations_for_entity(bad_id).await?;
    assert!(is_quarantined(&violations));

    review_violation(
        &mut violations[0],
        prospect_pipeline::domain::ReviewStatus::Approved,
        "analyst@example.com",
        "confirmed scale miscalibration, value corrected upstream",
    );
    repo.update_violation(&violations[0]).await?;

    let violations = repo.violations_for_entity(bad_id).await?;
    assert!(!is_quarantined(&violations));
    Ok(())
}

// A failing commit rolls back the entire batch write set, and the ETL
// stage surfaces the failure to the outer orchestrator, which retries.
#[tokio::test]
async fn test_load_rollback_then_retry_commits() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let extraction_id = Uuid::new_v4();
    repo.stage_source_records(&[source_record(
        extraction_id,
        "rivals",
        "John Smith",
        "QB",
        "Ohio State",
        &[("grade_overall", 94.0)],
    )])
    .await?;
    repo.fail_next_commit();

    let mut config = Config::default();
    config.matching.create_new_entities = true;
    config.orchestrator = fast_config(FailureMode::PartialSuccess, 1);

    let etl = Arc::new(EtlOrchestrator::new(repo.clone(), &config));
    let mut orchestrator = PipelineOrchestrator::new(config.orchestrator.clone());
    orchestrator.register_stage("etl_batch", Arc::new(EtlStageConnector::new(etl, extraction_id)), 1);

    let execution = orchestrator.execute_pipeline("test", &[]).await;

    // First attempt rolled back, retry committed
    assert_eq!(execution.overall_status, PipelineStatus::Success);
    assert_eq!(execution.stages[0].retry_count, 1);
    assert_eq!(repo.prospect_count(), 1);
    assert_eq!(repo.refreshed_views().len(), 3);
    Ok(())
}

// A failing view refresh is logged and degrades the batch, never
// un-commits the data or stops the remaining views.
#[tokio::test]
async fn test_publish_failure_is_best_effort() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let extraction_id = Uuid::new_v4();
    repo.stage_source_records(&[source_record(
        extraction_id,
        "rivals",
        "John Smith",
        "QB",
        "Ohio State",
        &[("grade_overall", 94.0)],
    )])
    .await?;
    repo.fail_view("position_leaderboards");

    let mut config = Config::default();
    config.matching.create_new_entities = true;
    let execution = EtlOrchestrator::new(repo.clone(), &config).run_batch(extraction_id).await;

    assert_eq!(execution.status, BatchStatus::PartialSuccess);
    let publish = execution.phases.iter().find(|p| p.phase == PhaseName::Publish).unwrap();
    assert_eq!(publish.status, PhaseStatus::Failed);
    assert!(publish.error.as_deref().unwrap().contains("position_leaderboards"));
    assert_eq!(repo.prospect_count(), 1);
    assert_eq!(
        repo.refreshed_views(),
        vec!["prospect_rankings".to_string(), "source_coverage".to_string()]
    );
    Ok(())
}
