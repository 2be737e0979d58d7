use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{BatchWrites, Repository};
use crate::domain::{Alert, Prospect, QualityMetric, SourceRecord, Violation};
use crate::error::{PipelineError, Result};
use crate::processing::rules::Rule;

/// In-memory repository implementation for development/testing
pub struct InMemoryRepository {
    prospects: Arc<Mutex<HashMap<Uuid, Prospect>>>,
    staged: Arc<Mutex<Vec<SourceRecord>>>,
    violations: Arc<Mutex<HashMap<Uuid, Violation>>>,
    alerts: Arc<Mutex<Vec<Alert>>>,
    metrics: Arc<Mutex<Vec<QualityMetric>>>,
    rules: Arc<Mutex<HashMap<Uuid, Rule>>>,
    refreshed_views: Arc<Mutex<Vec<String>>>,
    fail_next_commit: AtomicBool,
    failing_views: Arc<Mutex<Vec<String>>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            prospects: Arc::new(Mutex::new(HashMap::new())),
            staged: Arc::new(Mutex::new(Vec::new())),
            violations: Arc::new(Mutex::new(HashMap::new())),
            alerts: Arc::new(Mutex::new(Vec::new())),
            metrics: Arc::new(Mutex::new(Vec::new())),
            rules: Arc::new(Mutex::new(HashMap::new())),
            refreshed_views: Arc::new(Mutex::new(Vec::new())),
            fail_next_commit: AtomicBool::new(false),
            failing_views: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make the next `commit_batch` fail with a persistence error,
    /// applying nothing. Exercises the Load-phase rollback path.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make `refresh_view` fail for the named view. Exercises the
    /// Publish phase's continue-on-error behavior.
    pub fn fail_view(&self, view: &str) {
        self.failing_views.lock().unwrap().push(view.to_string());
    }

    pub fn prospect_count(&self) -> usize {
        self.prospects.lock().unwrap().len()
    }

    pub fn refreshed_views(&self) -> Vec<String> {
        self.refreshed_views.lock().unwrap().clone()
    }

    pub fn saved_metrics(&self) -> Vec<QualityMetric> {
        self.metrics.lock().unwrap().clone()
    }

    pub fn saved_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn upsert_prospect(&self, prospect: &mut Prospect) -> Result<()> {
        let id = prospect.id.unwrap_or_else(Uuid::new_v4);
        prospect.id = Some(id);

        let mut prospects = self.prospects.lock().unwrap();
        prospects.insert(id, prospect.clone());

        debug!("Upserted prospect: {} with id {}", prospect.name, id);
        Ok(())
    }

    async fn find_candidates(&self, position: Option<&str>) -> Result<Vec<Prospect>> {
        let prospects = self.prospects.lock().unwrap();
        let mut candidates: Vec<Prospect> = prospects
            .values()
            .filter(|p| position.map(|pos| p.position == pos).unwrap_or(true))
            .cloned()
            .collect();
        // Stable pool order for deterministic first-wins matching
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(candidates)
    }

    async fn get_prospect(&self, id: Uuid) -> Result<Option<Prospect>> {
        let prospects = self.prospects.lock().unwrap();
        Ok(prospects.get(&id).cloned())
    }

    async fn stage_source_records(&self, records: &[SourceRecord]) -> Result<()> {
        let mut staged = self.staged.lock().unwrap();
        staged.extend_from_slice(records);
        Ok(())
    }

    async fn staged_record_counts(&self, extraction_id: Uuid) -> Result<HashMap<String, u64>> {
        let staged = self.staged.lock().unwrap();
        let mut counts = HashMap::new();
        for record in staged.iter().filter(|r| r.extraction_id == extraction_id) {
            *counts.entry(record.source_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn staged_records(&self, extraction_id: Uuid) -> Result<Vec<SourceRecord>> {
        let staged = self.staged.lock().unwrap();
        Ok(staged
            .iter()
            .filter(|r| r.extraction_id == extraction_id)
            .cloned()
            .collect())
    }

    async fn save_violation(&self, violation: &Violation) -> Result<()> {
        let mut violations = self.violations.lock().unwrap();
        violations.insert(violation.id, violation.clone());
        Ok(())
    }

    async fn update_violation(&self, violation: &Violation) -> Result<()> {
        let mut violations = self.violations.lock().unwrap();
        if !violations.contains_key(&violation.id) {
            return Err(PipelineError::Persistence(format!(
                "cannot update unknown violation {}",
                violation.id
            )));
        }
        violations.insert(violation.id, violation.clone());
        Ok(())
    }

    async fn violations_for_entity(&self, entity_id: Uuid) -> Result<Vec<Violation>> {
        let violations = self.violations.lock().unwrap();
        let mut found: Vec<Violation> = violations
            .values()
            .filter(|v| v.entity_id == entity_id)
            .cloned()
            .collect();
        found.sort_by_key(|v| v.created_at);
        Ok(found)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn save_metric(&self, metric: &QualityMetric) -> Result<()> {
        // Metric history is append-only
        self.metrics.lock().unwrap().push(metric.clone());
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<Rule>> {
        let rules = self.rules.lock().unwrap();
        let mut all: Vec<Rule> = rules.values().cloned().collect();
        all.sort_by_key(|r| r.last_modified);
        Ok(all)
    }

    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn commit_batch(&self, writes: BatchWrites) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::Persistence(
                "injected commit failure".to_string(),
            ));
        }

        // One lock scope per table, all-or-nothing: the failure check
        // above is the only early return.
        {
            let mut prospects = self.prospects.lock().unwrap();
            for prospect in &writes.prospects {
                if let Some(id) = prospect.id {
                    prospects.insert(id, prospect.clone());
                }
            }
        }
        {
            let mut violations = self.violations.lock().unwrap();
            for violation in &writes.violations {
                violations.insert(violation.id, violation.clone());
            }
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.extend(writes.metrics.iter().cloned());
        }
        {
            let mut alerts = self.alerts.lock().unwrap();
            alerts.extend(writes.alerts.iter().cloned());
        }

        debug!(
            "Committed batch: {} prospects, {} violations, {} metrics, {} alerts",
            writes.prospects.len(),
            writes.violations.len(),
            writes.metrics.len(),
            writes.alerts.len()
        );
        Ok(())
    }

    async fn refresh_view(&self, view: &str) -> Result<()> {
        if self.failing_views.lock().unwrap().iter().any(|v| v == view) {
            return Err(PipelineError::Persistence(format!(
                "view refresh failed: {}",
                view
            )));
        }
        self.refreshed_views.lock().unwrap().push(view.to_string());
        Ok(())
    }
}
