//! Persistence collaborator contract. The core never hard-codes a
//! storage engine; orchestrators receive a `Repository` by injection.

pub mod in_memory;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{Alert, Prospect, QualityMetric, SourceRecord, Violation};
use crate::error::Result;
use crate::processing::rules::Rule;

pub use in_memory::InMemoryRepository;

/// All writes accumulated for one extraction batch. The Load phase
/// applies the whole set in one atomic commit; alerts derived from the
/// batch metric roll back with the metric they reference.
#[derive(Debug, Clone, Default)]
pub struct BatchWrites {
    pub prospects: Vec<Prospect>,
    pub violations: Vec<Violation>,
    pub metrics: Vec<QualityMetric>,
    pub alerts: Vec<Alert>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    // Canonical entities
    async fn upsert_prospect(&self, prospect: &mut Prospect) -> Result<()>;
    async fn find_candidates(&self, position: Option<&str>) -> Result<Vec<Prospect>>;
    async fn get_prospect(&self, id: Uuid) -> Result<Option<Prospect>>;

    // Staged source records for one extraction batch
    async fn stage_source_records(&self, records: &[SourceRecord]) -> Result<()>;
    async fn staged_record_counts(&self, extraction_id: Uuid) -> Result<HashMap<String, u64>>;
    async fn staged_records(&self, extraction_id: Uuid) -> Result<Vec<SourceRecord>>;

    // Quality artifacts
    async fn save_violation(&self, violation: &Violation) -> Result<()>;
    async fn update_violation(&self, violation: &Violation) -> Result<()>;
    async fn violations_for_entity(&self, entity_id: Uuid) -> Result<Vec<Violation>>;
    async fn save_alert(&self, alert: &Alert) -> Result<()>;
    async fn save_metric(&self, metric: &QualityMetric) -> Result<()>;

    // Operator-configured rules
    async fn load_rules(&self) -> Result<Vec<Rule>>;
    async fn save_rule(&self, rule: &Rule) -> Result<()>;

    /// Apply all writes for one batch atomically; either everything in
    /// `writes` lands or nothing does.
    async fn commit_batch(&self, writes: BatchWrites) -> Result<()>;

    /// Refresh one derived/materialized view (best-effort callers).
    async fn refresh_view(&self, view: &str) -> Result<()>;
}
