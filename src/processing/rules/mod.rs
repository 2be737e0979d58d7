//! Configurable quality rules engine with statistical outlier detection
//! and the quarantine/review workflow.
//!
//! Rule kinds form a closed set dispatched by pattern matching. Outlier
//! rules evaluate against precomputed per-population-group statistics and
//! are inert when a group has fewer than two samples for the field.

pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{FieldValue, Prospect, ReviewStatus, Severity, Violation};
use crate::observability::metrics::{emit_counter, MetricName};
use crate::storage::Repository;

pub use stats::{calculate_population_stats, FieldStats, PopulationStats};

/// Comparison operators for business-logic rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
    Contains,
}

/// Two-field relationship checked by consistency rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum ConsistencyRelation {
    Equals,
    ProportionalTo { factor: f64 },
    InverseProportional { factor: f64 },
}

/// Statistical test applied by outlier rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Threshold is a standard-deviation multiplier
    ZScore,
    /// Threshold is an IQR multiplier applied below Q1 / above Q3
    Iqr,
    /// 5th/95th percentile band; threshold is unused
    Percentile,
}

/// The closed set of rule variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    BusinessLogic {
        field: String,
        op: ComparisonOp,
        expected: serde_json::Value,
    },
    Consistency {
        field_a: String,
        field_b: String,
        relation: ConsistencyRelation,
        tolerance: f64,
    },
    Outlier {
        field: String,
        method: OutlierMethod,
        threshold: f64,
        /// Field entities are grouped by for the statistics (e.g. position)
        population_field: String,
    },
}

/// Restricts a rule to a source and/or position
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleScope {
    pub source: Option<String>,
    pub position: Option<String>,
}

impl RuleScope {
    fn applies_to(&self, entity: &Prospect) -> bool {
        if let Some(position) = &self.position {
            if &entity.position != position {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if !entity.sources.contains(source) {
                return false;
            }
        }
        true
    }
}

/// A configured validation policy, created and edited by operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub kind: RuleKind,
    pub scope: RuleScope,
    pub severity: Severity,
    pub enabled: bool,
    pub last_modified: DateTime<Utc>,
}

impl Rule {
    pub fn new(name: &str, kind: RuleKind, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            scope: RuleScope::default(),
            severity,
            enabled: true,
            last_modified: Utc::now(),
        }
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.last_modified = Utc::now();
    }

    /// Evaluate this rule against one entity. Returns at most one
    /// violation. Outlier rules receive precomputed population stats.
    pub fn evaluate(&self, entity: &Prospect, stats: &PopulationStats) -> Option<Violation> {
        if !self.enabled || !self.scope.applies_to(entity) {
            return None;
        }

        match &self.kind {
            RuleKind::BusinessLogic { field, op, expected } => {
                let value = entity.field(field)?;
                if business_logic_holds(&value, *op, expected) {
                    None
                } else {
                    Some(self.violation(
                        entity,
                        field,
                        render_value(&value),
                        format!("{:?} {}", op, expected),
                    ))
                }
            }
            RuleKind::Consistency { field_a, field_b, relation, tolerance } => {
                let a = entity.field(field_a).and_then(numeric)?;
                let b = entity.field(field_b).and_then(numeric)?;
                if consistency_holds(a, b, *relation, *tolerance) {
                    None
                } else {
                    Some(self.violation(
                        entity,
                        field_a,
                        format!("{} vs {}", a, b),
                        format!("{:?} within tolerance {}", relation, tolerance),
                    ))
                }
            }
            RuleKind::Outlier { field, method, threshold, population_field } => {
                let value = entity.field(field).and_then(numeric)?;
                let group = match entity.field(population_field)? {
                    FieldValue::Text(t) => t,
                    FieldValue::Number(n) => n.to_string(),
                };
                let field_stats = stats.get(&group, field)?;
                // Too few samples for a meaningful statistical test
                if field_stats.count < 2 {
                    return None;
                }
                outlier_bounds(field_stats, *method, *threshold).and_then(|(low, high)| {
                    if value < low || value > high {
                        Some(self.violation(
                            entity,
                            field,
                            value.to_string(),
                            format!("within [{:.2}, {:.2}] for {} {}", low, high, population_field, group),
                        ))
                    } else {
                        None
                    }
                })
            }
        }
    }

    fn violation(&self, entity: &Prospect, field: &str, value: String, expected: String) -> Violation {
        Violation {
            id: Uuid::new_v4(),
            entity_id: entity.id.unwrap_or(Uuid::nil()),
            rule_id: self.id,
            severity: self.severity,
            field: field.to_string(),
            value,
            expected,
            review_status: ReviewStatus::Pending,
            reviewer: None,
            review_note: None,
            quarantined: false,
            created_at: Utc::now(),
        }
    }
}

fn numeric(value: FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(n),
        FieldValue::Text(_) => None,
    }
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(t) => t.clone(),
    }
}

fn business_logic_holds(value: &FieldValue, op: ComparisonOp, expected: &serde_json::Value) -> bool {
    match op {
        ComparisonOp::Eq => value_equals(value, expected),
        ComparisonOp::Ne => !value_equals(value, expected),
        ComparisonOp::Lt | ComparisonOp::Gt | ComparisonOp::Le | ComparisonOp::Ge => {
            let (a, b) = match (value, expected.as_f64()) {
                (FieldValue::Number(a), Some(b)) => (*a, b),
                _ => return false,
            };
            match op {
                ComparisonOp::Lt => a < b,
                ComparisonOp::Gt => a > b,
                ComparisonOp::Le => a <= b,
                ComparisonOp::Ge => a >= b,
                _ => unreachable!(),
            }
        }
        ComparisonOp::In | ComparisonOp::NotIn => {
            let found = expected
                .as_array()
                .map(|items| items.iter().any(|item| value_equals(value, item)))
                .unwrap_or(false);
            if op == ComparisonOp::In {
                found
            } else {
                !found
            }
        }
        ComparisonOp::Contains => match (value, expected.as_str()) {
            (FieldValue::Text(t), Some(needle)) => t.contains(needle),
            _ => false,
        },
    }
}

fn value_equals(value: &FieldValue, expected: &serde_json::Value) -> bool {
    match value {
        FieldValue::Number(n) => expected.as_f64().map(|e| (n - e).abs() < f64::EPSILON).unwrap_or(false),
        FieldValue::Text(t) => expected.as_str().map(|e| t == e).unwrap_or(false),
    }
}

fn consistency_holds(a: f64, b: f64, relation: ConsistencyRelation, tolerance: f64) -> bool {
    match relation {
        ConsistencyRelation::Equals => (a - b).abs() <= tolerance,
        ConsistencyRelation::ProportionalTo { factor } => {
            let expected = b * factor;
            (a - expected).abs() <= tolerance * expected.abs().max(f64::EPSILON)
        }
        ConsistencyRelation::InverseProportional { factor } => {
            (a * b - factor).abs() <= tolerance * factor.abs().max(f64::EPSILON)
        }
    }
}

fn outlier_bounds(stats: &FieldStats, method: OutlierMethod, threshold: f64) -> Option<(f64, f64)> {
    match method {
        OutlierMethod::ZScore => {
            if stats.stdev == 0.0 {
                return None;
            }
            Some((
                stats.mean - threshold * stats.stdev,
                stats.mean + threshold * stats.stdev,
            ))
        }
        OutlierMethod::Iqr => {
            let iqr = stats.q3 - stats.q1;
            Some((stats.q1 - threshold * iqr, stats.q3 + threshold * iqr))
        }
        OutlierMethod::Percentile => Some((stats.p5, stats.p95)),
    }
}

// ---------------------------------------------------------------------------
// Dataset validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationStatus {
    Pass,
    Fail,
}

/// Aggregate result of validating one dataset
#[derive(Debug, Clone)]
pub struct DatasetValidation {
    pub status: ValidationStatus,
    pub entities_validated: usize,
    pub violations: Vec<Violation>,
    pub severity_counts: HashMap<Severity, u64>,
    /// Entities auto-quarantined for having an Error/Critical violation
    pub quarantined_entities: HashSet<Uuid>,
    /// Percentage of entities with no Error/Critical violation
    pub pass_rate: f64,
}

/// Runs enabled rules over entities and datasets
pub struct RulesEngine {
    /// Dataset pass-rate below this marks the validation FAIL
    pub pass_rate_threshold: f64,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self { pass_rate_threshold: 90.0 }
    }
}

impl RulesEngine {
    pub fn new(pass_rate_threshold: f64) -> Self {
        Self { pass_rate_threshold }
    }

    /// Run all enabled rules over one entity.
    pub fn validate_entity(
        &self,
        entity: &Prospect,
        rules: &[Rule],
        stats: &PopulationStats,
    ) -> Vec<Violation> {
        rules
            .iter()
            .filter_map(|rule| rule.evaluate(entity, stats))
            .collect()
    }

    /// Validate every entity, computing population statistics once.
    /// Entities with at least one Error/Critical violation are
    /// auto-quarantined.
    pub fn validate_dataset(&self, entities: &[Prospect], rules: &[Rule]) -> DatasetValidation {
        let population_field = rules
            .iter()
            .find_map(|rule| match &rule.kind {
                RuleKind::Outlier { population_field, .. } => Some(population_field.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "position".to_string());
        let stats = calculate_population_stats(entities, &population_field);

        let mut violations = Vec::new();
        let mut severity_counts: HashMap<Severity, u64> = HashMap::new();
        let mut quarantined_entities = HashSet::new();

        for entity in entities {
            let mut entity_violations = self.validate_entity(entity, rules, &stats);
            let quarantine = entity_violations.iter().any(|v| v.severity >= Severity::Error);
            if quarantine {
                if let Some(id) = entity.id {
                    quarantined_entities.insert(id);
                }
                for violation in &mut entity_violations {
                    if violation.severity >= Severity::Error {
                        violation.quarantined = true;
                    }
                }
            }
            for violation in &entity_violations {
                *severity_counts.entry(violation.severity).or_insert(0) += 1;
            }
            violations.extend(entity_violations);
        }

        let passed = entities.len() - quarantined_entities_in(entities, &quarantined_entities);
        let pass_rate = if entities.is_empty() {
            100.0
        } else {
            passed as f64 * 100.0 / entities.len() as f64
        };
        let status = if pass_rate >= self.pass_rate_threshold {
            ValidationStatus::Pass
        } else {
            ValidationStatus::Fail
        };

        emit_counter(MetricName::ViolationsDetected, violations.len() as f64);
        emit_counter(MetricName::EntitiesQuarantined, quarantined_entities.len() as f64);
        if status == ValidationStatus::Fail {
            warn!(
                "dataset validation FAIL: pass rate {:.1}% below {:.1}% ({} violations, {} quarantined)",
                pass_rate,
                self.pass_rate_threshold,
                violations.len(),
                quarantined_entities.len()
            );
        } else {
            info!(
                "dataset validation pass: {:.1}% pass rate, {} violations across {} entities",
                pass_rate,
                violations.len(),
                entities.len()
            );
        }

        DatasetValidation {
            status,
            entities_validated: entities.len(),
            violations,
            severity_counts,
            quarantined_entities,
            pass_rate,
        }
    }
}

fn quarantined_entities_in(entities: &[Prospect], quarantined: &HashSet<Uuid>) -> usize {
    entities
        .iter()
        .filter(|e| e.id.map(|id| quarantined.contains(&id)).unwrap_or(false))
        .count()
}

// ---------------------------------------------------------------------------
// Review workflow
// ---------------------------------------------------------------------------

/// Apply a review decision to a violation, recording reviewer and note.
pub fn review_violation(
    violation: &mut Violation,
    status: ReviewStatus,
    reviewer: &str,
    note: &str,
) {
    violation.review_status = status;
    violation.reviewer = Some(reviewer.to_string());
    violation.review_note = Some(note.to_string());
    debug!(
        "violation {} on entity {} reviewed as {:?} by {}",
        violation.id, violation.entity_id, status, reviewer
    );
}

/// An entity is quarantined iff it has at least one Error/Critical
/// violation whose review status is not Approved.
pub fn is_quarantined(violations: &[Violation]) -> bool {
    violations
        .iter()
        .any(|v| v.severity >= Severity::Error && v.review_status != ReviewStatus::Approved)
}

// ---------------------------------------------------------------------------
// Rule cache
// ---------------------------------------------------------------------------

/// Caches operator-configured rules, invalidated explicitly on edit.
pub struct RuleCache {
    cached: Mutex<Option<Vec<Rule>>>,
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCache {
    pub fn new() -> Self {
        Self { cached: Mutex::new(None) }
    }

    /// Return cached rules, loading from the repository on a miss.
    pub async fn get_or_load(&self, repo: &dyn Repository) -> anyhow::Result<Vec<Rule>> {
        let mut guard = self.cached.lock().await;
        if let Some(rules) = guard.as_ref() {
            return Ok(rules.clone());
        }
        let rules = repo.load_rules().await?;
        debug!("rule cache loaded {} rules", rules.len());
        *guard = Some(rules.clone());
        Ok(rules)
    }

    /// Drop the cache; the next read reloads from the repository.
    pub async fn invalidate(&self) {
        let mut guard = self.cached.lock().await;
        *guard = None;
        emit_counter(MetricName::RuleCacheInvalidations, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn prospect(name: &str, position: &str, attrs: &[(&str, f64)]) -> Prospect {
        Prospect {
            id: Some(Uuid::new_v4()),
            name: name.to_string(),
            position: position.to_string(),
            school: "test state".to_string(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            sources: vec!["rivals".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn no_stats() -> PopulationStats {
        PopulationStats::default()
    }

    #[test]
    fn test_business_logic_comparison_ops() {
        let entity = prospect("John Smith", "QB", &[("weight_lb", 212.0)]);
        let stats = no_stats();

        let ge = Rule::new(
            "min weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Ge,
                expected: serde_json::json!(180.0),
            },
            Severity::Error,
        );
        assert!(ge.evaluate(&entity, &stats).is_none());

        let gt = Rule::new(
            "impossible weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Gt,
                expected: serde_json::json!(400.0),
            },
            Severity::Error,
        );
        let violation = gt.evaluate(&entity, &stats).unwrap();
        assert_eq!(violation.field, "weight_lb");
        assert_eq!(violation.severity, Severity::Error);

        let in_op = Rule::new(
            "known position",
            RuleKind::BusinessLogic {
                field: "position".to_string(),
                op: ComparisonOp::In,
                expected: serde_json::json!(["QB", "RB", "WR"]),
            },
            Severity::Warning,
        );
        assert!(in_op.evaluate(&entity, &stats).is_none());

        let contains = Rule::new(
            "name has space",
            RuleKind::BusinessLogic {
                field: "name".to_string(),
                op: ComparisonOp::Contains,
                expected: serde_json::json!(" "),
            },
            Severity::Info,
        );
        assert!(contains.evaluate(&entity, &stats).is_none());
    }

    #[test]
    fn test_business_logic_missing_field_is_inert() {
        let entity = prospect("John Smith", "QB", &[]);
        let rule = Rule::new(
            "min weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Ge,
                expected: serde_json::json!(180.0),
            },
            Severity::Error,
        );
        assert!(rule.evaluate(&entity, &no_stats()).is_none());
    }

    #[test]
    fn test_consistency_relations() {
        let entity = prospect("John Smith", "QB", &[("height_in", 75.0), ("height_cm", 190.5)]);
        let rule = Rule::new(
            "height units agree",
            RuleKind::Consistency {
                field_a: "height_cm".to_string(),
                field_b: "height_in".to_string(),
                relation: ConsistencyRelation::ProportionalTo { factor: 2.54 },
                tolerance: 0.01,
            },
            Severity::Error,
        );
        assert!(rule.evaluate(&entity, &no_stats()).is_none());

        let skewed = prospect("John Smith", "QB", &[("height_in", 75.0), ("height_cm", 120.0)]);
        assert!(rule.evaluate(&skewed, &no_stats()).is_some());
    }

    #[test]
    fn test_disabled_and_out_of_scope_rules_never_fire() {
        let entity = prospect("John Smith", "QB", &[("weight_lb", 500.0)]);
        let mut rule = Rule::new(
            "max weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Le,
                expected: serde_json::json!(400.0),
            },
            Severity::Critical,
        );
        assert!(rule.evaluate(&entity, &no_stats()).is_some());

        rule.set_enabled(false);
        assert!(rule.evaluate(&entity, &no_stats()).is_none());

        rule.set_enabled(true);
        let scoped = rule.clone().with_scope(RuleScope {
            source: None,
            position: Some("OT".to_string()),
        });
        assert!(scoped.evaluate(&entity, &no_stats()).is_none());
    }

    fn outlier_rule(method: OutlierMethod, threshold: f64) -> Rule {
        Rule::new(
            "forty outlier",
            RuleKind::Outlier {
                field: "forty_yd".to_string(),
                method,
                threshold,
                population_field: "position".to_string(),
            },
            Severity::Error,
        )
    }

    #[test]
    fn test_zscore_outlier_detection() {
        let mut entities: Vec<Prospect> = (0..10)
            .map(|i| prospect(&format!("P{}", i), "WR", &[("forty_yd", 4.4 + 0.01 * i as f64)]))
            .collect();
        entities.push(prospect("Slow Guy", "WR", &[("forty_yd", 6.8)]));

        let engine = RulesEngine::default();
        let result = engine.validate_dataset(&entities, &[outlier_rule(OutlierMethod::ZScore, 3.0)]);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].value, "6.8");
    }

    #[test]
    fn test_outlier_rule_inert_below_two_samples() {
        let entities = vec![prospect("Only One", "K", &[("forty_yd", 9.9)])];
        let engine = RulesEngine::default();
        let result = engine.validate_dataset(&entities, &[outlier_rule(OutlierMethod::ZScore, 3.0)]);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_percentile_band_outlier() {
        let mut entities: Vec<Prospect> = (1..=20)
            .map(|i| prospect(&format!("P{}", i), "RB", &[("weight_lb", 195.0 + i as f64)]))
            .collect();
        entities.push(prospect("Tiny", "RB", &[("weight_lb", 120.0)]));

        let rule = Rule::new(
            "weight outlier",
            RuleKind::Outlier {
                field: "weight_lb".to_string(),
                method: OutlierMethod::Percentile,
                threshold: 0.0,
                population_field: "position".to_string(),
            },
            Severity::Error,
        );
        let engine = RulesEngine::default();
        let result = engine.validate_dataset(&entities, &[rule]);
        assert!(result
            .violations
            .iter()
            .any(|v| v.value == "120" || v.value == "120.0"));
    }

    #[test]
    fn test_dataset_auto_quarantine_and_pass_rate() {
        let good = prospect("Good", "QB", &[("weight_lb", 210.0)]);
        let bad = prospect("Bad", "QB", &[("weight_lb", 500.0)]);
        let bad_id = bad.id.unwrap();
        let rule = Rule::new(
            "max weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Le,
                expected: serde_json::json!(400.0),
            },
            Severity::Critical,
        );

        let engine = RulesEngine::default();
        let result = engine.validate_dataset(&[good, bad], &[rule]);
        assert_eq!(result.quarantined_entities.len(), 1);
        assert!(result.quarantined_entities.contains(&bad_id));
        assert!(result.violations[0].quarantined);
        assert_eq!(result.pass_rate, 50.0);
        assert_eq!(result.status, ValidationStatus::Fail);
        assert_eq!(result.severity_counts[&Severity::Critical], 1);
    }

    #[test]
    fn test_warning_violations_do_not_quarantine() {
        let entity = prospect("Mild", "QB", &[("weight_lb", 170.0)]);
        let rule = Rule::new(
            "light for position",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Ge,
                expected: serde_json::json!(180.0),
            },
            Severity::Warning,
        );
        let engine = RulesEngine::default();
        let result = engine.validate_dataset(&[entity], &[rule]);
        assert_eq!(result.violations.len(), 1);
        assert!(result.quarantined_entities.is_empty());
        assert_eq!(result.status, ValidationStatus::Pass);
    }

    #[test]
    fn test_quarantine_clears_only_when_all_approved() {
        let entity = prospect("Reviewed", "QB", &[("weight_lb", 500.0)]);
        let rule = Rule::new(
            "max weight",
            RuleKind::BusinessLogic {
                field: "weight_lb".to_string(),
                op: ComparisonOp::Le,
                expected: serde_json::json!(400.0),
            },
            Severity::Error,
        );
        let mut violations = RulesEngine::default().validate_entity(
            &entity,
            &[rule.clone(), rule],
            &no_stats(),
        );
        assert_eq!(violations.len(), 2);
        assert!(is_quarantined(&violations));

        review_violation(&mut violations[0], ReviewStatus::Approved, "scout_a", "verified combine data");
        assert!(is_quarantined(&violations));

        // Rejected/waived do not clear quarantine
        review_violation(&mut violations[1], ReviewStatus::Waived, "scout_a", "known exception");
        assert!(is_quarantined(&violations));

        review_violation(&mut violations[1], ReviewStatus::Approved, "scout_b", "double checked");
        assert!(!is_quarantined(&violations));
        assert_eq!(violations[1].reviewer.as_deref(), Some("scout_b"));
    }
}
