//! Three-tier identity resolution for incoming source records.
//!
//! Tier 1 (exact): normalized name, normalized school and mapped position
//! all equal a candidate. Tier 2 (fuzzy): position-equal candidates ranked
//! by name similarity, with a raised acceptance threshold when the school
//! differs. Tier 3: new entity or unmatched, per caller policy.

pub mod normalize;
pub mod similarity;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MatchingConfig;
use crate::domain::{MatchResult, MatchType, Prospect, SourceRecord};
use crate::observability::metrics::{emit_counter, emit_histogram, MetricName};

pub use normalize::{map_position, normalize_name, normalize_school};
pub use similarity::name_similarity;

/// Resolves source records against a canonical candidate pool
pub struct ProspectMatcher {
    config: MatchingConfig,
}

impl ProspectMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Resolve one source record against the candidate pool. Pure and
    /// deterministic: same inputs always produce the same decision.
    pub fn resolve(&self, record: &SourceRecord, candidates: &[Prospect]) -> MatchResult {
        let name = normalize_name(&record.name);
        let school = normalize_school(&record.school);
        let position = map_position(&record.position);

        // Tier 1: exact on all three identity fields; first qualifying
        // candidate in pool order wins.
        for candidate in candidates {
            if normalize_name(&candidate.name) == name
                && normalize_school(&candidate.school) == school
                && candidate.position == position
            {
                return MatchResult {
                    match_type: MatchType::Exact,
                    score: 100.0,
                    confidence: 1.0,
                    matched_prospect_id: candidate.id,
                    source_record_id: record.id,
                };
            }
        }

        // Tier 2: fuzzy over position-equal candidates. A differing
        // school raises the acceptance threshold.
        let mut best: Option<(&Prospect, f64, f64)> = None;
        for candidate in candidates.iter().filter(|c| c.position == position) {
            let score = name_similarity(&normalize_name(&candidate.name), &name);
            let threshold = if normalize_school(&candidate.school) == school {
                self.config.medium_threshold
            } else {
                self.config.high_threshold
            };
            // Strict comparison keeps the first-encountered candidate on ties
            if best.map_or(true, |(_, best_score, _)| score > best_score) {
                best = Some((candidate, score, threshold));
            }
        }

        if let Some((candidate, score, threshold)) = best {
            if score >= threshold {
                debug!(
                    "fuzzy match for '{}': candidate '{}' score {:.1} (threshold {:.0})",
                    record.name, candidate.name, score, threshold
                );
                return MatchResult {
                    match_type: MatchType::Fuzzy,
                    score,
                    confidence: score / 100.0,
                    matched_prospect_id: candidate.id,
                    source_record_id: record.id,
                };
            }
        }

        // Tier 3: no exact or fuzzy hit
        if self.config.create_new_entities {
            MatchResult {
                match_type: MatchType::New,
                score: 0.0,
                confidence: 1.0,
                matched_prospect_id: None,
                source_record_id: record.id,
            }
        } else {
            MatchResult {
                match_type: MatchType::Unmatched,
                score: best.map(|(_, s, _)| s).unwrap_or(0.0),
                confidence: 0.0,
                matched_prospect_id: None,
                source_record_id: record.id,
            }
        }
    }

    /// Resolve a whole batch, aggregating tier counts.
    pub fn resolve_batch(
        &self,
        records: &[SourceRecord],
        candidates: &[Prospect],
    ) -> (Vec<MatchResult>, BatchMatchSummary) {
        let mut results = Vec::with_capacity(records.len());
        let mut summary = BatchMatchSummary::default();

        for record in records {
            let result = self.resolve(record, candidates);
            emit_histogram(MetricName::MatchScore, result.score);
            match result.match_type {
                MatchType::Exact => {
                    summary.exact += 1;
                    emit_counter(MetricName::MatchExact, 1.0);
                }
                MatchType::Fuzzy => {
                    summary.fuzzy += 1;
                    emit_counter(MetricName::MatchFuzzy, 1.0);
                }
                MatchType::New => {
                    summary.new += 1;
                    emit_counter(MetricName::MatchNew, 1.0);
                }
                MatchType::Unmatched => {
                    summary.unmatched += 1;
                    emit_counter(MetricName::MatchUnmatched, 1.0);
                }
            }
            summary.total += 1;
            results.push(result);
        }

        (results, summary)
    }
}

/// Aggregated tier counts for one batch resolution
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchMatchSummary {
    pub total: u64,
    pub exact: u64,
    pub fuzzy: u64,
    pub new: u64,
    pub unmatched: u64,
}

impl BatchMatchSummary {
    pub fn exact_rate(&self) -> f64 {
        self.rate(self.exact)
    }

    pub fn fuzzy_rate(&self) -> f64 {
        self.rate(self.fuzzy)
    }

    pub fn unmatched_rate(&self) -> f64 {
        self.rate(self.unmatched)
    }

    fn rate(&self, count: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }
}
