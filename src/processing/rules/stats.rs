//! Per-population-group statistics backing outlier rules.

use std::collections::HashMap;

use crate::domain::{FieldValue, Prospect};

/// Summary statistics for one numeric field within one population group
#[derive(Debug, Clone, Copy)]
pub struct FieldStats {
    pub count: usize,
    pub mean: f64,
    pub stdev: f64,
    pub q1: f64,
    pub q3: f64,
    pub p5: f64,
    pub p95: f64,
}

/// Statistics for every numeric field, grouped by the configured
/// population field (typically position).
#[derive(Debug, Clone, Default)]
pub struct PopulationStats {
    /// group value -> field name -> stats
    groups: HashMap<String, HashMap<String, FieldStats>>,
}

impl PopulationStats {
    pub fn get(&self, group: &str, field: &str) -> Option<&FieldStats> {
        self.groups.get(group).and_then(|fields| fields.get(field))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Group entities by `population_field` and compute mean, stdev, Q1, Q3,
/// P5 and P95 for every numeric attribute observed in the group.
pub fn calculate_population_stats(
    entities: &[Prospect],
    population_field: &str,
) -> PopulationStats {
    let mut samples: HashMap<String, HashMap<String, Vec<f64>>> = HashMap::new();

    for entity in entities {
        let group = match entity.field(population_field) {
            Some(FieldValue::Text(t)) => t,
            Some(FieldValue::Number(n)) => n.to_string(),
            None => continue,
        };
        let fields = samples.entry(group).or_default();
        for (name, value) in &entity.attributes {
            // Non-finite values would poison every derived statistic
            if value.is_finite() {
                fields.entry(name.clone()).or_default().push(*value);
            }
        }
    }

    let mut groups = HashMap::new();
    for (group, fields) in samples {
        let mut field_stats = HashMap::new();
        for (name, mut values) in fields {
            values.sort_by(f64::total_cmp);
            field_stats.insert(name, summarize(&values));
        }
        groups.insert(group, field_stats);
    }

    PopulationStats { groups }
}

fn summarize(sorted: &[f64]) -> FieldStats {
    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    FieldStats {
        count,
        mean,
        stdev: variance.sqrt(),
        q1: percentile(sorted, 25.0),
        q3: percentile(sorted, 75.0),
        p5: percentile(sorted, 5.0),
        p95: percentile(sorted, 95.0),
    }
}

/// Linear-interpolation percentile over an ascending-sorted slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn prospect(position: &str, weight: f64) -> Prospect {
        Prospect {
            id: Some(Uuid::new_v4()),
            name: "Test Prospect".to_string(),
            position: position.to_string(),
            school: "test u".to_string(),
            attributes: HashMap::from([("weight_lb".to_string(), weight)]),
            sources: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_grouping_by_position() {
        let entities = vec![
            prospect("QB", 210.0),
            prospect("QB", 220.0),
            prospect("OT", 310.0),
        ];
        let stats = calculate_population_stats(&entities, "position");
        assert_eq!(stats.group_count(), 2);

        let qb = stats.get("QB", "weight_lb").unwrap();
        assert_eq!(qb.count, 2);
        assert_eq!(qb.mean, 215.0);

        let ot = stats.get("OT", "weight_lb").unwrap();
        assert_eq!(ot.count, 1);
        assert_eq!(ot.stdev, 0.0);
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 10.0), 1.4);
    }

    #[test]
    fn test_quartiles_and_tails() {
        let entities: Vec<Prospect> = (1..=11).map(|w| prospect("QB", w as f64 * 10.0)).collect();
        let stats = calculate_population_stats(&entities, "position");
        let s = stats.get("QB", "weight_lb").unwrap();
        assert_eq!(s.q1, 35.0);
        assert_eq!(s.q3, 85.0);
        assert_eq!(s.p5, 15.0);
        assert_eq!(s.p95, 105.0);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let entities = vec![
            prospect("QB", 210.0),
            prospect("QB", f64::NAN),
            prospect("QB", f64::INFINITY),
            prospect("QB", 220.0),
        ];
        let stats = calculate_population_stats(&entities, "position");
        let qb = stats.get("QB", "weight_lb").unwrap();
        assert_eq!(qb.count, 2);
        assert_eq!(qb.mean, 215.0);
    }

    #[test]
    fn test_missing_group_or_field_is_none() {
        let stats = calculate_population_stats(&[prospect("QB", 210.0)], "position");
        assert!(stats.get("QB", "forty_yd").is_none());
        assert!(stats.get("WR", "weight_lb").is_none());
    }
}
