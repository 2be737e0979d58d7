//! Threshold-based alert generation over aggregated quality metrics,
//! plus digest assembly for the notification layer.
//!
//! Each of the four metric dimensions is classified independently against
//! its warning/critical threshold pair; critical takes precedence and at
//! most one alert is emitted per dimension. The outlier dimension is
//! evaluated on its inlier complement (100 - outlier%) so "below
//! threshold" uniformly means unhealthy.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AlertThresholdConfig, ThresholdPair};
use crate::domain::{Alert, AlertDimension, QualityMetric, Severity};
use crate::observability::metrics::{emit_counter, MetricName};

/// Generates alerts from quality metrics using configured thresholds
pub struct AlertEngine {
    thresholds: AlertThresholdConfig,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// Evaluate one quality metric, emitting at most one alert per
    /// dimension. A dimension strictly above its warning threshold
    /// generates nothing.
    pub fn evaluate(&self, metric: &QualityMetric) -> Vec<Alert> {
        let scope = scope_label(metric);
        let dimensions = [
            (AlertDimension::Coverage, metric.coverage_pct, self.thresholds.coverage),
            (AlertDimension::Validation, metric.validation_pct, self.thresholds.validation),
            (AlertDimension::Outlier, 100.0 - metric.outlier_pct, self.thresholds.outlier),
            (AlertDimension::Composite, metric.composite_score, self.thresholds.composite),
        ];

        let mut alerts = Vec::new();
        for (dimension, value, pair) in dimensions {
            if let Some(alert) = classify(dimension, value, pair, &scope) {
                if alert.severity == Severity::Critical {
                    emit_counter(MetricName::AlertsCritical, 1.0);
                    warn!("critical alert [{}]: {}", scope, alert.message);
                } else {
                    info!("alert [{}]: {}", scope, alert.message);
                }
                emit_counter(MetricName::AlertsGenerated, 1.0);
                alerts.push(alert);
            }
        }
        alerts
    }
}

/// Classify one dimension value against its threshold pair. Critical
/// takes precedence; never both levels for the same dimension.
fn classify(
    dimension: AlertDimension,
    value: f64,
    pair: ThresholdPair,
    scope: &str,
) -> Option<Alert> {
    let (severity, threshold) = if value <= pair.critical {
        (Severity::Critical, pair.critical)
    } else if value <= pair.warning {
        (Severity::Warning, pair.warning)
    } else {
        return None;
    };

    Some(Alert {
        id: Uuid::new_v4(),
        dimension,
        severity,
        message: format!(
            "{:?} quality at {:.1} breached {:?} threshold {:.1} for {}",
            dimension, value, severity, threshold, scope
        ),
        metric_value: value,
        threshold,
        generated_at: Utc::now(),
        acknowledged: false,
    })
}

fn scope_label(metric: &QualityMetric) -> String {
    format!(
        "{} / {} / {}",
        metric.date,
        metric.position.as_deref().unwrap_or("all positions"),
        metric.source.as_deref().unwrap_or("all sources")
    )
}

/// Ranking aid for triage, never a generation criterion.
pub fn priority_score(alert: &Alert) -> f64 {
    let multiplier = match alert.severity {
        Severity::Info => 0.5,
        Severity::Warning => 1.5,
        Severity::Error | Severity::Critical => 2.5,
    };
    let shortfall = if alert.threshold == 0.0 {
        0.0
    } else {
        ((alert.threshold - alert.metric_value) / alert.threshold).clamp(0.0, 1.0)
    };
    multiplier * shortfall * 100.0
}

/// Alerts partitioned and ordered for a notification digest
#[derive(Debug, Clone)]
pub struct AlertDigest {
    pub subject: String,
    pub critical: Vec<Alert>,
    pub warning: Vec<Alert>,
    pub info: Vec<Alert>,
}

impl AlertDigest {
    /// Partition by severity, critical first, generation-time order
    /// within each severity.
    pub fn build(mut alerts: Vec<Alert>) -> Self {
        alerts.sort_by_key(|a| a.generated_at);

        let mut critical = Vec::new();
        let mut warning = Vec::new();
        let mut info = Vec::new();
        for alert in alerts {
            match alert.severity {
                Severity::Critical | Severity::Error => critical.push(alert),
                Severity::Warning => warning.push(alert),
                Severity::Info => info.push(alert),
            }
        }

        let subject = if !critical.is_empty() {
            format!("CRITICAL: {} data quality alert(s) require attention", critical.len())
        } else if !warning.is_empty() {
            format!("Warning: {} data quality alert(s)", warning.len())
        } else {
            "Data quality digest: no active alerts".to_string()
        };

        Self { subject, critical, warning, info }
    }

    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.warning.is_empty() && self.info.is_empty()
    }

    /// Alerts in digest order: critical block first, then warnings, then info.
    pub fn ordered(&self) -> Vec<&Alert> {
        self.critical
            .iter()
            .chain(self.warning.iter())
            .chain(self.info.iter())
            .collect()
    }
}
